//! Line-oriented terminal interaction.
//!
//! Reads operator lines and writes chat output, flushing after every write so
//! text shows up while the event loop is waiting.

use std::io::{self, Write};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Stdin};

/// One unit of operator input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    /// A line to send to the server, newline stripped. Raw bytes, since the
    /// terminal need not be UTF-8.
    Message(Vec<u8>),
    /// The operator typed the quit command.
    Quit,
    /// Input ended; nothing more will be typed.
    Closed,
}

/// Console bound to an input reader and an output writer.
pub struct Console<R, W> {
    input: R,
    /// Bytes of a line still being typed.
    pending: Vec<u8>,
    output: W,
    quit_command: String,
}

/// Console on the process's standard streams.
pub type StdConsole = Console<BufReader<Stdin>, io::Stdout>;

/// Create a console on stdin/stdout.
pub fn stdio(quit_command: impl Into<String>) -> StdConsole {
    Console::new(BufReader::new(tokio::io::stdin()), io::stdout(), quit_command)
}

impl<R, W> Console<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(input: R, output: W, quit_command: impl Into<String>) -> Self {
        Self {
            input,
            pending: Vec::new(),
            output,
            quit_command: quit_command.into(),
        }
    }

    /// The command that ends the session.
    pub fn quit_command(&self) -> &str {
        &self.quit_command
    }

    /// Read the next operator line.
    ///
    /// Cancel-safe: a partially typed line survives if the caller stops
    /// waiting for it.
    pub async fn read(&mut self) -> io::Result<ConsoleInput> {
        self.input.read_until(b'\n', &mut self.pending).await?;
        if self.pending.is_empty() {
            return Ok(ConsoleInput::Closed);
        }

        let mut line = std::mem::take(&mut self.pending);
        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        }

        if line == self.quit_command.as_bytes() {
            Ok(ConsoleInput::Quit)
        } else {
            Ok(ConsoleInput::Message(line))
        }
    }

    /// Write one line and flush.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        writeln!(self.output, "{}", text)?;
        self.output.flush()
    }

    /// Write the prompt marker without a newline and flush.
    pub fn prompt(&mut self, marker: &str) -> io::Result<()> {
        write!(self.output, "{}", marker)?;
        self.output.flush()
    }
}
