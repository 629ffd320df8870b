//! The session event loop.
//!
//! One task waits on socket readiness and operator input at the same time,
//! with a bounded timeout, and handles whichever is ready. Reading, framing,
//! decoding and printing all run to completion between waits, so inbound
//! lines are shown in arrival order and outbound lines go out in typed order.

use crate::client::console::{Console, ConsoleInput};
use crate::client::socket::{Connection, Received};
use crate::config::SessionConfig;
use crate::protocol::framing::{FrameError, Framer};
use crate::protocol::{decode, encode, Line};
use std::fmt;
use std::io::{self, Write};
use std::ops::ControlFlow;
use tokio::io::AsyncBufRead;
use tracing::{debug, warn};

/// Whether the loop is still going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Running,
    Terminated,
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    /// The operator typed the quit command.
    Quit,
    /// Operator input reached end of file.
    ConsoleClosed,
    /// The server closed the connection.
    PeerClosed,
    ReceiveFailed(io::Error),
    SendFailed(io::Error),
    /// The server violated line framing.
    Protocol(FrameError),
    /// Waiting for socket readiness failed.
    WaitFailed(io::Error),
    ConsoleFailed(io::Error),
}

impl SessionEnd {
    /// Whether the user should be told why the session ended.
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, SessionEnd::Quit | SessionEnd::ConsoleClosed)
    }
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionEnd::Quit => write!(f, "Quit"),
            SessionEnd::ConsoleClosed => write!(f, "Input closed"),
            SessionEnd::PeerClosed => write!(f, "Disconnected from server"),
            SessionEnd::ReceiveFailed(e) => write!(f, "Connection error: {}", e),
            SessionEnd::SendFailed(e) => write!(f, "Failed to send message: {}", e),
            SessionEnd::Protocol(e) => write!(f, "Protocol error: {}", e),
            SessionEnd::WaitFailed(e) => write!(f, "Wait error: {}", e),
            SessionEnd::ConsoleFailed(e) => write!(f, "Console error: {}", e),
        }
    }
}

enum Event {
    Readable(io::Result<()>),
    Input(io::Result<ConsoleInput>),
    Idle,
}

/// A chat session over one connection.
pub struct Session<R, W> {
    connection: Connection,
    framer: Framer,
    console: Console<R, W>,
    config: SessionConfig,
    read_buf: Vec<u8>,
    state: SessionState,
}

impl<R, W> Session<R, W>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    pub fn new(connection: Connection, console: Console<R, W>, config: SessionConfig) -> Self {
        Self {
            connection,
            framer: Framer::new(config.max_line_bytes),
            console,
            read_buf: vec![0u8; config.read_buffer_size],
            config,
            state: SessionState::Running,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until quit, disconnect or error, then close the connection.
    ///
    /// This is the only place the connection is closed, whichever branch
    /// ended the session.
    pub async fn run(&mut self) -> SessionEnd {
        let end = loop {
            let event = tokio::select! {
                ready = self.connection.readable() => Event::Readable(ready),
                input = self.console.read() => Event::Input(input),
                _ = tokio::time::sleep(self.config.poll_interval()) => Event::Idle,
            };

            let flow = match event {
                Event::Readable(Ok(())) => self.on_readable(),
                Event::Readable(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    ControlFlow::Continue(())
                }
                Event::Readable(Err(e)) => ControlFlow::Break(SessionEnd::WaitFailed(e)),
                Event::Input(Ok(input)) => self.on_input(input).await,
                Event::Input(Err(e)) if e.kind() == io::ErrorKind::Interrupted => {
                    ControlFlow::Continue(())
                }
                Event::Input(Err(e)) => ControlFlow::Break(SessionEnd::ConsoleFailed(e)),
                Event::Idle => ControlFlow::Continue(()),
            };

            if let ControlFlow::Break(end) = flow {
                break end;
            }
        };

        self.state = SessionState::Terminated;
        self.connection.close().await;
        self.report(&end);
        end
    }

    fn on_readable(&mut self) -> ControlFlow<SessionEnd> {
        match self.connection.receive(&mut self.read_buf) {
            Ok(Received::WouldBlock) => ControlFlow::Continue(()),
            Ok(Received::PeerClosed) => ControlFlow::Break(SessionEnd::PeerClosed),
            Ok(Received::Data(n)) => {
                let lines = self.framer.feed(&self.read_buf[..n]);
                debug!(
                    "Received raw data ({} bytes): {} lines, {} bytes pending",
                    n,
                    lines.len(),
                    self.framer.pending()
                );
                if let Err(e) = self.display(&lines) {
                    return ControlFlow::Break(SessionEnd::ConsoleFailed(e));
                }
                match self.framer.ensure_bounded() {
                    Ok(()) => ControlFlow::Continue(()),
                    Err(e) => ControlFlow::Break(SessionEnd::Protocol(e)),
                }
            }
            Err(e) => ControlFlow::Break(SessionEnd::ReceiveFailed(e)),
        }
    }

    fn display(&mut self, lines: &[Line]) -> io::Result<()> {
        if lines.is_empty() {
            return Ok(());
        }
        for line in lines {
            let text = line.text();
            let shown = decode(&text);
            debug!("Parsed message {:?} -> {:?}", text, shown);
            self.console.write_line(shown)?;
        }
        self.console.prompt(&self.config.prompt)
    }

    async fn on_input(&mut self, input: ConsoleInput) -> ControlFlow<SessionEnd> {
        match input {
            ConsoleInput::Quit => {
                // Tell the server, but leave regardless of the outcome.
                let command = encode(self.console.quit_command().as_bytes());
                if let Err(e) = self.connection.send(&command).await {
                    warn!("Failed to send quit to server: {}", e);
                }
                ControlFlow::Break(SessionEnd::Quit)
            }
            ConsoleInput::Closed => ControlFlow::Break(SessionEnd::ConsoleClosed),
            ConsoleInput::Message(line) => match self.connection.send(&encode(&line)).await {
                Ok(n) => {
                    debug!("Sent {} bytes", n);
                    ControlFlow::Continue(())
                }
                Err(e) => ControlFlow::Break(SessionEnd::SendFailed(e)),
            },
        }
    }

    fn report(&mut self, end: &SessionEnd) {
        debug!("Session ended: {} (connection {:?})", end, self.connection.state());
        if end.is_abnormal() {
            if let Err(e) = self.console.write_line(&format!("\n{}", end)) {
                debug!("Could not print session end: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::socket::{connect, ConnectionState};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
    use tokio::net::{TcpListener, TcpStream};

    #[derive(Clone, Default)]
    struct SharedOutput(Arc<Mutex<Vec<u8>>>);

    impl SharedOutput {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    type TestSession = Session<BufReader<DuplexStream>, SharedOutput>;

    struct Harness {
        session: TestSession,
        server: TcpStream,
        operator: DuplexStream,
        output: SharedOutput,
    }

    async fn harness(config: SessionConfig) -> Harness {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (client, accepted) = tokio::join!(
            connect("127.0.0.1", port, Duration::from_secs(5)),
            listener.accept()
        );

        let (console_in, operator) = duplex(256);
        let output = SharedOutput::default();
        let console = Console::new(BufReader::new(console_in), output.clone(), config.quit_command.clone());
        Harness {
            session: Session::new(client.unwrap(), console, config),
            server: accepted.unwrap().0,
            operator,
            output,
        }
    }

    #[tokio::test]
    async fn test_prints_server_message_then_disconnect() {
        let Harness { mut session, mut server, operator: _operator, output } =
            harness(SessionConfig::default()).await;

        server.write_all(b"MSG:hi\n").await.unwrap();
        drop(server);

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::PeerClosed), "{end}");
        assert_eq!(output.contents(), "hi\n>> \nDisconnected from server\n");
        assert_eq!(session.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn test_two_messages_in_one_segment() {
        let Harness { mut session, mut server, operator: _operator, output } =
            harness(SessionConfig::default()).await;

        server.write_all(b"MSG:a\nMSG:b\n").await.unwrap();
        drop(server);

        session.run().await;
        assert_eq!(output.contents(), "a\nb\n>> \nDisconnected from server\n");
    }

    #[tokio::test]
    async fn test_partial_line_across_reads() {
        let Harness { mut session, mut server, operator: _operator, output } =
            harness(SessionConfig::default()).await;

        tokio::spawn(async move {
            server.write_all(b"MSG:par").await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            server.write_all(b"tial\n").await.unwrap();
        });

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::PeerClosed), "{end}");
        assert_eq!(output.contents(), "partial\n>> \nDisconnected from server\n");
    }

    #[tokio::test]
    async fn test_operator_lines_sent_in_order_then_quit() {
        let Harness { mut session, mut server, mut operator, output } =
            harness(SessionConfig::default()).await;

        operator.write_all(b"hello\n/nick bob\n/quit\nnever sent\n").await.unwrap();

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Quit), "{end}");

        let mut received = String::new();
        server.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "hello\n/nick bob\n/quit\n");
        assert_eq!(output.contents(), "");
    }

    #[tokio::test]
    async fn test_non_utf8_input_is_forwarded_raw() {
        let Harness { mut session, mut server, mut operator, .. } =
            harness(SessionConfig::default()).await;

        operator.write_all(b"caf\xe9\nhello\n/quit\n").await.unwrap();

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Quit), "{end}");

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"caf\xe9\nhello\n/quit\n".to_vec());
    }

    #[tokio::test]
    async fn test_console_closed_ends_session() {
        let Harness { mut session, mut server, operator, output } =
            harness(SessionConfig::default()).await;
        drop(operator);

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::ConsoleClosed), "{end}");
        assert!(!end.is_abnormal());

        let mut received = Vec::new();
        server.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
        assert_eq!(output.contents(), "");
    }

    #[tokio::test]
    async fn test_quit_terminates_even_if_send_fails() {
        let Harness { mut session, .. } = harness(SessionConfig::default()).await;
        session.connection.close().await;

        let flow = session.on_input(ConsoleInput::Quit).await;
        assert!(matches!(flow, ControlFlow::Break(SessionEnd::Quit)));
    }

    #[tokio::test]
    async fn test_send_failure_ends_session() {
        let Harness { mut session, .. } = harness(SessionConfig::default()).await;
        session.connection.close().await;

        let flow = session.on_input(ConsoleInput::Message(b"hi".to_vec())).await;
        assert!(matches!(flow, ControlFlow::Break(SessionEnd::SendFailed(_))));
    }

    #[tokio::test]
    async fn test_would_block_changes_nothing() {
        let Harness { mut session, server: _server, operator: _operator, output } =
            harness(SessionConfig::default()).await;

        assert!(session.on_readable().is_continue());
        assert_eq!(session.framer.pending(), 0);
        assert_eq!(session.state(), SessionState::Running);
        assert_eq!(session.connection.state(), ConnectionState::Open);
        assert_eq!(output.contents(), "");
    }

    #[tokio::test]
    async fn test_overlong_line_is_protocol_error() {
        let config = SessionConfig {
            max_line_bytes: 8,
            ..SessionConfig::default()
        };
        let Harness { mut session, mut server, operator: _operator, output } = harness(config).await;

        server.write_all(b"MSG:ok\n0123456789abcdef").await.unwrap();

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::Protocol(_)), "{end}");
        assert!(output.contents().starts_with("ok\n>> \nProtocol error: line too long"));
        assert_eq!(session.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_custom_prompt_and_unprefixed_line() {
        let config = SessionConfig {
            prompt: "$ ".to_string(),
            ..SessionConfig::default()
        };
        let Harness { mut session, mut server, operator: _operator, output } = harness(config).await;

        server.write_all(b"Server notice\n").await.unwrap();
        drop(server);

        session.run().await;
        assert_eq!(output.contents(), "Server notice\n$ \nDisconnected from server\n");
    }

    #[tokio::test]
    async fn test_peer_reset_ends_session() {
        let Harness { mut session, server, operator: _operator, output } =
            harness(SessionConfig::default()).await;

        // Zero linger turns the close into a reset.
        #[allow(deprecated)]
        server.set_linger(Some(Duration::ZERO)).unwrap();
        drop(server);

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::PeerClosed), "{end}");
        assert_eq!(output.contents(), "\nDisconnected from server\n");
        assert_eq!(session.connection.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_receive_error_ends_session() {
        let Harness { mut session, .. } = harness(SessionConfig::default()).await;
        session.connection.close().await;

        let flow = session.on_readable();
        match flow {
            ControlFlow::Break(SessionEnd::ReceiveFailed(e)) => {
                assert_eq!(e.kind(), io::ErrorKind::NotConnected);
            }
            other => panic!("expected receive failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_wait_error_reported_and_session_terminates() {
        let Harness { mut session, operator: _operator, output, .. } =
            harness(SessionConfig::default()).await;
        session.connection.close().await;

        let end = session.run().await;
        assert!(matches!(end, SessionEnd::WaitFailed(_)), "{end}");
        assert!(end.is_abnormal());
        assert_eq!(output.contents(), "\nWait error: connection closed\n");
        assert_eq!(session.state(), SessionState::Terminated);
    }
}
