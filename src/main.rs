//! linechat - a minimal line-oriented terminal chat client.
//!
//! Connects to a chat server over TCP, prints what the server sends and
//! forwards what the operator types, one line at a time. Socket and keyboard
//! are multiplexed on a single task.

mod client;
mod config;
mod protocol;

use anyhow::{Context, Result};
use clap::Parser;
use client::{Session, SessionEnd};
use config::{Config, Overrides};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

/// Exit status for anything that fails before the session starts.
const STARTUP_FAILURE: u8 = 20;

#[derive(Parser, Debug)]
#[command(name = "linechat")]
#[command(author, version, about = "A minimal line-oriented terminal chat client")]
#[command(long_about = "Connects to a line-based chat server and relays messages.\n\nType a line to send it, /quit to leave. Other /commands are passed to the server.")]
struct Cli {
    /// Server host name or address [default: localhost]
    #[arg(value_name = "HOST")]
    host: Option<String>,

    /// Server port [default: 5000]
    #[arg(value_name = "PORT")]
    port: Option<u16>,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

impl Cli {
    /// Load the configuration file and apply command-line overrides.
    fn resolve_config(self) -> Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;
        Overrides {
            host: self.host,
            port: self.port,
            debug: self.debug,
        }
        .apply(&mut config);
        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version land here too, with a zero exit code.
            let _ = e.print();
            return if e.exit_code() == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(STARTUP_FAILURE)
            };
        }
    };

    match start(cli) {
        Ok(end) => {
            debug!("Exiting after: {}", end);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(STARTUP_FAILURE)
        }
    }
}

/// Set up logging and the runtime, then run one session.
fn start(cli: Cli) -> Result<SessionEnd> {
    let config = cli.resolve_config()?;
    init_logging(config.session.debug)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let result = runtime.block_on(run(config));

    // A stdin read may still be parked on the blocking pool; waiting for it
    // would hold the exit until the operator presses Enter.
    runtime.shutdown_background();
    result
}

/// Initialize logging. `--debug` raises the level for this crate.
fn init_logging(debug: bool) -> Result<()> {
    let level = if debug { "linechat=debug" } else { "linechat=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.parse()?))
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_target(false)
        .init();
    Ok(())
}

/// Connect and drive the session until it ends.
async fn run(config: Config) -> Result<SessionEnd> {
    let host = config.server.host.clone();
    let port = config.server.port;
    debug!("Starting client with host={}, port={}", host, port);

    let connection = client::connect(&host, port, config.connect_timeout()).await?;
    debug!("Connected to {}", connection.peer_addr());

    let mut console = client::console::stdio(config.session.quit_command.clone());
    console
        .write_line(&format!("Connected to {}:{}! Type /help for commands", host, port))
        .context("Failed to write to the terminal")?;

    let mut session = Session::new(connection, console, config.session);
    let end = session.run().await;
    debug!("Session {:?}", session.state());
    Ok(end)
}
