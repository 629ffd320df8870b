//! Configuration management for linechat.
//!
//! Configuration is loaded from `~/.config/linechat/config.toml`. Command-line
//! arguments override what the file says.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Where to connect.
    #[serde(default)]
    pub server: ServerConfig,
    /// Event loop and console behaviour.
    #[serde(default)]
    pub session: SessionConfig,
}

/// Server endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host name or address (default: localhost).
    #[serde(default = "default_host")]
    pub host: String,
    /// TCP port (default: 5000).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound on resolving plus connecting, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// Settings consumed by the session event loop and console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Bounded wait of one loop iteration, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Bytes requested per receive call.
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
    /// Longest partial line accepted from the server before giving up.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
    /// Marker printed after incoming messages.
    #[serde(default = "default_prompt")]
    pub prompt: String,
    /// Console command that ends the session.
    #[serde(default = "default_quit_command")]
    pub quit_command: String,
    /// Verbose diagnostics.
    #[serde(default)]
    pub debug: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            read_buffer_size: default_read_buffer_size(),
            max_line_bytes: default_max_line_bytes(),
            prompt: default_prompt(),
            quit_command: default_quit_command(),
            debug: false,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_read_buffer_size() -> usize {
    1024
}

fn default_max_line_bytes() -> usize {
    64 * 1024
}

fn default_prompt() -> String {
    ">> ".to_string()
}

fn default_quit_command() -> String {
    "/quit".to_string()
}

impl SessionConfig {
    /// Bounded wait of one loop iteration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Values given on the command line, applied on top of the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub debug: bool,
}

impl Overrides {
    /// Apply the overrides to a loaded configuration.
    pub fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if self.debug {
            config.session.debug = true;
        }
    }
}

impl Config {
    /// Get the config directory path.
    pub fn config_dir() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|p| p.join("linechat"))
            .context("Could not determine config directory")
    }

    /// Get the config file path.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration.
    ///
    /// With an explicit path the file must exist. Without one, the default
    /// location is used if present and defaults otherwise.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config = match explicit {
            Some(path) => Self::load_file(path)?,
            None => match Self::config_path() {
                Ok(path) if path.exists() => Self::load_file(&path)?,
                _ => Self::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Reject settings the event loop cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            bail!("server.host must not be empty");
        }
        if self.session.read_buffer_size == 0 {
            bail!("session.read_buffer_size must be at least 1");
        }
        if self.session.max_line_bytes == 0 {
            bail!("session.max_line_bytes must be at least 1");
        }
        if self.session.poll_interval_ms == 0 {
            bail!("session.poll_interval_ms must be at least 1");
        }
        if self.session.quit_command.is_empty() {
            bail!("session.quit_command must not be empty");
        }
        Ok(())
    }

    /// Connect timeout as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.server.connect_timeout_ms)
    }
}
