//! TCP connection to the chat server.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tracing::debug;

/// Failures while establishing a connection. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to resolve hostname {host}")]
    Resolve { host: String, source: io::Error },

    #[error("Hostname {host} did not resolve to any address")]
    NoAddresses { host: String },

    #[error("Failed to connect to {host}:{port}")]
    Connect {
        host: String,
        port: u16,
        source: io::Error,
    },

    #[error("Timed out connecting to {host}:{port} after {timeout:?}")]
    Timeout {
        host: String,
        port: u16,
        timeout: Duration,
    },

    #[error("Failed to configure socket")]
    Configure(#[source] io::Error),
}

/// Outcome of a single receive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Received {
    /// This many bytes were written to the front of the buffer.
    Data(usize),
    /// Nothing available right now.
    WouldBlock,
    /// The server closed or reset the connection.
    PeerClosed,
}

/// Lifecycle of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Closed,
}

/// The single connection to the server.
#[derive(Debug)]
pub struct Connection {
    stream: Option<TcpStream>,
    peer: SocketAddr,
}

/// Resolve `host` and connect to the first address that accepts.
///
/// The whole attempt, resolution included, is bounded by `timeout`.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<Connection, ConnectError> {
    let attempt = async {
        let addrs = resolve(host, port).await?;
        open(host, port, &addrs).await
    };

    let stream = tokio::time::timeout(timeout, attempt)
        .await
        .map_err(|_| ConnectError::Timeout {
            host: host.to_string(),
            port,
            timeout,
        })??;

    Connection::from_stream(stream)
}

async fn resolve(host: &str, port: u16) -> Result<Vec<SocketAddr>, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|source| ConnectError::Resolve {
            host: host.to_string(),
            source,
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::NoAddresses {
            host: host.to_string(),
        });
    }
    debug!("Resolved {} to {:?}", host, addrs);
    Ok(addrs)
}

async fn open(host: &str, port: u16, addrs: &[SocketAddr]) -> Result<TcpStream, ConnectError> {
    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("Connect to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    Err(ConnectError::Connect {
        host: host.to_string(),
        port,
        source: last_error
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address to try")),
    })
}

impl Connection {
    /// Take ownership of a connected stream and prepare it for the event loop.
    ///
    /// Tokio registers the socket non-blocking when it is created; what is left
    /// is disabling Nagle so short lines go out as soon as they are typed.
    pub fn from_stream(stream: TcpStream) -> Result<Self, ConnectError> {
        stream.set_nodelay(true).map_err(ConnectError::Configure)?;
        let peer = stream.peer_addr().map_err(ConnectError::Configure)?;
        Ok(Self {
            stream: Some(stream),
            peer,
        })
    }

    /// Address of the server.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        if self.stream.is_some() {
            ConnectionState::Open
        } else {
            ConnectionState::Closed
        }
    }

    fn stream(&self) -> io::Result<&TcpStream> {
        self.stream
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))
    }

    /// Wait until the socket may have data.
    ///
    /// Readiness can be spurious; the following [`receive`](Self::receive)
    /// reports [`Received::WouldBlock`] in that case. Cancel-safe.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream()?.readable().await
    }

    /// Read whatever is available without waiting.
    pub fn receive(&self, buf: &mut [u8]) -> io::Result<Received> {
        match self.stream()?.try_read(buf) {
            Ok(0) => Ok(Received::PeerClosed),
            Ok(n) => Ok(Received::Data(n)),
            Err(e) => match e.kind() {
                io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted => Ok(Received::WouldBlock),
                io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                    Ok(Received::PeerClosed)
                }
                _ => Err(e),
            },
        }
    }

    /// Write all of `bytes`, continuing after partial writes.
    pub async fn send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        stream.write_all(bytes).await?;
        Ok(bytes.len())
    }

    /// Shut down and release the socket. Later calls do nothing.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.peer, e);
            }
            debug!("Connection to {} closed", self.peer);
        }
    }
}
