//! Transport layer
//!
//! Sessions run over any reliable duplex byte channel. The [`Connector`]
//! trait produces such channels on demand; the dialer asks it for a fresh
//! one whenever it rotates sessions.

mod tcp;

pub use tcp::TcpConnector;

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("connection closed")]
    Closed,

    #[error("timeout")]
    Timeout,
}

/// A reliable full-duplex byte channel carrying one session.
pub trait Connection: AsyncRead + AsyncWrite + Send + Unpin {
    /// Local endpoint, when the channel has one.
    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    /// Remote endpoint, when the channel has one.
    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }
}

/// Producer of duplex channels for new sessions.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a fresh underlying channel.
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError>;
}

impl Connection for tokio::net::TcpStream {
    fn local_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::local_addr(self).ok()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        tokio::net::TcpStream::peer_addr(self).ok()
    }
}

// In-memory channels back the loopback tests.
impl Connection for tokio::io::DuplexStream {}
