//! TCP connector

use super::{Connection, Connector, TransportError};
use crate::config::Config;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;

/// Opens TCP connections to a fixed remote address.
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `addr` with the default 30 second timeout.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Override the connect timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Create a connector for `addr` using the timeout from `config`.
    pub fn from_config(addr: impl Into<String>, config: &Config) -> Self {
        Self::new(addr).with_timeout(Duration::from_secs(config.connect_timeout))
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<Box<dyn Connection>, TransportError> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(TransportError::Io)?;

        stream.set_nodelay(true).ok();

        Ok(Box::new(stream))
    }
}
