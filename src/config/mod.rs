//! Configuration management

use crate::tunnel::{DEFAULT_WINDOW_SIZE, MAX_STREAM_ID};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dialer and session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Transmit window per stream, in frames (1-255)
    pub window_size: usize,
    /// Streams multiplexed over one session before rotating; 0 means the
    /// full 24-bit id space
    pub max_streams_per_session: u32,
    /// Underlying connect timeout in seconds; applied by
    /// [`TcpConnector::from_config`](crate::transport::TcpConnector::from_config)
    pub connect_timeout: u64,
    /// Frame buffers kept in the pool
    pub pool_capacity: usize,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, crate::Error> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), crate::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, content)
            .map_err(|e| crate::Error::Config(format!("Failed to write config: {}", e)))
    }

    /// Check field ranges.
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.window_size == 0 || self.window_size > u8::MAX as usize {
            return Err(crate::Error::Config(format!(
                "window_size must be 1-255, got {}",
                self.window_size
            )));
        }
        Ok(())
    }

    /// Per-session stream allowance after applying the id-space ceiling.
    pub(crate) fn effective_max_streams(&self) -> u32 {
        match self.max_streams_per_session {
            0 => MAX_STREAM_ID + 1,
            n => n.min(MAX_STREAM_ID + 1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_streams_per_session: 0,
            connect_timeout: 30,
            pool_capacity: 64,
        }
    }
}
