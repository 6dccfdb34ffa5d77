//! Tunnel layer - multiplexed streams over one encrypted connection
//!
//! Provides:
//! - Frame encoding/decoding
//! - Per-stream credit windows with batched ACKs
//! - Ordered send/receive buffering with graceful RST close
//! - Session reader/writer tasks and the multiplexing dialer

mod dialer;
mod frame;
mod pool;
mod receive_buffer;
mod send_buffer;
mod session;
mod stream;
mod window;

pub use dialer::Dialer;
pub use frame::{FrameType, ACK_FRAME_LEN, CONTROL_HEADER_LEN, DATA_HEADER_LEN};
pub use pool::BufferPool;
pub use session::{Session, SessionRole};
pub use stream::Stream;
pub use window::Window;

pub(crate) use receive_buffer::ReceiveBuffer;
pub(crate) use send_buffer::SendBuffer;

use std::time::Duration;
use thiserror::Error;

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("operation timed out")]
    Timeout,

    #[error("broken pipe: stream is closing")]
    BrokenPipe,

    #[error("closed")]
    Closed,

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] crate::crypto::CryptoError),

    #[error("transport error: {0}")]
    Transport(#[from] crate::transport::TransportError),
}

/// Largest data payload carried by a single frame
pub const MAX_DATA_LEN: usize = 8192;

/// Largest frame on the wire (data header + max payload); also the pool's buffer size
pub const MAX_FRAME_LEN: usize = DATA_HEADER_LEN + MAX_DATA_LEN;

/// Highest stream id usable within one session
pub const MAX_STREAM_ID: u32 = (1 << 24) - 1;

/// Default transmit window, in frames
pub const DEFAULT_WINDOW_SIZE: usize = 25;

/// How long a closing send buffer waits for credits before dropping queued frames
pub(crate) const CLOSE_TIMEOUT: Duration = Duration::from_secs(30);
