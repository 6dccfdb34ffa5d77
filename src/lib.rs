//! # Veilmux
//!
//! A traffic-analysis-resistant transport: many logical byte streams
//! multiplexed over one reliable connection, with every post-handshake
//! byte symmetrically encrypted and each stream flow-controlled by a
//! fixed credit window.
//!
//! ## Features
//!
//! - **Uniform wire image**: after the RSA-OAEP init message, the wire is
//!   one unbroken AES-128-CTR byte stream with no visible framing
//! - **Stream multiplexing** with sequential 24-bit ids and automatic
//!   session rotation on id exhaustion or connection failure
//! - **Credit-window flow control** with batched ACKs
//! - **Graceful close**: buffered frames drain before the RST
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Stream Layer                       │
//! │        (read/write/close, per-call deadlines)        │
//! ├─────────────────────────────────────────────────────┤
//! │                   Buffer Layer                       │
//! │   (send/receive queues, credit windows, ACK batching)│
//! ├─────────────────────────────────────────────────────┤
//! │                   Session Layer                      │
//! │     (framing, cipher pair, reader/writer tasks)      │
//! ├─────────────────────────────────────────────────────┤
//! │                  Transport Layer                     │
//! │          (connector-provided duplex channels)        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod observe;
pub mod transport;
pub mod tunnel;

pub use config::Config;
pub use tunnel::{Dialer, Session, SessionRole, Stream, TunnelError};

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("configuration error: {0}")]
    Config(String),
}
