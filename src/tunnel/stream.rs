//! Multiplexed stream handle
//!
//! Glues one send buffer and one receive buffer to the user-facing byte
//! stream contract. Handles are cheap clones sharing the same buffers.

use super::{ReceiveBuffer, SendBuffer, TunnelError, MAX_DATA_LEN};
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Instant;

/// A bidirectional byte stream multiplexed inside a session.
#[derive(Clone)]
pub struct Stream {
    id: u32,
    send: Arc<SendBuffer>,
    recv: Arc<ReceiveBuffer>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Stream {
    pub(crate) fn new(
        id: u32,
        send: Arc<SendBuffer>,
        recv: Arc<ReceiveBuffer>,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
    ) -> Self {
        Self {
            id,
            send,
            recv,
            local_addr,
            peer_addr,
        }
    }

    /// The stream's 24-bit identifier within its session.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Read available bytes into `buf`, waiting up to `deadline` when
    /// nothing is queued. `Ok(0)` on a non-empty `buf` means end of stream.
    pub async fn read(
        &self,
        buf: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, TunnelError> {
        self.recv.read(buf, deadline).await
    }

    /// Write `buf`, splitting it into frame-sized chunks. The same
    /// `deadline` bounds each chunk's queue admission.
    pub async fn write(
        &self,
        buf: &[u8],
        deadline: Option<Instant>,
    ) -> Result<usize, TunnelError> {
        let mut written = 0;
        for chunk in buf.chunks(MAX_DATA_LEN) {
            written += self
                .send
                .send(Bytes::copy_from_slice(chunk), deadline)
                .await?;
        }
        Ok(written)
    }

    /// Close the stream: buffered frames drain, an RST follows them, and
    /// the receive side seals. Idempotent.
    pub async fn close(&self) {
        self.send.close(true).await;
        self.recv.close().await;
    }

    /// Local endpoint of the underlying connection, when it has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Remote endpoint of the underlying connection, when it has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub(crate) fn send_buffer(&self) -> &SendBuffer {
        &self.send
    }

    pub(crate) fn receive_buffer(&self) -> &ReceiveBuffer {
        &self.recv
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream").field("id", &self.id).finish()
    }
}
