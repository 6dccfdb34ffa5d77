//! Inbound frame buffering
//!
//! Queues frames the session reader dispatches to a stream and hands the
//! bytes to the reader in order. Fully consumed frames are counted and
//! acknowledged in batches of ack-interval frames so the sender's window
//! refills without doubling the frame rate.

use super::frame::{self, CONTROL_HEADER_LEN};
use super::{BufferPool, TunnelError};
use bytes::{Bytes, BytesMut};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;

pub(crate) struct ReceiveBuffer {
    shared: Arc<Shared>,
    state: Mutex<ReadState>,
    default_header: [u8; CONTROL_HEADER_LEN],
    ack_interval: usize,
    ack_tx: mpsc::Sender<Bytes>,
    pool: Arc<BufferPool>,
}

struct Shared {
    closed: RwLock<bool>,
    tx: parking_lot::Mutex<Option<mpsc::Sender<BytesMut>>>,
}

struct ReadState {
    rx: mpsc::Receiver<BytesMut>,
    current: BytesMut,
    offset: usize,
    unacked: usize,
}

impl ReceiveBuffer {
    pub(crate) fn new(
        default_header: [u8; CONTROL_HEADER_LEN],
        ack_tx: mpsc::Sender<Bytes>,
        pool: Arc<BufferPool>,
        window_size: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(window_size);
        Self {
            shared: Arc::new(Shared {
                closed: RwLock::new(false),
                tx: parking_lot::Mutex::new(Some(tx)),
            }),
            state: Mutex::new(ReadState {
                rx,
                current: BytesMut::new(),
                offset: 0,
                unacked: 0,
            }),
            default_header,
            ack_interval: window_size.div_ceil(10),
            ack_tx,
            pool,
        }
    }

    /// Queue an inbound payload. Discarded (and returned to the pool) once
    /// the buffer is closed.
    pub(crate) async fn submit(&self, payload: BytesMut) {
        let closed = self.shared.closed.read().await;
        if *closed {
            self.pool.put(payload);
            return;
        }
        let tx = self.shared.tx.lock().clone();
        match tx {
            Some(tx) => {
                if let Err(unsent) = tx.send(payload).await {
                    self.pool.put(unsent.0);
                }
            }
            None => self.pool.put(payload),
        }
    }

    /// Copy queued bytes into `dest` in arrival order.
    ///
    /// Returns as soon as at least one byte has been delivered and nothing
    /// more is immediately available; with nothing delivered it waits up to
    /// `deadline`. End of stream reads as `Ok(0)`.
    pub(crate) async fn read(
        &self,
        dest: &mut [u8],
        deadline: Option<Instant>,
    ) -> Result<usize, TunnelError> {
        if dest.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.lock().await;
        let mut total = 0;
        let result = loop {
            let available = state.current.len() - state.offset;
            if available > 0 {
                let n = available.min(dest.len() - total);
                let start = state.offset;
                dest[total..total + n].copy_from_slice(&state.current[start..start + n]);
                state.offset += n;
                total += n;
                if total == dest.len() {
                    break Ok(());
                }
            }

            match state.rx.try_recv() {
                Ok(payload) => {
                    self.advance(&mut state, payload);
                }
                Err(mpsc::error::TryRecvError::Empty) => {
                    if total > 0 {
                        break Ok(());
                    }
                    match self.wait_for_frame(&mut state, deadline).await {
                        Ok(true) => {}
                        // End of stream.
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break Ok(()),
            }
        };

        if state.unacked >= self.ack_interval {
            let ack = frame::encode_ack(&self.default_header, state.unacked as u16);
            if self.ack_tx.send(Bytes::copy_from_slice(&ack)).await.is_ok() {
                state.unacked = 0;
            }
        }
        result.map(|_| total)
    }

    async fn wait_for_frame(
        &self,
        state: &mut ReadState,
        deadline: Option<Instant>,
    ) -> Result<bool, TunnelError> {
        let received = match deadline {
            None => state.rx.recv().await,
            Some(deadline) => {
                if deadline <= Instant::now() {
                    return Err(TunnelError::Timeout);
                }
                match tokio::time::timeout_at(deadline, state.rx.recv()).await {
                    Ok(received) => received,
                    Err(_) => return Err(TunnelError::Timeout),
                }
            }
        };
        match received {
            Some(payload) => {
                self.advance(state, payload);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replace the drained current payload, returning it to the pool and
    /// counting it toward the next ACK.
    fn advance(&self, state: &mut ReadState, payload: BytesMut) {
        let drained = std::mem::replace(&mut state.current, payload);
        if drained.capacity() > 0 {
            self.pool.put(drained);
        }
        state.offset = 0;
        state.unacked += 1;
    }

    /// Seal the queue; already-queued frames remain readable, after which
    /// reads return end of stream. Idempotent.
    pub(crate) async fn close(&self) {
        {
            let mut closed = self.shared.closed.write().await;
            if *closed {
                return;
            }
            *closed = true;
            self.shared.tx.lock().take();
        }
        // Best effort: hand the held payload back. A read in flight owns
        // the state lock and will drop its buffers on its own.
        if let Ok(mut state) = self.state.try_lock() {
            let held = std::mem::take(&mut state.current);
            if held.capacity() > 0 {
                self.pool.put(held);
            }
            state.offset = 0;
        }
    }
}
