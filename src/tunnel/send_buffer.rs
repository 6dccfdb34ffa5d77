//! Outbound frame buffering
//!
//! Each stream owns a send buffer: a window-sized queue drained by a
//! dedicated loop task that acquires one window credit per frame before
//! handing it to the session writer. Closing routes an optional RST
//! through the same loop so it is ordered after all buffered data, with
//! a hard ceiling on how long draining may take.

use super::frame::{self, FrameType, CONTROL_HEADER_LEN};
use super::{TunnelError, Window, CLOSE_TIMEOUT, MAX_DATA_LEN};
use crate::observe::{self, TransportObserver};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::time::Instant;
use tracing::trace;

/// Stand-in for "no deadline armed yet" on the drain timer.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365);

pub(crate) struct SendBuffer {
    shared: Arc<Shared>,
    window: Arc<Window>,
    close_tx: mpsc::Sender<bool>,
    done_rx: watch::Receiver<bool>,
}

/// State the loop's seal task mutates while `send` holds the read side.
struct Shared {
    closing: RwLock<bool>,
    tx: parking_lot::Mutex<Option<mpsc::Sender<Bytes>>>,
}

impl SendBuffer {
    pub(crate) fn new(
        default_header: [u8; CONTROL_HEADER_LEN],
        out: mpsc::Sender<Bytes>,
        window_size: usize,
        observer: Arc<dyn TransportObserver>,
        stream_id: u32,
    ) -> Self {
        let (tx, rx) = mpsc::channel(window_size);
        let (close_tx, close_rx) = mpsc::channel(1);
        let (done_tx, done_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            closing: RwLock::new(false),
            tx: parking_lot::Mutex::new(Some(tx)),
        });
        let window = Arc::new(Window::new(window_size));

        observe::spawn_traced(
            "send-loop",
            send_loop(
                default_header,
                rx,
                close_rx,
                out,
                Arc::clone(&window),
                Arc::clone(&shared),
                done_tx,
                observer,
                stream_id,
            ),
        );

        Self {
            shared,
            window,
            close_tx,
            done_rx,
        }
    }

    /// Queue `payload` for transmission, waiting for queue admission up to
    /// `deadline`. Fails with `BrokenPipe` once the buffer is closing.
    pub(crate) async fn send(
        &self,
        payload: Bytes,
        deadline: Option<Instant>,
    ) -> Result<usize, TunnelError> {
        if payload.len() > MAX_DATA_LEN {
            return Err(TunnelError::Protocol(format!(
                "payload of {} bytes exceeds frame limit",
                payload.len()
            )));
        }
        if payload.is_empty() {
            return Ok(0);
        }

        let closing = self.shared.closing.read().await;
        if *closing {
            return Err(TunnelError::BrokenPipe);
        }
        let tx = match self.shared.tx.lock().clone() {
            Some(tx) => tx,
            None => return Err(TunnelError::BrokenPipe),
        };

        let len = payload.len();
        match deadline {
            None => tx
                .send(payload)
                .await
                .map_err(|_| TunnelError::BrokenPipe)?,
            Some(deadline) => {
                if deadline <= Instant::now() {
                    return Err(TunnelError::Timeout);
                }
                match tokio::time::timeout_at(deadline, tx.send(payload)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => return Err(TunnelError::BrokenPipe),
                    Err(_) => return Err(TunnelError::Timeout),
                }
            }
        }
        Ok(len)
    }

    /// Ask the loop to close, optionally emitting an RST after the drain,
    /// and wait for it to terminate. Idempotent; later calls cannot change
    /// an already-requested RST decision.
    pub(crate) async fn close(&self, send_rst: bool) {
        let _ = self.close_tx.try_send(send_rst);
        let mut done = self.done_rx.clone();
        let _ = done.wait_for(|done| *done).await;
    }

    /// Session-teardown close: releases any parked credit wait so the loop
    /// exits without the drain budget.
    pub(crate) async fn shutdown(&self) {
        self.window.close();
        self.close(false).await;
    }

    /// Apply ACK credit from the peer.
    pub(crate) fn add_credit(&self, frames: usize) {
        self.window.add(frames);
    }
}

#[allow(clippy::too_many_arguments)]
async fn send_loop(
    default_header: [u8; CONTROL_HEADER_LEN],
    mut rx: mpsc::Receiver<Bytes>,
    mut close_rx: mpsc::Receiver<bool>,
    out: mpsc::Sender<Bytes>,
    window: Arc<Window>,
    shared: Arc<Shared>,
    done_tx: watch::Sender<bool>,
    observer: Arc<dyn TransportObserver>,
    stream_id: u32,
) {
    let mut send_rst = false;
    let mut closing = false;
    let drain_deadline = tokio::time::sleep(FAR_FUTURE);
    tokio::pin!(drain_deadline);

    'outer: loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(payload) => {
                    let grant = window.sub(1);
                    tokio::pin!(grant);
                    loop {
                        tokio::select! {
                            granted = grant.as_mut() => {
                                if granted.is_err() {
                                    // Window closed underneath us; the
                                    // frame is undeliverable.
                                    break 'outer;
                                }
                                let frame = match frame::encode_data(&default_header, &payload) {
                                    Ok(frame) => frame.freeze(),
                                    // send() bounds payload sizes already.
                                    Err(_) => break,
                                };
                                let delivered = if closing {
                                    // The drain budget also bounds waiting
                                    // on a backed-up writer.
                                    tokio::select! {
                                        sent = out.send(frame) => sent.is_ok(),
                                        _ = drain_deadline.as_mut() => false,
                                    }
                                } else {
                                    out.send(frame).await.is_ok()
                                };
                                if !delivered {
                                    break 'outer;
                                }
                                observer.on_frame_sent(stream_id, payload.len());
                                break;
                            }
                            requested = close_rx.recv(), if !closing => {
                                send_rst = requested.unwrap_or(false);
                                closing = true;
                                seal(&shared);
                                drain_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                            }
                            _ = drain_deadline.as_mut(), if closing => {
                                trace!(stream_id, "drain budget expired with frames pending");
                                break 'outer;
                            }
                        }
                    }
                }
                // Queue sealed and fully drained.
                None => break,
            },
            requested = close_rx.recv(), if !closing => {
                send_rst = requested.unwrap_or(false);
                closing = true;
                seal(&shared);
                drain_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
            }
            _ = drain_deadline.as_mut(), if closing => break,
        }
    }

    if send_rst {
        let rst = Bytes::copy_from_slice(&frame::encode_control(FrameType::Rst, &default_header));
        if let Err(mpsc::error::TrySendError::Full(rst)) = out.try_send(rst) {
            tokio::select! {
                _ = out.send(rst) => {}
                _ = drain_deadline.as_mut() => {}
            }
        }
    }
    let _ = done_tx.send(true);
}

/// Seal the in-queue from a separate task: the write lock must wait out
/// in-flight `send` calls, and those can only finish while this loop keeps
/// draining.
fn seal(shared: &Arc<Shared>) {
    let shared = Arc::clone(shared);
    tokio::spawn(async move {
        let mut closing = shared.closing.write().await;
        *closing = true;
        shared.tx.lock().take();
    });
}
