//! Session: one physical connection, its ciphers, and its streams
//!
//! A session owns the underlying duplex channel through two tasks: a
//! writer that merges outbound stream frames and ACKs into coalesced,
//! encrypted writes, and a reader that decrypts, parses and dispatches
//! inbound frames. After the cleartext init blob, the wire carries nothing
//! but the two CTR keystreams - no observable framing.

use super::frame::{self, FrameType, CONTROL_HEADER_LEN};
use super::{BufferPool, ReceiveBuffer, SendBuffer, Stream, MAX_STREAM_ID};
use crate::crypto::{CipherPair, CtrCipher};
use crate::observe::{self, CloseCause, TransportObserver};
use crate::transport::Connection;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, watch};
use tracing::{debug, trace};

/// Upper bound on one coalesced write.
const MAX_WRITE_BATCH: usize = 64 * 1024;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Which side of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Initiates streams; frames for unknown stream ids are discarded.
    Client,
    /// Accepts streams; unknown stream ids surface on the accept channel.
    Server,
}

/// One multiplexed connection.
pub struct Session {
    id: u64,
    role: SessionRole,
    window_size: usize,
    streams: Mutex<HashMap<u32, Stream>>,
    out_tx: mpsc::Sender<Bytes>,
    ack_tx: mpsc::Sender<Bytes>,
    pool: Arc<BufferPool>,
    observer: Arc<dyn TransportObserver>,
    closed: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    on_close: Mutex<Option<Box<dyn FnOnce() + Send>>>,
    accept_tx: Mutex<Option<mpsc::UnboundedSender<Stream>>>,
    accept_rx: Mutex<Option<mpsc::UnboundedReceiver<Stream>>>,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
}

impl Session {
    /// Take ownership of `conn` and start the reader and writer tasks.
    ///
    /// `init_msg` is the already-sealed client init blob; when present the
    /// writer emits it, in the clear, before any encrypted byte.
    #[allow(clippy::too_many_arguments)]
    pub fn start(
        conn: Box<dyn Connection>,
        role: SessionRole,
        window_size: usize,
        ciphers: CipherPair,
        init_msg: Option<Vec<u8>>,
        pool: Arc<BufferPool>,
        observer: Arc<dyn TransportObserver>,
        on_close: Option<Box<dyn FnOnce() + Send>>,
    ) -> Arc<Self> {
        let local_addr = conn.local_addr();
        let peer_addr = conn.peer_addr();
        let (read_half, write_half) = tokio::io::split(conn);

        let (out_tx, out_rx) = mpsc::channel(window_size.max(1) * 2);
        let (ack_tx, ack_rx) = mpsc::channel(window_size.max(1) * 2);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (accept_tx, accept_rx) = match role {
            SessionRole::Server => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Some(tx), Some(rx))
            }
            SessionRole::Client => (None, None),
        };

        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            role,
            window_size,
            streams: Mutex::new(HashMap::new()),
            out_tx,
            ack_tx,
            pool,
            observer,
            closed: AtomicBool::new(false),
            shutdown_tx,
            on_close: Mutex::new(on_close),
            accept_tx: Mutex::new(accept_tx),
            accept_rx: Mutex::new(accept_rx),
            local_addr,
            peer_addr,
        });

        observe::spawn_traced(
            "session-writer",
            write_loop(
                write_half,
                ciphers.send,
                init_msg,
                out_rx,
                ack_rx,
                shutdown_rx.clone(),
                Arc::clone(&session),
            ),
        );
        observe::spawn_traced(
            "session-reader",
            read_loop(read_half, ciphers.recv, shutdown_rx, Arc::clone(&session)),
        );

        session
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Get the stream registered under `id`, creating it on first use.
    pub fn get_or_create_stream(&self, id: u32) -> Stream {
        self.get_or_create_stream_inner(id).0
    }

    fn get_or_create_stream_inner(&self, id: u32) -> (Stream, bool) {
        debug_assert!(id <= MAX_STREAM_ID);
        let mut streams = self.streams.lock();
        if let Some(existing) = streams.get(&id) {
            return (existing.clone(), false);
        }
        let header = frame::default_header(id);
        let send = Arc::new(SendBuffer::new(
            header,
            self.out_tx.clone(),
            self.window_size,
            Arc::clone(&self.observer),
            id,
        ));
        let recv = Arc::new(ReceiveBuffer::new(
            header,
            self.ack_tx.clone(),
            Arc::clone(&self.pool),
            self.window_size,
        ));
        let stream = Stream::new(id, send, recv, self.local_addr, self.peer_addr);
        streams.insert(id, stream.clone());
        (stream, true)
    }

    fn lookup_stream(&self, id: u32) -> Option<Stream> {
        self.streams.lock().get(&id).cloned()
    }

    fn remove_stream(&self, id: u32) {
        self.streams.lock().remove(&id);
    }

    /// Receiver of peer-initiated streams (server role). Yields `None`
    /// once the session closes; returns `None` itself on later calls.
    pub fn take_incoming(&self) -> Option<mpsc::UnboundedReceiver<Stream>> {
        self.accept_rx.lock().take()
    }

    /// Close the session deliberately.
    pub async fn close(&self) {
        self.shutdown(None, None).await;
    }

    /// Idempotent teardown: notify the dialer, stop both tasks, seal every
    /// stream so in-flight reads drain to end of stream.
    pub(crate) async fn shutdown(&self, stream_id: Option<u32>, error: Option<String>) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(session_id = self.id, ?error, "session closing");

        if let Some(callback) = self.on_close.lock().take() {
            callback();
        }
        let _ = self.shutdown_tx.send(true);
        self.accept_tx.lock().take();

        let streams: Vec<Stream> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in &streams {
            stream.send_buffer().shutdown().await;
            stream.receive_buffer().close().await;
        }

        self.observer.on_session_close(&CloseCause {
            session_id: self.id,
            stream_id,
            error,
        });
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Merge stream frames and ACKs into encrypted, coalesced writes.
async fn write_loop(
    mut writer: WriteHalf<Box<dyn Connection>>,
    mut cipher: CtrCipher,
    init_msg: Option<Vec<u8>>,
    mut out_rx: mpsc::Receiver<Bytes>,
    mut ack_rx: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
    session: Arc<Session>,
) {
    if let Some(init) = init_msg {
        if let Err(e) = writer.write_all(&init).await {
            // Dropping the receivers first fails any send loop parked on a
            // full channel, so teardown cannot wait on it.
            drop(out_rx);
            drop(ack_rx);
            session.shutdown(None, Some(e.to_string())).await;
            return;
        }
    }

    loop {
        if *shutdown.borrow() {
            return;
        }
        let first = tokio::select! {
            _ = shutdown.changed() => return,
            frame = out_rx.recv() => frame,
            ack = ack_rx.recv() => ack,
        };
        let Some(first) = first else { return };

        let mut batch = BytesMut::with_capacity(first.len());
        batch.extend_from_slice(&first);
        while batch.len() < MAX_WRITE_BATCH {
            if let Ok(frame) = out_rx.try_recv() {
                batch.extend_from_slice(&frame);
                continue;
            }
            if let Ok(ack) = ack_rx.try_recv() {
                batch.extend_from_slice(&ack);
                continue;
            }
            break;
        }

        cipher.apply(&mut batch);
        let written = writer.write_all(&batch).await;
        let flushed = match written {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = flushed {
            drop(out_rx);
            drop(ack_rx);
            session.shutdown(None, Some(e.to_string())).await;
            return;
        }
        trace!(bytes = batch.len(), "flushed coalesced write");
    }
}

/// Decrypt, parse and dispatch inbound frames until error or shutdown.
async fn read_loop(
    mut reader: ReadHalf<Box<dyn Connection>>,
    mut cipher: CtrCipher,
    mut shutdown: watch::Receiver<bool>,
    session: Arc<Session>,
) {
    let failure = loop {
        if *shutdown.borrow() {
            return;
        }
        let mut header = [0u8; CONTROL_HEADER_LEN];
        tokio::select! {
            _ = shutdown.changed() => return,
            read = reader.read_exact(&mut header) => {
                if let Err(e) = read {
                    break (None, e.to_string());
                }
            }
        }
        cipher.apply(&mut header);

        let (frame_type, stream_id) = match frame::decode_header(&header) {
            Ok(decoded) => decoded,
            Err(e) => break (None, e.to_string()),
        };

        match frame_type {
            FrameType::Data => {
                let mut tail = [0u8; 2];
                if let Err(e) = reader.read_exact(&mut tail).await {
                    break (Some(stream_id), e.to_string());
                }
                cipher.apply(&mut tail);
                let len = match frame::decode_data_len(&tail) {
                    Ok(len) => len,
                    Err(e) => break (Some(stream_id), e.to_string()),
                };

                let mut payload = session.pool.get();
                payload.resize(len, 0);
                if let Err(e) = reader.read_exact(&mut payload).await {
                    break (Some(stream_id), e.to_string());
                }
                cipher.apply(&mut payload);
                session.observer.on_frame_received(stream_id, len);

                let target = match session.role {
                    SessionRole::Client => session.lookup_stream(stream_id),
                    SessionRole::Server => {
                        let (stream, created) = session.get_or_create_stream_inner(stream_id);
                        if created {
                            let accept = session.accept_tx.lock().clone();
                            if let Some(accept) = accept {
                                let _ = accept.send(stream.clone());
                            }
                        }
                        Some(stream)
                    }
                };
                match target {
                    Some(stream) => {
                        // Racing shutdown keeps a full receive queue from
                        // wedging session teardown.
                        tokio::select! {
                            _ = shutdown.changed() => return,
                            _ = stream.receive_buffer().submit(payload) => {}
                        }
                    }
                    None => {
                        trace!(stream_id, "discarding frame for unknown stream");
                        session.pool.put(payload);
                    }
                }
            }
            FrameType::Ack => {
                let mut tail = [0u8; 2];
                if let Err(e) = reader.read_exact(&mut tail).await {
                    break (Some(stream_id), e.to_string());
                }
                cipher.apply(&mut tail);
                let count = match frame::decode_ack_count(&tail) {
                    Ok(count) => count,
                    Err(e) => break (Some(stream_id), e.to_string()),
                };
                if let Some(stream) = session.lookup_stream(stream_id) {
                    stream.send_buffer().add_credit(count);
                }
            }
            FrameType::Rst => {
                if let Some(stream) = session.lookup_stream(stream_id) {
                    trace!(stream_id, "peer reset stream");
                    stream.receive_buffer().close().await;
                    stream.send_buffer().shutdown().await;
                    session.remove_stream(stream_id);
                }
            }
        }
    };

    let (stream_id, error) = failure;
    session.shutdown(stream_id, Some(error)).await;
}
