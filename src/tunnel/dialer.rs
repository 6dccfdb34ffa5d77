//! Stream dialer
//!
//! Multiplexes every dialed stream over a single current session, minting
//! sequential 24-bit stream ids. A fresh session is started when there is
//! none, when the previous one died, or when the id space allowance for
//! one connection is spent.

use super::{BufferPool, Session, SessionRole, Stream, TunnelError};
use crate::config::Config;
use crate::crypto::{self, CipherPair, InitMessage};
use crate::observe::{self, TransportObserver};
use crate::transport::Connector;
use parking_lot::Mutex;
use rsa::RsaPublicKey;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Dials multiplexed streams over rotating sessions.
pub struct Dialer {
    config: Config,
    connector: Box<dyn Connector>,
    server_key: RsaPublicKey,
    pool: Arc<BufferPool>,
    observer: Arc<dyn TransportObserver>,
    /// Serializes `dial`; never held while the slot below is locked alone.
    dial_lock: AsyncMutex<()>,
    current: Arc<Mutex<Option<CurrentSession>>>,
    next_seq: AtomicU64,
}

struct CurrentSession {
    seq: u64,
    session: Arc<Session>,
    next_id: u32,
}

impl Dialer {
    /// Create a dialer encrypting toward `server_key`.
    pub fn new(
        config: Config,
        connector: Box<dyn Connector>,
        server_key: RsaPublicKey,
    ) -> Result<Self, crate::Error> {
        config.validate()?;
        let pool = Arc::new(BufferPool::new(config.pool_capacity));
        Ok(Self {
            config,
            connector,
            server_key,
            pool,
            observer: observe::noop(),
            dial_lock: AsyncMutex::new(()),
            current: Arc::new(Mutex::new(None)),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Attach a telemetry sink.
    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Open a new stream, starting or rotating the session as needed.
    ///
    /// A connector or handshake failure surfaces here; the next dial tries
    /// a fresh session.
    pub async fn dial(&self) -> Result<Stream, TunnelError> {
        // The lock covers only capturing the session and minting the id;
        // stream creation runs unlocked on the captured session.
        let (session, id) = {
            let _serialized = self.dial_lock.lock().await;
            let max_streams = self.config.effective_max_streams();

            let reusable = {
                let mut current = self.current.lock();
                match current.as_mut() {
                    Some(c) if !c.session.is_closed() && c.next_id < max_streams => {
                        let id = c.next_id;
                        c.next_id += 1;
                        Some((Arc::clone(&c.session), id))
                    }
                    _ => None,
                }
            };

            match reusable {
                Some(existing) => existing,
                None => {
                    let session = self.start_session().await?;
                    (session, 0)
                }
            }
        };

        Ok(session.get_or_create_stream(id))
    }

    /// The id of the session currently carrying new streams, if any.
    pub fn current_session_id(&self) -> Option<u64> {
        self.current.lock().as_ref().map(|c| c.session.id())
    }

    async fn start_session(&self) -> Result<Arc<Session>, TunnelError> {
        let conn = self.connector.connect().await?;

        // Each session gets a fresh secret and IV pair.
        let secret = crypto::new_secret();
        let send_iv = crypto::new_iv();
        let recv_iv = crypto::new_iv();

        let init = InitMessage::new(self.config.window_size as u8, secret, send_iv, recv_iv);
        let init_blob = init.seal(&self.server_key)?;
        let ciphers = CipherPair::new(&secret, &send_iv, &recv_iv);

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let slot: Weak<Mutex<Option<CurrentSession>>> = Arc::downgrade(&self.current);
        let on_close = Box::new(move || {
            if let Some(slot) = slot.upgrade() {
                let mut current = slot.lock();
                if current.as_ref().map(|c| c.seq) == Some(seq) {
                    debug!("current session no longer usable, clearing");
                    *current = None;
                }
            }
        });

        let session = Session::start(
            conn,
            SessionRole::Client,
            self.config.window_size,
            ciphers,
            Some(init_blob),
            Arc::clone(&self.pool),
            Arc::clone(&self.observer),
            Some(on_close),
        );

        *self.current.lock() = Some(CurrentSession {
            seq,
            session: Arc::clone(&session),
            next_id: 1,
        });
        debug!(session_id = session.id(), "started session");
        Ok(session)
    }
}
