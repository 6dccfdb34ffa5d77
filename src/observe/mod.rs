//! Operational telemetry
//!
//! Sessions and buffers report through an injected [`TransportObserver`]
//! rather than any process-wide facility; callers that don't care pass
//! [`NoopObserver`]. Background tasks are spawned through
//! [`spawn_traced`] so their log output carries a named span.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// Why a session went away.
#[derive(Debug, Clone)]
pub struct CloseCause {
    pub session_id: u64,
    /// Stream the failure was observed on, when attributable.
    pub stream_id: Option<u32>,
    /// `None` for a deliberate local close.
    pub error: Option<String>,
}

/// Sink for transport events.
///
/// All methods default to no-ops so implementors pick what they need.
pub trait TransportObserver: Send + Sync {
    fn on_frame_sent(&self, _stream_id: u32, _len: usize) {}

    fn on_frame_received(&self, _stream_id: u32, _len: usize) {}

    fn on_session_close(&self, _cause: &CloseCause) {}
}

/// Observer that discards every event.
pub struct NoopObserver;

impl TransportObserver for NoopObserver {}

/// The observer sessions use when none is supplied.
pub fn noop() -> Arc<dyn TransportObserver> {
    Arc::new(NoopObserver)
}

/// Spawn a background task under a named tracing span.
pub fn spawn_traced<F>(name: &'static str, fut: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(fut.instrument(tracing::debug_span!("task", name)))
}
