//! Credit window for per-stream flow control
//!
//! A counting semaphore over a signed credit value. Deductions are applied
//! eagerly; a deduction that pushes the credit negative parks its caller
//! until enough ACK credit arrives. Waiters are released in FIFO order.

use super::TunnelError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Signed-credit counting semaphore, capped at its initial size.
pub struct Window {
    state: Mutex<State>,
    cap: i64,
}

struct State {
    credit: i64,
    closed: bool,
    waiters: VecDeque<oneshot::Sender<()>>,
}

/// Pending credit grant returned by [`Window::sub`].
///
/// Resolves once the deduction is covered by available credit, or with
/// [`TunnelError::Closed`] if the window is closed first.
pub struct WindowGrant(GrantState);

enum GrantState {
    Ready(Result<(), TunnelError>),
    Pending(oneshot::Receiver<()>),
}

impl Window {
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(State {
                credit: size as i64,
                closed: false,
                waiters: VecDeque::new(),
            }),
            cap: size as i64,
        }
    }

    /// Deduct `n` credits, returning a grant that resolves once covered.
    pub fn sub(&self, n: usize) -> WindowGrant {
        let mut state = self.state.lock();
        if state.closed {
            return WindowGrant(GrantState::Ready(Err(TunnelError::Closed)));
        }
        state.credit -= n as i64;
        if state.credit >= 0 && state.waiters.is_empty() {
            return WindowGrant(GrantState::Ready(Ok(())));
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        WindowGrant(GrantState::Pending(rx))
    }

    /// Add `n` credits, waking parked deductions in FIFO order while the
    /// credit remains non-negative.
    pub fn add(&self, n: usize) {
        let mut state = self.state.lock();
        state.credit = (state.credit + n as i64).min(self.cap);
        while state.credit >= 0 {
            match state.waiters.pop_front() {
                // A dropped receiver just discards its grant.
                Some(waiter) => {
                    let _ = waiter.send(());
                }
                None => break,
            }
        }
    }

    /// Release every parked deduction with a closed error.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.waiters.clear();
    }

    #[cfg(test)]
    fn credit(&self) -> i64 {
        self.state.lock().credit
    }
}

impl Future for WindowGrant {
    type Output = Result<(), TunnelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.0 {
            GrantState::Ready(res) => {
                Poll::Ready(std::mem::replace(res, Err(TunnelError::Closed)))
            }
            GrantState::Pending(rx) => {
                Pin::new(rx).poll(cx).map(|res| res.map_err(|_| TunnelError::Closed))
            }
        }
    }
}
