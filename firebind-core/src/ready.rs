//! Readiness gate
//!
//! One gate per document or collection. Each fetch or listen cycle marks the
//! gate pending; the first result (or error, or deactivation) settles it.

use parking_lot::Mutex;
use std::future::Future;
use tokio::sync::watch;

#[derive(Debug, Default)]
enum GateState {
    #[default]
    Idle,
    Pending(watch::Sender<bool>),
    Settled,
}

/// Single-resolution readiness signal reused across cycles
#[derive(Debug, Default)]
pub struct ReadyGate {
    state: Mutex<GateState>,
}

impl ReadyGate {
    /// Create an idle gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new pending cycle unless one is already pending
    pub fn mark_not_ready(&self) {
        let mut state = self.state.lock();
        if !matches!(*state, GateState::Pending(_)) {
            let (tx, _rx) = watch::channel(false);
            *state = GateState::Pending(tx);
        }
    }

    /// Settle the pending cycle, if any
    pub fn mark_ready(&self) {
        let mut state = self.state.lock();
        if matches!(*state, GateState::Pending(_)) {
            if let GateState::Pending(tx) = std::mem::replace(&mut *state, GateState::Settled) {
                tx.send_replace(true);
            }
        }
    }

    /// Whether a cycle is pending
    pub fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), GateState::Pending(_))
    }

    /// Future resolving once the current cycle settles
    ///
    /// Resolves immediately when idle or settled.
    pub fn wait(&self) -> impl Future<Output = ()> + Send + 'static {
        let rx = match &*self.state.lock() {
            GateState::Pending(tx) => Some(tx.subscribe()),
            _ => None,
        };
        async move {
            if let Some(mut rx) = rx {
                let _ = rx.wait_for(|ready| *ready).await;
            }
        }
    }
}
