//! Cooperative cancellation shared across every task spawned for one
//! pipeline, mirroring the teacher's `AppState::shutdown: AtomicBool` idiom
//! generalized from "one flag checked by HTTP handlers" to "one token
//! checked between items by every pipeline stage".

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// A cancellation token. Cloning shares the same underlying flag.
#[derive(Clone)]
pub struct Cancel {
    stopped: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancel {
    pub fn new() -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request every task sharing this token to stop between items.
    ///
    /// In-flight codec calls are never interrupted — the check happens
    /// between items, so no partial packet is ever written.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Resolve once `stop()` has been called, for a task that wants to race
    /// cancellation against other async work (e.g. `tokio::select!`).
    pub async fn cancelled(&self) {
        if self.is_stopped() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for Cancel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unstopped() {
        let cancel = Cancel::new();
        assert!(!cancel.is_stopped());
    }

    #[test]
    fn stop_is_observed_by_clones() {
        let cancel = Cancel::new();
        let clone = cancel.clone();
        cancel.stop();
        assert!(clone.is_stopped());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_once_stopped() {
        let cancel = Cancel::new();
        cancel.stop();
        cancel.cancelled().await;
    }
}
