//! A bounded async queue used to hand packets/frames between pipeline stages
//! running as independent tasks.
//!
//! Unlike `tokio::sync::mpsc`, closing is explicit and carries an optional
//! error, matching the "close / close_with_error" semantics a muxer or
//! decoder needs to propagate a fatal upstream failure to a downstream
//! consumer without that consumer ever seeing a silently-truncated stream.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::error::{PipelineError, Result};

#[derive(Debug)]
enum CloseReason {
    Clean,
    Error(String),
}

struct Inner<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    closed: Mutex<Option<CloseReason>>,
    not_empty: Notify,
    not_full: Notify,
}

/// The sending half of a bounded queue.
pub struct Sender<T> {
    inner: Arc<Inner<T>>,
}

/// The receiving half of a bounded queue.
pub struct Receiver<T> {
    inner: Arc<Inner<T>>,
}

/// Create a bounded queue with room for `capacity` items before `send`
/// blocks waiting for the receiver to catch up.
///
/// `capacity` must be at least 1.
pub fn bounded<T: Send>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    assert!(capacity > 0, "bounded queue capacity must be >= 1");
    let inner = Arc::new(Inner {
        items: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        closed: Mutex::new(None),
        not_empty: Notify::new(),
        not_full: Notify::new(),
    });
    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

impl<T: Send> Sender<T> {
    /// Push an item onto the queue, waiting asynchronously if it is full.
    ///
    /// Returns [`PipelineError::QueueClosed`] if the queue was closed (by
    /// either end) before or while waiting.
    pub async fn send(&self, item: T) -> Result<()> {
        loop {
            {
                let mut items = self.inner.items.lock();
                if self.inner.closed.lock().is_some() {
                    return Err(PipelineError::QueueClosed);
                }
                if items.len() < self.inner.capacity {
                    items.push_back(item);
                    self.inner.not_empty.notify_one();
                    return Ok(());
                }
            }
            self.inner.not_full.notified().await;
        }
    }

    /// Blocking counterpart of [`Sender::send`] for callers on a non-async
    /// thread (e.g. inside `spawn_blocking`).
    pub fn send_blocking(&self, item: T) -> Result<()> {
        tokio::runtime::Handle::current().block_on(self.send(item))
    }

    /// Close the queue cleanly. Any items already buffered remain available
    /// to the receiver; subsequent `send` calls fail.
    pub fn close(&self) {
        let mut closed = self.inner.closed.lock();
        if closed.is_none() {
            *closed = Some(CloseReason::Clean);
        }
        drop(closed);
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }

    /// Close the queue with an associated error. The receiver will see this
    /// error (wrapped) once it has drained any buffered items.
    pub fn close_with_error(&self, err: PipelineError) {
        let mut closed = self.inner.closed.lock();
        if closed.is_none() {
            *closed = Some(CloseReason::Error(err.to_string()));
        }
        drop(closed);
        self.inner.not_empty.notify_waiters();
        self.inner.not_full.notify_waiters();
    }
}

impl<T: Send> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> Receiver<T> {
    /// Pop the next item, waiting asynchronously if the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue has been closed cleanly and
    /// drained. Returns `Err` if the queue was closed with an error (again,
    /// only after all buffered items have been drained).
    pub async fn receive(&self) -> Result<Option<T>> {
        loop {
            {
                let mut items = self.inner.items.lock();
                if let Some(item) = items.pop_front() {
                    self.inner.not_full.notify_one();
                    return Ok(Some(item));
                }
                match &*self.inner.closed.lock() {
                    Some(CloseReason::Clean) => return Ok(None),
                    Some(CloseReason::Error(msg)) => {
                        return Err(PipelineError::ProtocolState(format!(
                            "upstream closed with error: {}",
                            msg
                        )))
                    }
                    None => {}
                }
            }
            self.inner.not_empty.notified().await;
        }
    }

    /// Blocking counterpart of [`Receiver::receive`].
    pub fn receive_blocking(&self) -> Result<Option<T>> {
        tokio::runtime::Handle::current().block_on(self.receive())
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.inner.items.lock().len()
    }

    /// `true` if no items are buffered.
    pub fn is_empty(&self) -> bool {
        self.inner.items.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_then_receive_in_order() {
        let (tx, rx) = bounded::<u32>(4);
        tx.send(1).await.unwrap();
        tx.send(2).await.unwrap();
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        assert_eq!(rx.receive().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let (tx, rx) = bounded::<u32>(4);
        tx.send(1).await.unwrap();
        tx.close();
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        assert_eq!(rx.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_with_error_surfaces_after_drain() {
        let (tx, rx) = bounded::<u32>(4);
        tx.send(1).await.unwrap();
        tx.close_with_error(PipelineError::Muxing("boom".into()));
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        assert!(rx.receive().await.is_err());
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (tx, _rx) = bounded::<u32>(4);
        tx.close();
        assert!(matches!(tx.send(1).await, Err(PipelineError::QueueClosed)));
    }

    #[tokio::test]
    async fn send_blocks_until_capacity_frees() {
        let (tx, rx) = bounded::<u32>(1);
        tx.send(1).await.unwrap();
        let tx2 = tx.clone();
        let sender = tokio::spawn(async move { tx2.send(2).await });
        tokio::task::yield_now().await;
        assert_eq!(rx.receive().await.unwrap(), Some(1));
        sender.await.unwrap().unwrap();
        assert_eq!(rx.receive().await.unwrap(), Some(2));
    }
}
