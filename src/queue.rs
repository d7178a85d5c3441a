//! Bounded, closable multi-producer / multi-consumer queue.
//!
//! Every stage of the pipeline talks to the next one through one of these.
//! `push` suspends while the queue is full, `pop` suspends while it is
//! empty. The queue closes when the last [`QueueSender`] is dropped; waiting
//! consumers then drain what is left and receive `None`.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

// ─── Construction ────────────────────────────────────────────────

/// Creates a queue that holds at most `capacity` items (minimum 1).
pub fn bounded<T>(capacity: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        QueueSender { tx },
        QueueReceiver {
            rx: Arc::new(Mutex::new(rx)),
        },
    )
}

// ─── Producer side ───────────────────────────────────────────────

/// Producer handle. Cheap to clone; the queue stays open while any clone lives.
pub struct QueueSender<T> {
    tx: mpsc::Sender<T>,
}

/// Returned by [`QueueSender::push`] when every consumer is gone.
/// Carries the item back to the caller.
#[derive(Debug, PartialEq, Eq)]
pub struct QueueClosed<T>(pub T);

impl<T> fmt::Display for QueueClosed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue closed")
    }
}

impl<T: fmt::Debug> std::error::Error for QueueClosed<T> {}

impl<T> QueueSender<T> {
    /// Enqueue one item, waiting for a free slot if the queue is full.
    pub async fn push(&self, item: T) -> Result<(), QueueClosed<T>> {
        self.tx.send(item).await.map_err(|e| QueueClosed(e.0))
    }

    /// Items enqueued (or slots reserved) but not yet dequeued.
    pub fn in_flight(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> fmt::Debug for QueueSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueSender")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .finish()
    }
}

// ─── Consumer side ───────────────────────────────────────────────

/// Consumer handle. Clones share one underlying receiver, so each item is
/// handed to exactly one consumer.
pub struct QueueReceiver<T> {
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> QueueReceiver<T> {
    /// Dequeue the next item. Returns `None` once the queue is closed and empty.
    ///
    /// Cancel-safe: dropping the future never loses an item.
    pub async fn pop(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T> fmt::Debug for QueueReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueReceiver").finish_non_exhaustive()
    }
}
