//! A shared event bus for listener support (§9 DESIGN NOTES: "Replace [`AbstractListenable`] with
//! composition: listener support is a shared `EventBus<T>` value embedded where needed").
//!
//! Grounded in the teacher's own use of `tokio::sync::broadcast` in its core run loop for
//! fanning a single event out to any number of independent waiters.

use tokio::sync::broadcast;

/// A cloneable handle to a broadcast channel of `T`. Cloning shares the same underlying channel;
/// each subscriber gets every event published after it subscribes.
pub struct EventBus<T: Clone + Send + 'static> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns the number of active subscribers it was delivered to; `Ok(0)`
    /// just means nobody happened to be listening, not a failure.
    pub fn publish(&self, event: T) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }
}

impl<T: Clone + Send + 'static> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(64)
    }
}
