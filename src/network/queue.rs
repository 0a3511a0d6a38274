//! Bounded internal queues
//!
//! Pushes never block: when the queue is full the newest item is dropped,
//! counted and logged. Pops block until an item arrives.

use super::stats::NetworkStats;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// Producer side of a bounded queue
pub struct BoundedQueue<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
    stats: Arc<NetworkStats>,
}

impl<T> Clone for BoundedQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            tx: self.tx.clone(),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T> BoundedQueue<T> {
    /// Create a queue and its single consumer
    pub fn new(
        name: &'static str,
        capacity: usize,
        stats: Arc<NetworkStats>,
    ) -> (Self, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { name, tx, stats }, rx)
    }

    /// Non-blocking push; returns false if the item was dropped
    pub fn push(&self, item: T) -> bool {
        match self.tx.try_send(item) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.record_queue_overflow();
                warn!(queue = self.name, "queue full, dropping newest item");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
