//! Event queue with batching.

use crate::types::BatchEvent;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::warn;

/// Bounded queue of events waiting for upload.
#[derive(Debug)]
pub struct EventQueue {
    events: Mutex<VecDeque<BatchEvent>>,
    flush_at: AtomicUsize,
    max_size: AtomicUsize,
}

impl EventQueue {
    /// Create a queue that asks for a flush at `flush_at` events and holds
    /// at most `max_size`.
    pub fn new(flush_at: usize, max_size: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            flush_at: AtomicUsize::new(flush_at.max(1)),
            max_size: AtomicUsize::new(max_size.max(1)),
        }
    }

    /// Change the limits. Excess events are dropped on the next enqueue.
    pub fn resize(&self, flush_at: usize, max_size: usize) {
        self.flush_at.store(flush_at.max(1), Ordering::SeqCst);
        self.max_size.store(max_size.max(1), Ordering::SeqCst);
    }

    /// Add an event, dropping the oldest ones when full.
    pub async fn enqueue(&self, event: BatchEvent) {
        let max_size = self.max_size.load(Ordering::SeqCst);
        let mut events = self.events.lock().await;

        while events.len() >= max_size {
            if let Some(dropped) = events.pop_front() {
                warn!(event = %dropped.event, "queue full, dropping oldest event");
            }
        }

        events.push_back(event);
    }

    /// Check if the queue should be flushed.
    pub async fn should_flush(&self) -> bool {
        self.events.lock().await.len() >= self.flush_at.load(Ordering::SeqCst)
    }

    /// Get the number of events in the queue.
    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    /// Check if the queue is empty.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drain all events from the queue.
    pub async fn drain(&self) -> Vec<BatchEvent> {
        let mut events = self.events.lock().await;
        events.drain(..).collect()
    }

    /// Put events back at the front after a failed upload.
    ///
    /// Events beyond the size limit are dropped from the oldest end.
    pub async fn requeue(&self, failed: Vec<BatchEvent>) {
        if failed.is_empty() {
            return;
        }

        let max_size = self.max_size.load(Ordering::SeqCst);
        let mut events = self.events.lock().await;
        for event in failed.into_iter().rev() {
            events.push_front(event);
        }

        let overflow = events.len().saturating_sub(max_size);
        if overflow > 0 {
            warn!(dropped = overflow, "queue full after requeue, dropping oldest events");
            events.drain(..overflow);
        }
    }
}
