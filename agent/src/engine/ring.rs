//! Bounded event ring for streaming tools
//!
//! Producers push completed events without blocking; when the ring is full the
//! newest event is rejected and counted. A single consumer polls with a
//! timeout and is woken by producers through a `Notify`.

use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

pub struct EventRing<T> {
    queue: ArrayQueue<T>,
    ready: Notify,
    dropped: AtomicU64,
}

impl<T> EventRing<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            ready: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Push an event; returns false (and counts a drop) when the ring is full
    pub fn push(&self, event: T) -> bool {
        match self.queue.push(event) {
            Ok(()) => {
                self.ready.notify_one();
                true
            }
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Wait up to `timeout` for the next event
    pub async fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(event) = self.queue.pop() {
                return Some(event);
            }

            if tokio::time::timeout_at(deadline, self.ready.notified())
                .await
                .is_err()
            {
                return self.queue.pop();
            }
        }
    }

    /// Pop everything currently buffered
    pub fn drain(&self) -> Vec<T> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Events rejected because the ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
