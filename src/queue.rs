//! Bounded, drop-oldest notification queue.
//!
//! The thread that drains this queue must never block on the lifecycle
//! controller's mutex, so this is a small self-synchronizing type built
//! on a plain `std::sync::Mutex` rather than `tokio::sync::broadcast` —
//! `broadcast`'s lagging-receiver semantics retain a *window* of recent
//! messages per-subscriber, not a single shared drop-oldest FIFO.

use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;

pub const DEFAULT_CAPACITY: usize = 500;

#[derive(Debug)]
pub struct NotificationQueue {
    capacity: usize,
    inner: Mutex<VecDeque<Value>>,
    notify: Notify,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            notify: Notify::new(),
        }
    }

    /// Pushes `value`. If full, discards the oldest element first. Never
    /// blocks.
    pub fn try_push(&self, value: Value) {
        let mut queue = self.inner.lock().expect("notification queue poisoned");
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(value);
        drop(queue);
        self.notify.notify_one();
    }

    /// Non-blocking pop; `None` means empty.
    pub fn try_pop(&self) -> Option<Value> {
        self.inner.lock().expect("notification queue poisoned").pop_front()
    }

    /// Blocks up to `timeout` for an element; `None` on timeout or
    /// immediate emptiness after the wait resolves spuriously.
    pub async fn pop_with_timeout(&self, timeout: Duration) -> Option<Value> {
        if let Some(v) = self.try_pop() {
            return Some(v);
        }
        let wait = self.notify.notified();
        tokio::pin!(wait);
        match tokio::time::timeout(timeout, &mut wait).await {
            Ok(()) => self.try_pop(),
            Err(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("notification queue poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NotificationQueue {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overflow_drops_oldest() {
        let queue = NotificationQueue::new(2);
        queue.try_push(json!("one"));
        queue.try_push(json!("two"));
        queue.try_push(json!("three"));

        assert_eq!(queue.try_pop(), Some(json!("two")));
        assert_eq!(queue.try_pop(), Some(json!("three")));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn pop_with_timeout_returns_none_when_empty() {
        let queue = NotificationQueue::new(4);
        let result = queue.pop_with_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn pop_with_timeout_observes_pushed_value() {
        let queue = NotificationQueue::new(4);
        queue.try_push(json!({"k": 1}));
        let result = queue.pop_with_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Some(json!({"k": 1})));
    }
}
