//! Work queue: in-process hand-off between ingestion and the worker pool.

use std::collections::VecDeque;

use tokio::sync::{Mutex, Notify};

use crate::domain::WorkItem;
use crate::error::DeferqError;

/// Closeable multi-producer/multi-consumer hand-off buffer.
///
/// Design:
/// - `push` never blocks; `pop` waits until an item arrives or the queue
///   closes.
/// - Shutdown-drain semantics: after `close()`, items already queued are
///   still handed out; `pop` returns `None` only once the queue is both
///   closed and empty.
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

struct QueueState {
    items: VecDeque<WorkItem>,
    closed: bool,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue one item. Fails once the queue has been closed.
    pub async fn push(&self, item: WorkItem) -> Result<(), DeferqError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(DeferqError::QueueClosed);
        }
        state.items.push_back(item);
        drop(state);

        self.notify.notify_one();
        Ok(())
    }

    /// Take the next item, waiting if none is queued. Returns `None` once
    /// the queue is closed and fully drained.
    pub async fn pop(&self) -> Option<WorkItem> {
        loop {
            // Register for a wakeup before checking, so a push or close
            // between the check and the await is not lost.
            let notified = self.notify.notified();

            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    if !state.items.is_empty() {
                        // More work queued: pass the wakeup on to the next
                        // waiting consumer.
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Close the queue: pushes start failing, waiting consumers wake up, and
    /// remaining items drain normally.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);

        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::domain::SequenceNumber;

    fn item(n: i64) -> WorkItem {
        WorkItem::new(SequenceNumber::new(n), serde_json::json!({ "n": n }))
    }

    #[tokio::test]
    async fn push_pop_roundtrip() {
        let queue = WorkQueue::new();
        queue.push(item(1)).await.unwrap();

        let popped = queue.pop().await.unwrap();
        assert_eq!(popped.seq(), SequenceNumber::new(1));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn push_wakes_waiting_pop() {
        let queue = Arc::new(WorkQueue::new());

        let pop_future = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.push(item(7)).await.unwrap();

        let popped = pop_future.await.unwrap().unwrap();
        assert_eq!(popped.seq(), SequenceNumber::new(7));
    }

    #[tokio::test]
    async fn close_drains_remaining_items_first() {
        let queue = WorkQueue::new();
        queue.push(item(1)).await.unwrap();
        queue.push(item(2)).await.unwrap();
        queue.close().await;

        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumers() {
        let queue = Arc::new(WorkQueue::new());

        let pop_future = tokio::spawn({
            let queue = queue.clone();
            async move { queue.pop().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.close().await;

        assert!(pop_future.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn push_after_close_is_rejected() {
        let queue = WorkQueue::new();
        queue.close().await;

        let err = queue.push(item(1)).await.unwrap_err();
        assert!(matches!(err, DeferqError::QueueClosed));
    }
}
