//! In-process dispatch queue.
//!
//! A claim-based queue of entry ids shared by the worker pool. Insertion
//! enqueues a task immediately; retries re-enqueue after a delay. The queue
//! does not guarantee strict FIFO across workers — entries are independent,
//! so concurrent dispatch of distinct ids is safe.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};
use uuid::Uuid;

/// A unit of dispatch work: which entry to send, and which attempt this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTask {
    pub entry_id: Uuid,
    /// 1-based attempt number this task represents.
    pub attempt: u32,
}

impl DispatchTask {
    /// The first attempt for a freshly inserted or recovered entry.
    pub fn first(entry_id: Uuid) -> Self {
        Self {
            entry_id,
            attempt: 1,
        }
    }

    /// The follow-up attempt after a failure.
    pub fn next(self) -> Self {
        Self {
            entry_id: self.entry_id,
            attempt: self.attempt + 1,
        }
    }
}

/// Shared task queue feeding the dispatcher workers.
pub struct DispatchQueue {
    tasks: Mutex<VecDeque<DispatchTask>>,
    notify: Notify,
    closed: AtomicBool,
}

impl DispatchQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        })
    }

    /// Push a task and wake one waiting worker.
    ///
    /// After [`close`](Self::close) the task is dropped with a warning; the
    /// entry stays unprocessed and the startup recovery scan will re-enqueue
    /// it on the next run.
    pub async fn enqueue(&self, task: DispatchTask) {
        if self.closed.load(Ordering::Acquire) {
            warn!(entry_id = %task.entry_id, "Queue closed, dropping task (recovered at next startup)");
            return;
        }
        {
            let mut tasks = self.tasks.lock().await;
            tasks.push_back(task);
        }
        debug!(entry_id = %task.entry_id, attempt = task.attempt, "Task enqueued");
        self.notify.notify_one();
    }

    /// Re-enqueue a task after `delay` (retry backoff).
    pub fn enqueue_after(self: &Arc<Self>, task: DispatchTask, delay: Duration) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.enqueue(task).await;
        });
    }

    /// Claim the next task without waiting.
    pub async fn claim(&self) -> Option<DispatchTask> {
        self.tasks.lock().await.pop_front()
    }

    /// Wait for and claim the next task. Returns `None` once the queue is
    /// closed and drained.
    pub async fn next(&self) -> Option<DispatchTask> {
        loop {
            // Register interest before checking so a concurrent enqueue
            // between the check and the await cannot be missed.
            let notified = self.notify.notified();

            if let Some(task) = self.claim().await {
                return Some(task);
            }
            if self.closed.load(Ordering::Acquire) {
                return None;
            }

            notified.await;
        }
    }

    /// Close the queue and wake all waiting workers so they can exit.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_then_claim() {
        let queue = DispatchQueue::new();
        let task = DispatchTask::first(Uuid::new_v4());
        queue.enqueue(task).await;

        assert_eq!(queue.len().await, 1);
        assert_eq!(queue.claim().await, Some(task));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn next_waits_for_enqueue() {
        let queue = DispatchQueue::new();
        let task = DispatchTask::first(Uuid::new_v4());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        // Give the waiter a chance to park first.
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(task).await;

        assert_eq!(waiter.await.unwrap(), Some(task));
    }

    #[tokio::test]
    async fn next_returns_none_after_close() {
        let queue = DispatchQueue::new();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();

        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn enqueue_after_close_drops_task() {
        let queue = DispatchQueue::new();
        queue.close();
        queue.enqueue(DispatchTask::first(Uuid::new_v4())).await;
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn enqueue_after_delivers_later() {
        let queue = DispatchQueue::new();
        let task = DispatchTask::first(Uuid::new_v4()).next();
        queue.enqueue_after(task, Duration::from_millis(10));

        assert!(queue.is_empty().await);
        let claimed = queue.next().await;
        assert_eq!(claimed, Some(task));
        assert_eq!(claimed.unwrap().attempt, 2);
    }

    #[tokio::test]
    async fn tasks_claimed_in_order() {
        let queue = DispatchQueue::new();
        let t1 = DispatchTask::first(Uuid::new_v4());
        let t2 = DispatchTask::first(Uuid::new_v4());
        queue.enqueue(t1).await;
        queue.enqueue(t2).await;

        assert_eq!(queue.claim().await, Some(t1));
        assert_eq!(queue.claim().await, Some(t2));
    }
}
