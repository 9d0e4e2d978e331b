//! Dispatch workers — pull tasks from the queue and drive entries through
//! `Queued → Sending → {Sent | Failed}`.
//!
//! Delivery is at-least-once: a worker may send successfully and die before
//! the store acknowledges, in which case the entry is re-dispatched and the
//! recipient can receive a duplicate. The store's idempotent `mark_processed`
//! protects state, not the inbox.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatchConfig;
use crate::error::{MailError, Result, StorageError};
use crate::mailer::MailTransport;
use crate::outbox::OutboxStore;
use crate::queue::{DispatchQueue, DispatchTask};

/// Worker pool dispatching outbox entries through the mail transport.
pub struct Dispatcher {
    queue: Arc<DispatchQueue>,
    store: Arc<dyn OutboxStore>,
    transport: Arc<dyn MailTransport>,
    config: DispatchConfig,
    dead_letters: AtomicU64,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<DispatchQueue>,
        store: Arc<dyn OutboxStore>,
        transport: Arc<dyn MailTransport>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            queue,
            store,
            transport,
            config,
            dead_letters: AtomicU64::new(0),
        })
    }

    /// Spawn the worker pool. Workers run until the queue is closed, each
    /// finishing its in-flight task before exiting.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker_id| {
                let dispatcher = Arc::clone(self);
                tokio::spawn(async move { dispatcher.worker_loop(worker_id).await })
            })
            .collect()
    }

    /// Re-enqueue every unprocessed entry, oldest first.
    ///
    /// Run at startup so entries whose tasks were lost to a crash are
    /// dispatched again. Returns the number of entries recovered.
    pub async fn recover(&self, scan_limit: usize) -> Result<usize> {
        let pending = self.store.list_unprocessed(scan_limit).await?;
        let recovered = pending.len();
        for entry in pending {
            self.queue.enqueue(DispatchTask::first(entry.id)).await;
        }
        if recovered > 0 {
            info!(count = recovered, "Recovered unprocessed outbox entries");
        }
        Ok(recovered)
    }

    /// Stop accepting work and let workers drain out.
    pub fn shutdown(&self) {
        self.queue.close();
    }

    /// Entries that exhausted their retry budget since startup.
    pub fn dead_letter_count(&self) -> u64 {
        self.dead_letters.load(Ordering::Relaxed)
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        debug!(worker_id, "Dispatch worker started");
        while let Some(task) = self.queue.next().await {
            self.dispatch_one(task).await;
        }
        debug!(worker_id, "Dispatch worker stopped");
    }

    async fn dispatch_one(&self, task: DispatchTask) {
        debug!(entry_id = %task.entry_id, attempt = task.attempt, "Sending");

        let entry = match self.store.get(task.entry_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                // The store no longer recognizes the id. Logged, not retried.
                warn!(entry_id = %task.entry_id, "Task references unknown outbox entry, dropping");
                return;
            }
            Err(e) => {
                warn!(entry_id = %task.entry_id, error = %e, "Could not load entry");
                self.retry_or_dead_letter(task, &e.to_string());
                return;
            }
        };

        if entry.is_processed {
            debug!(entry_id = %entry.id, "Entry already processed, skipping");
            return;
        }

        let send_result = tokio::time::timeout(
            self.config.send_timeout,
            self.transport.send(&entry.email),
        )
        .await
        .unwrap_or(Err(MailError::Timeout(self.config.send_timeout)));

        match send_result {
            Ok(()) => match self.store.mark_processed(entry.id).await {
                Ok(()) => {
                    info!(entry_id = %entry.id, attempt = task.attempt, "Entry dispatched");
                }
                Err(StorageError::EntryNotFound(_)) => {
                    warn!(entry_id = %entry.id, "Acknowledged an entry the store no longer knows");
                }
                Err(e) => {
                    // Sent but not acknowledged; re-dispatching may duplicate
                    // the email. Accepted at-least-once semantics.
                    warn!(entry_id = %entry.id, error = %e, "Sent but could not mark processed, requeueing");
                    self.retry_or_dead_letter(task, &e.to_string());
                }
            },
            Err(e) => {
                self.retry_or_dead_letter(task, &e.to_string());
            }
        }
    }

    fn retry_or_dead_letter(&self, task: DispatchTask, reason: &str) {
        if task.attempt < self.config.max_attempts {
            let delay = retry_delay(
                task.attempt,
                self.config.retry_backoff,
                self.config.retry_backoff_cap,
            );
            warn!(
                entry_id = %task.entry_id,
                attempt = task.attempt,
                max_attempts = self.config.max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason,
                "Dispatch failed, scheduling retry"
            );
            self.queue.enqueue_after(task.next(), delay);
        } else {
            // Retry budget exhausted. The entry stays unprocessed in the
            // outbox until an operator intervenes; it is never deleted.
            self.dead_letters.fetch_add(1, Ordering::Relaxed);
            error!(
                entry_id = %task.entry_id,
                attempts = task.attempt,
                reason,
                dead_letter = true,
                "Dispatch permanently failed, entry dead-lettered"
            );
        }
    }
}

/// Exponential backoff: base doubling per completed attempt, capped.
fn retry_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.saturating_mul(factor).min(cap)
}
