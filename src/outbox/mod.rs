//! Outbox persistence — durable record of accepted, not-yet-delivered mail.

mod libsql_store;
mod migrations;

pub use libsql_store::LibSqlOutbox;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StorageError;
use crate::message::ResolvedMessage;

/// A persisted outbox entry.
#[derive(Debug, Clone, Serialize)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub is_processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub email: ResolvedMessage,
}

/// Durable outbox store.
///
/// The store exclusively owns entry identity and the processed flag:
/// `is_processed` is monotonic (false to true, exactly once) and workers
/// request the transition only through [`mark_processed`](Self::mark_processed).
/// Entries are never deleted by this subsystem.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Persist a resolved message as a new unprocessed entry.
    ///
    /// Fails only with [`StorageError::Unavailable`]; the request was never
    /// accepted, so the caller may safely retry the whole call.
    async fn insert(&self, message: ResolvedMessage) -> Result<OutboxEntry, StorageError>;

    /// Point lookup by id.
    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, StorageError>;

    /// Flip `is_processed` false to true.
    ///
    /// Fails with [`StorageError::EntryNotFound`] for unknown ids. Calling it
    /// on an already-processed entry is a no-op, tolerating duplicate
    /// delivery acknowledgements.
    async fn mark_processed(&self, id: Uuid) -> Result<(), StorageError>;

    /// Unprocessed entries, oldest first, bounded by `limit`.
    ///
    /// Creation order is the durable FIFO basis for recovery scans; the
    /// primary dispatch path is queue-driven and does not use this.
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError>;
}
