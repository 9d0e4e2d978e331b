//! libSQL outbox backend — async `OutboxStore` implementation.
//!
//! Supports local file and in-memory databases. Recipients are stored as a
//! JSON text column; timestamps as fixed-width RFC 3339 so lexicographic
//! ordering matches chronological ordering.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::message::ResolvedMessage;
use crate::outbox::migrations;
use crate::outbox::{OutboxEntry, OutboxStore};

const ENTRY_COLUMNS: &str =
    "id, created_at, is_processed, processed_at, recipients, subject, rendered_body, message_type";

/// libSQL-backed outbox store.
///
/// Holds a single connection reused for all operations;
/// `libsql::Connection` is safe for concurrent async use.
pub struct LibSqlOutbox {
    #[allow(dead_code)]
    db: Arc<Database>,
    conn: Connection,
}

impl LibSqlOutbox {
    /// Open (or create) the configured database file and run migrations.
    pub async fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(&config.db_path)
            .build()
            .await
            .map_err(|e| StorageError::Unavailable(format!("Failed to open database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %config.db_path.display(), "Outbox database opened");
        Ok(backend)
    }

    /// Create an in-memory store (for tests).
    pub async fn new_memory() -> Result<Self, StorageError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                StorageError::Unavailable(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, StorageError> {
        let conn = db
            .connect()
            .map_err(|e| StorageError::Unavailable(format!("Failed to create connection: {e}")))?;

        migrations::run_migrations(&conn).await?;

        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Row mapping helpers ─────────────────────────────────────────────

/// Canonical timestamp format: fixed-width RFC 3339 with microseconds, so
/// TEXT comparison in SQL preserves chronological order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

fn row_to_entry(row: &libsql::Row) -> Result<OutboxEntry, StorageError> {
    let id_str: String = row
        .get(0)
        .map_err(|e| StorageError::Corrupt(format!("id: {e}")))?;
    let created_str: String = row
        .get(1)
        .map_err(|e| StorageError::Corrupt(format!("created_at: {e}")))?;
    let is_processed: i64 = row
        .get(2)
        .map_err(|e| StorageError::Corrupt(format!("is_processed: {e}")))?;
    let processed_str: Option<String> = row.get(3).ok();
    let recipients_json: String = row
        .get(4)
        .map_err(|e| StorageError::Corrupt(format!("recipients: {e}")))?;
    let subject: String = row
        .get(5)
        .map_err(|e| StorageError::Corrupt(format!("subject: {e}")))?;
    let rendered_body: String = row
        .get(6)
        .map_err(|e| StorageError::Corrupt(format!("rendered_body: {e}")))?;
    let message_type_str: String = row
        .get(7)
        .map_err(|e| StorageError::Corrupt(format!("message_type: {e}")))?;

    let recipients: Vec<String> = serde_json::from_str(&recipients_json)
        .map_err(|e| StorageError::Corrupt(format!("recipients JSON: {e}")))?;
    let message_type = message_type_str
        .parse()
        .map_err(|e| StorageError::Corrupt(format!("message_type: {e}")))?;

    Ok(OutboxEntry {
        id: Uuid::parse_str(&id_str)
            .map_err(|e| StorageError::Corrupt(format!("id {id_str:?}: {e}")))?,
        created_at: parse_timestamp(&created_str)?,
        is_processed: is_processed != 0,
        processed_at: match processed_str {
            Some(s) => Some(parse_timestamp(&s)?),
            None => None,
        },
        email: ResolvedMessage {
            recipients,
            subject,
            rendered_body,
            message_type,
        },
    })
}

#[async_trait]
impl OutboxStore for LibSqlOutbox {
    async fn insert(&self, message: ResolvedMessage) -> Result<OutboxEntry, StorageError> {
        let entry = OutboxEntry {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            is_processed: false,
            processed_at: None,
            email: message,
        };

        let recipients_json = serde_json::to_string(&entry.email.recipients)
            .map_err(|e| StorageError::Unavailable(format!("serialize recipients: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO outbox_emails
                     (id, created_at, is_processed, recipients, subject, rendered_body, message_type)
                 VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6)",
                params![
                    entry.id.to_string(),
                    format_timestamp(entry.created_at),
                    recipients_json,
                    entry.email.subject.clone(),
                    entry.email.rendered_body.clone(),
                    entry.email.message_type.to_string(),
                ],
            )
            .await
            .map_err(|e| StorageError::Unavailable(format!("insert: {e}")))?;

        debug!(entry_id = %entry.id, "Outbox entry inserted");
        Ok(entry)
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutboxEntry>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {ENTRY_COLUMNS} FROM outbox_emails WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| StorageError::Query(format!("get: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_entry(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Query(format!("get: {e}"))),
        }
    }

    async fn mark_processed(&self, id: Uuid) -> Result<(), StorageError> {
        // Compare-and-set: only the store flips the flag, and only once.
        let affected = self
            .conn()
            .execute(
                "UPDATE outbox_emails SET is_processed = 1, processed_at = ?1
                 WHERE id = ?2 AND is_processed = 0",
                params![format_timestamp(Utc::now()), id.to_string()],
            )
            .await
            .map_err(|e| StorageError::Query(format!("mark_processed: {e}")))?;

        if affected > 0 {
            debug!(entry_id = %id, "Outbox entry marked processed");
            return Ok(());
        }

        // Nothing updated: distinguish "already processed" (a tolerated
        // duplicate acknowledgement) from an unknown id.
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM outbox_emails WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(|e| StorageError::Query(format!("mark_processed lookup: {e}")))?;

        match rows.next().await {
            Ok(Some(_)) => {
                debug!(entry_id = %id, "Duplicate acknowledgement ignored");
                Ok(())
            }
            Ok(None) => Err(StorageError::EntryNotFound(id)),
            Err(e) => Err(StorageError::Query(format!("mark_processed lookup: {e}"))),
        }
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<OutboxEntry>, StorageError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM outbox_emails
                     WHERE is_processed = 0
                     ORDER BY created_at ASC, rowid ASC
                     LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| StorageError::Query(format!("list_unprocessed: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_entry(&row) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed outbox row");
                }
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;

    async fn test_store() -> LibSqlOutbox {
        LibSqlOutbox::new_memory().await.unwrap()
    }

    fn make_message(subject: &str) -> ResolvedMessage {
        ResolvedMessage {
            recipients: vec!["a@x.com".into()],
            subject: subject.into(),
            rendered_body: "Hello".into(),
            message_type: MessageType::Plain,
        }
    }

    #[tokio::test]
    async fn insert_and_get_by_id() {
        let store = test_store().await;
        let entry = store.insert(make_message("Hi")).await.unwrap();
        assert!(!entry.is_processed);
        assert!(entry.processed_at.is_none());

        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.id, entry.id);
        assert_eq!(fetched.email, entry.email);
        assert!(!fetched.is_processed);
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let store = test_store().await;
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_processed_flips_flag_once() {
        let store = test_store().await;
        let entry = store.insert(make_message("Hi")).await.unwrap();

        store.mark_processed(entry.id).await.unwrap();
        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert!(fetched.is_processed);
        assert!(fetched.processed_at.is_some());
    }

    #[tokio::test]
    async fn mark_processed_twice_is_noop() {
        let store = test_store().await;
        let entry = store.insert(make_message("Hi")).await.unwrap();

        store.mark_processed(entry.id).await.unwrap();
        let first = store.get(entry.id).await.unwrap().unwrap();

        // Second acknowledgement: no error, processed_at unchanged.
        store.mark_processed(entry.id).await.unwrap();
        let second = store.get(entry.id).await.unwrap().unwrap();
        assert!(second.is_processed);
        assert_eq!(second.processed_at, first.processed_at);
    }

    #[tokio::test]
    async fn mark_processed_unknown_id_fails() {
        let store = test_store().await;
        let id = Uuid::new_v4();
        match store.mark_processed(id).await {
            Err(StorageError::EntryNotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected EntryNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn list_unprocessed_oldest_first() {
        let store = test_store().await;
        let e1 = store.insert(make_message("first")).await.unwrap();
        let e2 = store.insert(make_message("second")).await.unwrap();
        let e3 = store.insert(make_message("third")).await.unwrap();

        let unprocessed = store.list_unprocessed(3).await.unwrap();
        let ids: Vec<Uuid> = unprocessed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![e1.id, e2.id, e3.id]);
    }

    #[tokio::test]
    async fn list_unprocessed_excludes_processed() {
        let store = test_store().await;
        let e1 = store.insert(make_message("first")).await.unwrap();
        let e2 = store.insert(make_message("second")).await.unwrap();

        store.mark_processed(e1.id).await.unwrap();

        let unprocessed = store.list_unprocessed(10).await.unwrap();
        assert_eq!(unprocessed.len(), 1);
        assert_eq!(unprocessed[0].id, e2.id);
    }

    #[tokio::test]
    async fn list_unprocessed_respects_limit() {
        let store = test_store().await;
        for i in 0..5 {
            store.insert(make_message(&format!("m{i}"))).await.unwrap();
        }
        let unprocessed = store.list_unprocessed(2).await.unwrap();
        assert_eq!(unprocessed.len(), 2);
        assert_eq!(unprocessed[0].email.subject, "m0");
        assert_eq!(unprocessed[1].email.subject, "m1");
    }

    #[tokio::test]
    async fn recipients_round_trip_as_json() {
        let store = test_store().await;
        let message = ResolvedMessage {
            recipients: vec!["a@x.com".into(), "b@y.org".into()],
            subject: "Hi".into(),
            rendered_body: "<p>Hello</p>".into(),
            message_type: MessageType::Html,
        };
        let entry = store.insert(message.clone()).await.unwrap();

        let fetched = store.get(entry.id).await.unwrap().unwrap();
        assert_eq!(fetched.email, message);
    }
}
