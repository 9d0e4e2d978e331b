//! Version-tracked schema migrations for the libSQL outbox.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::StorageError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "outbox_emails",
    sql: r#"
        CREATE TABLE IF NOT EXISTS outbox_emails (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            is_processed INTEGER NOT NULL DEFAULT 0,
            processed_at TEXT,
            recipients TEXT NOT NULL,
            subject TEXT NOT NULL,
            rendered_body TEXT NOT NULL,
            message_type TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_outbox_created ON outbox_emails(created_at);
        CREATE INDEX IF NOT EXISTS idx_outbox_unprocessed
            ON outbox_emails(is_processed, created_at);
    "#,
}];

/// Apply any migrations newer than the recorded schema version.
pub async fn run_migrations(conn: &Connection) -> Result<(), StorageError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        (),
    )
    .await
    .map_err(|e| StorageError::Migration(format!("create _migrations: {e}")))?;

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| StorageError::Migration(format!("read schema version: {e}")))?;

    let current: i64 = match rows.next().await {
        Ok(Some(row)) => row
            .get(0)
            .map_err(|e| StorageError::Migration(format!("read schema version: {e}")))?,
        _ => 0,
    };

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        conn.execute_batch(migration.sql)
            .await
            .map_err(|e| StorageError::Migration(format!("{}: {e}", migration.name)))?;

        conn.execute(
            "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            libsql::params![
                migration.version,
                migration.name,
                chrono::Utc::now().to_rfc3339()
            ],
        )
        .await
        .map_err(|e| StorageError::Migration(format!("record {}: {e}", migration.name)))?;

        tracing::info!(version = migration.version, name = migration.name, "Migration applied");
    }

    Ok(())
}
