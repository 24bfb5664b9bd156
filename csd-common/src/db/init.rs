//! Database initialization
//!
//! Opens (or creates) the SQLite database and applies the schema. Every
//! `create_*` function is idempotent and public so tests can build the same
//! schema on an in-memory pool.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// SQLite busy timeout applied to every connection
pub const BUSY_TIMEOUT_MS: u64 = 5000;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .acquire_timeout(Duration::from_secs(10))
        .connect_with(file_options(db_path))
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Connection settings applied to every pooled connection
///
/// WAL lets dashboard reads proceed while a submission outcome is written.
pub fn file_options(db_path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))
}

/// Open a single-connection in-memory database with the full schema
///
/// The pool is capped at one connection that never expires, since every
/// SQLite in-memory connection is a separate database.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true))
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every relay table (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_submissions_table(pool).await?;
    create_submission_events_table(pool).await?;
    create_mapping_history_table(pool).await?;
    Ok(())
}

/// One row per inbound submission, unique on the source system's id
pub async fn create_submissions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            source_submission_id TEXT NOT NULL UNIQUE,
            submitter_name TEXT,
            submitter_email TEXT,
            builder_name TEXT,
            plan_name TEXT,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'success', 'failed')),
            attempt_count INTEGER NOT NULL DEFAULT 0,
            error_kind TEXT
                CHECK (error_kind IS NULL OR error_kind IN ('validation', 'transient', 'rejected')),
            last_error TEXT,
            confirmation_code TEXT,
            raw_payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            submitted_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status, created_at)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Status history: one row per state transition
pub async fn create_submission_events_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS submission_events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id INTEGER NOT NULL REFERENCES submissions(id),
            from_status TEXT,
            to_status TEXT NOT NULL,
            attempt_count INTEGER NOT NULL,
            error_kind TEXT,
            message TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_submission_events_submission ON submission_events(submission_id, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Versions of the field mapping that have been loaded
pub async fn create_mapping_history_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS mapping_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            change_date TEXT NOT NULL,
            mapping_version TEXT NOT NULL,
            mapping_data TEXT NOT NULL,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
