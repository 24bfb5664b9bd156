//! Submission store
//!
//! Every state change is a conditional update (`WHERE status = ?`) inside a
//! transaction that also appends a `submission_events` row, so two writers
//! can never both move the same record out of one state. Writes go through
//! `retry_on_lock` so SQLite lock contention backs off instead of failing.

use chrono::{DateTime, Utc};
use csd_common::db::retry::{LockContention, DEFAULT_MAX_LOCK_WAIT_MS};
use csd_common::db::retry_on_lock;
use csd_common::time::{now_rfc3339, parse_rfc3339};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{
    AttemptOutcome, DisplayFields, ErrorKind, RawPayload, SubmissionEvent, SubmissionRecord,
    SubmissionStats, SubmissionStatus,
};

/// Message stored on records found mid-attempt at startup
pub const INTERRUPTED_MESSAGE: &str = "interrupted before outcome was recorded";

const RECORD_COLUMNS: &str = "id, source_submission_id, submitter_name, submitter_email, \
     builder_name, plan_name, status, attempt_count, error_kind, last_error, \
     confirmation_code, raw_payload, created_at, updated_at, submitted_at";

/// Submission store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] csd_common::Error),

    #[error("Submission {0} not found")]
    NotFound(i64),

    #[error("Submission {id} is {actual}, expected {expected}")]
    StateConflict {
        id: i64,
        expected: SubmissionStatus,
        actual: SubmissionStatus,
    },

    #[error("Submission {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: i64,
        from: SubmissionStatus,
        to: SubmissionStatus,
    },

    #[error("Submission row {id} cannot be decoded: {message}")]
    Corrupt { id: i64, message: String },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(csd_common::Error::Database(err))
    }
}

impl LockContention for StoreError {
    fn is_lock_contention(&self) -> bool {
        match self {
            StoreError::Database(err) => err.is_lock_contention(),
            _ => false,
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Create a pending record unless one already exists for `source_submission_id`
///
/// Returns the stored record and whether this call created it. An existing
/// record is returned unchanged.
pub async fn upsert_pending(
    pool: &SqlitePool,
    source_submission_id: &str,
    raw_payload: &RawPayload,
    display: &DisplayFields,
) -> StoreResult<(SubmissionRecord, bool)> {
    let payload_json = serde_json::to_string(raw_payload)
        .map_err(|e| csd_common::Error::Internal(format!("Failed to serialize payload: {}", e)))?;

    let created = retry_on_lock("upsert_pending", DEFAULT_MAX_LOCK_WAIT_MS, || {
        insert_pending(pool, source_submission_id, &payload_json, display)
    })
    .await?;

    let record = get_by_source_id(pool, source_submission_id)
        .await?
        .ok_or_else(|| {
            StoreError::Database(csd_common::Error::Internal(format!(
                "Submission '{}' missing after insert",
                source_submission_id
            )))
        })?;

    if created {
        debug!(id = record.id, source_submission_id, "Stored new submission");
    }
    Ok((record, created))
}

async fn insert_pending(
    pool: &SqlitePool,
    source_submission_id: &str,
    payload_json: &str,
    display: &DisplayFields,
) -> StoreResult<bool> {
    let now = now_rfc3339();
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO submissions (
            source_submission_id, submitter_name, submitter_email, builder_name, plan_name,
            status, attempt_count, raw_payload, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?, ?)
        ON CONFLICT(source_submission_id) DO NOTHING
        "#,
    )
    .bind(source_submission_id)
    .bind(&display.submitter_name)
    .bind(&display.submitter_email)
    .bind(&display.builder_name)
    .bind(&display.plan_name)
    .bind(payload_json)
    .bind(&now)
    .bind(&now)
    .execute(&mut *tx)
    .await?;

    let created = result.rows_affected() == 1;
    if created {
        let id = result.last_insert_rowid();
        append_event(&mut tx, id, None, SubmissionStatus::Pending, 0, None, None, &now).await?;
    }

    tx.commit().await?;
    Ok(created)
}

/// Start an attempt on a record
///
/// With `expected = Failed` the record moves `failed -> pending` (a retry).
/// With `expected = Pending` the record must still be pending (a fresh
/// record). Anything else is a `StateConflict`.
pub async fn begin_attempt(
    pool: &SqlitePool,
    id: i64,
    expected: SubmissionStatus,
) -> StoreResult<SubmissionRecord> {
    match expected {
        SubmissionStatus::Pending => {
            let record = get_by_id(pool, id).await?.ok_or(StoreError::NotFound(id))?;
            if record.status != SubmissionStatus::Pending {
                return Err(StoreError::StateConflict {
                    id,
                    expected,
                    actual: record.status,
                });
            }
            Ok(record)
        }
        SubmissionStatus::Failed => {
            let moved = retry_on_lock("begin_attempt", DEFAULT_MAX_LOCK_WAIT_MS, || {
                reopen_failed(pool, id, None)
            })
            .await?;

            let record = get_by_id(pool, id).await?.ok_or(StoreError::NotFound(id))?;
            if !moved {
                return Err(StoreError::StateConflict {
                    id,
                    expected,
                    actual: record.status,
                });
            }
            Ok(record)
        }
        SubmissionStatus::Success => {
            let record = get_by_id(pool, id).await?.ok_or(StoreError::NotFound(id))?;
            Err(StoreError::StateConflict {
                id,
                expected,
                actual: record.status,
            })
        }
    }
}

/// Start a scheduled retry if the record is still eligible for one
///
/// Re-checks the `list_for_retry` conditions at the moment of the update:
/// still `failed`, failure kind `transient`, and under `max_attempts`.
/// Returns `None` when the record no longer qualifies.
pub async fn begin_scheduled_retry(
    pool: &SqlitePool,
    id: i64,
    max_attempts: u32,
) -> StoreResult<Option<SubmissionRecord>> {
    let moved = retry_on_lock("begin_scheduled_retry", DEFAULT_MAX_LOCK_WAIT_MS, || {
        reopen_failed(pool, id, Some(max_attempts))
    })
    .await?;

    if !moved {
        return Ok(None);
    }
    let record = get_by_id(pool, id).await?.ok_or(StoreError::NotFound(id))?;
    Ok(Some(record))
}

/// `failed -> pending`; with `max_attempts` only for transient failures under the limit
async fn reopen_failed(pool: &SqlitePool, id: i64, max_attempts: Option<u32>) -> StoreResult<bool> {
    let now = now_rfc3339();
    let mut tx = pool.begin().await?;

    let result = match max_attempts {
        None => {
            sqlx::query(
                "UPDATE submissions SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'failed'",
            )
            .bind(&now)
            .bind(id)
            .execute(&mut *tx)
            .await?
        }
        Some(max_attempts) => {
            sqlx::query(
                "UPDATE submissions SET status = 'pending', updated_at = ?
                 WHERE id = ? AND status = 'failed' AND error_kind = 'transient' AND attempt_count < ?",
            )
            .bind(&now)
            .bind(id)
            .bind(i64::from(max_attempts))
            .execute(&mut *tx)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let attempt_count: i64 = sqlx::query_scalar("SELECT attempt_count FROM submissions WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    append_event(
        &mut tx,
        id,
        Some(SubmissionStatus::Failed),
        SubmissionStatus::Pending,
        attempt_count,
        None,
        Some("retry started"),
        &now,
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Apply an attempt outcome to a pending record
pub async fn record_outcome(
    pool: &SqlitePool,
    id: i64,
    outcome: &AttemptOutcome,
) -> StoreResult<SubmissionRecord> {
    let applied = retry_on_lock("record_outcome", DEFAULT_MAX_LOCK_WAIT_MS, || {
        apply_outcome(pool, id, outcome)
    })
    .await?;

    let record = get_by_id(pool, id).await?.ok_or(StoreError::NotFound(id))?;
    if !applied {
        return Err(StoreError::StateConflict {
            id,
            expected: SubmissionStatus::Pending,
            actual: record.status,
        });
    }

    info!(
        id,
        source_submission_id = %record.source_submission_id,
        status = %record.status,
        attempt_count = record.attempt_count,
        error_kind = record.error_kind.map(|k| k.as_str()).unwrap_or("-"),
        "Recorded submission outcome"
    );
    Ok(record)
}

async fn apply_outcome(pool: &SqlitePool, id: i64, outcome: &AttemptOutcome) -> StoreResult<bool> {
    let resolution = outcome.resolve();
    let now = now_rfc3339();
    let attempt_increment: i64 = if resolution.counts_as_attempt { 1 } else { 0 };
    let submitted_at = resolution.counts_as_attempt.then(|| now.clone());

    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE submissions SET
            status = ?,
            error_kind = ?,
            last_error = ?,
            confirmation_code = ?,
            attempt_count = attempt_count + ?,
            submitted_at = COALESCE(?, submitted_at),
            updated_at = ?
        WHERE id = ? AND status = 'pending'
        "#,
    )
    .bind(resolution.status.as_str())
    .bind(resolution.error_kind.map(|k| k.as_str()))
    .bind(&resolution.message)
    .bind(&resolution.confirmation_code)
    .bind(attempt_increment)
    .bind(&submitted_at)
    .bind(&now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    let attempt_count: i64 = sqlx::query_scalar("SELECT attempt_count FROM submissions WHERE id = ?")
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

    let event_message = resolution
        .message
        .clone()
        .or_else(|| resolution.confirmation_code.clone());

    append_event(
        &mut tx,
        id,
        Some(SubmissionStatus::Pending),
        resolution.status,
        attempt_count,
        resolution.error_kind,
        event_message.as_deref(),
        &now,
    )
    .await?;

    tx.commit().await?;
    Ok(true)
}

#[allow(clippy::too_many_arguments)]
async fn append_event(
    tx: &mut Transaction<'_, Sqlite>,
    submission_id: i64,
    from_status: Option<SubmissionStatus>,
    to_status: SubmissionStatus,
    attempt_count: i64,
    error_kind: Option<ErrorKind>,
    message: Option<&str>,
    created_at: &str,
) -> StoreResult<()> {
    if let Some(from) = from_status {
        if !from.can_transition_to(to_status) {
            return Err(StoreError::IllegalTransition {
                id: submission_id,
                from,
                to: to_status,
            });
        }
    }

    sqlx::query(
        r#"
        INSERT INTO submission_events (
            submission_id, from_status, to_status, attempt_count, error_kind, message, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(submission_id)
    .bind(from_status.map(|s| s.as_str()))
    .bind(to_status.as_str())
    .bind(attempt_count)
    .bind(error_kind.map(|k| k.as_str()))
    .bind(message)
    .bind(created_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Failed records eligible for a scheduled retry, oldest first
pub async fn list_for_retry(pool: &SqlitePool, max_attempts: u32) -> StoreResult<Vec<SubmissionRecord>> {
    let sql = format!(
        "SELECT {} FROM submissions
         WHERE status = 'failed' AND error_kind = 'transient' AND attempt_count < ?
         ORDER BY created_at ASC, id ASC",
        RECORD_COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(i64::from(max_attempts))
        .fetch_all(pool)
        .await?;
    rows.iter().map(record_from_row).collect()
}

/// Records newest first, optionally filtered by status
pub async fn list_all(
    pool: &SqlitePool,
    status: Option<SubmissionStatus>,
    limit: i64,
) -> StoreResult<Vec<SubmissionRecord>> {
    let rows = match status {
        Some(status) => {
            let sql = format!(
                "SELECT {} FROM submissions WHERE status = ? ORDER BY created_at DESC, id DESC LIMIT ?",
                RECORD_COLUMNS
            );
            sqlx::query(&sql)
                .bind(status.as_str())
                .bind(limit)
                .fetch_all(pool)
                .await?
        }
        None => {
            let sql = format!(
                "SELECT {} FROM submissions ORDER BY created_at DESC, id DESC LIMIT ?",
                RECORD_COLUMNS
            );
            sqlx::query(&sql).bind(limit).fetch_all(pool).await?
        }
    };
    rows.iter().map(record_from_row).collect()
}

/// Failed records, most recently updated first
pub async fn list_failed(pool: &SqlitePool, limit: i64) -> StoreResult<Vec<SubmissionRecord>> {
    let sql = format!(
        "SELECT {} FROM submissions WHERE status = 'failed' ORDER BY updated_at DESC, id DESC LIMIT ?",
        RECORD_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(limit).fetch_all(pool).await?;
    rows.iter().map(record_from_row).collect()
}

pub async fn get_by_id(pool: &SqlitePool, id: i64) -> StoreResult<Option<SubmissionRecord>> {
    let sql = format!("SELECT {} FROM submissions WHERE id = ?", RECORD_COLUMNS);
    let row = sqlx::query(&sql).bind(id).fetch_optional(pool).await?;
    row.as_ref().map(record_from_row).transpose()
}

pub async fn get_by_source_id(
    pool: &SqlitePool,
    source_submission_id: &str,
) -> StoreResult<Option<SubmissionRecord>> {
    let sql = format!(
        "SELECT {} FROM submissions WHERE source_submission_id = ?",
        RECORD_COLUMNS
    );
    let row = sqlx::query(&sql)
        .bind(source_submission_id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Totals by status and failure kind
pub async fn stats(pool: &SqlitePool) -> StoreResult<SubmissionStats> {
    let row = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0) AS pending,
            COALESCE(SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END), 0) AS success,
            COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) AS failed,
            COALESCE(SUM(CASE WHEN status = 'failed' AND error_kind = 'transient' THEN 1 ELSE 0 END), 0) AS retryable,
            COALESCE(SUM(CASE WHEN status = 'failed' AND error_kind = 'validation' THEN 1 ELSE 0 END), 0) AS validation_failures,
            COALESCE(SUM(CASE WHEN status = 'failed' AND error_kind = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected
        FROM submissions
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(SubmissionStats {
        total: row.try_get("total")?,
        pending: row.try_get("pending")?,
        success: row.try_get("success")?,
        failed: row.try_get("failed")?,
        retryable: row.try_get("retryable")?,
        validation_failures: row.try_get("validation_failures")?,
        rejected: row.try_get("rejected")?,
    })
}

/// Status history for one record, oldest first
pub async fn history(pool: &SqlitePool, id: i64) -> StoreResult<Vec<SubmissionEvent>> {
    let rows = sqlx::query(
        r#"
        SELECT id, submission_id, from_status, to_status, attempt_count, error_kind, message, created_at
        FROM submission_events
        WHERE submission_id = ?
        ORDER BY id ASC
        "#,
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(event_from_row).collect()
}

/// Fail every record left `pending` by a previous process
///
/// Such records were mid-attempt when the process stopped, so the portal
/// may or may not have received them. They become `failed/transient`
/// without counting an attempt. Returns the number of records recovered.
pub async fn recover_interrupted(pool: &SqlitePool) -> StoreResult<u64> {
    let recovered = retry_on_lock("recover_interrupted", DEFAULT_MAX_LOCK_WAIT_MS, || {
        fail_pending(pool)
    })
    .await?;

    if recovered > 0 {
        warn!(recovered, "Recovered submissions interrupted mid-attempt");
    }
    Ok(recovered)
}

async fn fail_pending(pool: &SqlitePool) -> StoreResult<u64> {
    let now = now_rfc3339();
    let mut tx = pool.begin().await?;

    let pending: Vec<(i64, i64)> =
        sqlx::query_as("SELECT id, attempt_count FROM submissions WHERE status = 'pending'")
            .fetch_all(&mut *tx)
            .await?;

    for (id, attempt_count) in &pending {
        sqlx::query(
            r#"
            UPDATE submissions
            SET status = 'failed', error_kind = 'transient', last_error = ?, updated_at = ?
            WHERE id = ? AND status = 'pending'
            "#,
        )
        .bind(INTERRUPTED_MESSAGE)
        .bind(&now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        append_event(
            &mut tx,
            *id,
            Some(SubmissionStatus::Pending),
            SubmissionStatus::Failed,
            *attempt_count,
            Some(ErrorKind::Transient),
            Some(INTERRUPTED_MESSAGE),
            &now,
        )
        .await?;
    }

    tx.commit().await?;
    Ok(pending.len() as u64)
}

fn record_from_row(row: &SqliteRow) -> StoreResult<SubmissionRecord> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |message: String| StoreError::Corrupt { id, message };

    let status: String = row.try_get("status")?;
    let status = status.parse::<SubmissionStatus>().map_err(corrupt)?;

    let error_kind: Option<String> = row.try_get("error_kind")?;
    let error_kind = error_kind
        .map(|k| k.parse::<ErrorKind>())
        .transpose()
        .map_err(corrupt)?;

    let raw_payload: String = row.try_get("raw_payload")?;
    let raw_payload: RawPayload = serde_json::from_str(&raw_payload)
        .map_err(|e| corrupt(format!("raw_payload: {}", e)))?;

    let attempt_count: i64 = row.try_get("attempt_count")?;

    Ok(SubmissionRecord {
        id,
        source_submission_id: row.try_get("source_submission_id")?,
        display: DisplayFields {
            submitter_name: row.try_get("submitter_name")?,
            submitter_email: row.try_get("submitter_email")?,
            builder_name: row.try_get("builder_name")?,
            plan_name: row.try_get("plan_name")?,
        },
        status,
        attempt_count: u32::try_from(attempt_count)
            .map_err(|_| corrupt(format!("attempt_count {}", attempt_count)))?,
        error_kind,
        last_error: row.try_get("last_error")?,
        confirmation_code: row.try_get("confirmation_code")?,
        raw_payload,
        created_at: timestamp(row, "created_at", id)?,
        updated_at: timestamp(row, "updated_at", id)?,
        submitted_at: optional_timestamp(row, "submitted_at", id)?,
    })
}

fn event_from_row(row: &SqliteRow) -> StoreResult<SubmissionEvent> {
    let submission_id: i64 = row.try_get("submission_id")?;
    let corrupt = |message: String| StoreError::Corrupt {
        id: submission_id,
        message,
    };

    let from_status: Option<String> = row.try_get("from_status")?;
    let to_status: String = row.try_get("to_status")?;
    let error_kind: Option<String> = row.try_get("error_kind")?;
    let attempt_count: i64 = row.try_get("attempt_count")?;

    Ok(SubmissionEvent {
        id: row.try_get("id")?,
        submission_id,
        from_status: from_status
            .map(|s| s.parse::<SubmissionStatus>())
            .transpose()
            .map_err(corrupt)?,
        to_status: to_status.parse::<SubmissionStatus>().map_err(corrupt)?,
        attempt_count: u32::try_from(attempt_count)
            .map_err(|_| corrupt(format!("attempt_count {}", attempt_count)))?,
        error_kind: error_kind
            .map(|k| k.parse::<ErrorKind>())
            .transpose()
            .map_err(corrupt)?,
        message: row.try_get("message")?,
        created_at: timestamp(row, "created_at", submission_id)?,
    })
}

fn timestamp(row: &SqliteRow, column: &str, id: i64) -> StoreResult<DateTime<Utc>> {
    let value: String = row.try_get(column)?;
    parse_rfc3339(&value).map_err(|e| StoreError::Corrupt {
        id,
        message: format!("{}: {}", column, e),
    })
}

fn optional_timestamp(row: &SqliteRow, column: &str, id: i64) -> StoreResult<Option<DateTime<Utc>>> {
    let value: Option<String> = row.try_get(column)?;
    value
        .map(|v| {
            parse_rfc3339(&v).map_err(|e| StoreError::Corrupt {
                id,
                message: format!("{}: {}", column, e),
            })
        })
        .transpose()
}
