//! Field mapping version history

use chrono::{DateTime, Utc};
use csd_common::db::retry_on_lock;
use csd_common::db::retry::DEFAULT_MAX_LOCK_WAIT_MS;
use csd_common::time::{now_rfc3339, parse_rfc3339};
use csd_common::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::mapping::MappingConfiguration;

/// One recorded mapping version
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingHistoryEntry {
    pub id: i64,
    pub change_date: DateTime<Utc>,
    pub mapping_version: String,
    #[serde(skip)]
    pub mapping_data: String,
    pub notes: Option<String>,
}

/// Most recently recorded mapping version
pub async fn latest_version(pool: &SqlitePool) -> Result<Option<String>> {
    let version: Option<String> =
        sqlx::query_scalar("SELECT mapping_version FROM mapping_history ORDER BY id DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;
    Ok(version)
}

/// Append a history row when the configuration's version differs from the last recorded one
///
/// Returns true when a row was written.
pub async fn record_if_changed(
    pool: &SqlitePool,
    config: &MappingConfiguration,
    notes: &str,
) -> Result<bool> {
    if latest_version(pool).await?.as_deref() == Some(config.version.as_str()) {
        return Ok(false);
    }

    let change_date = now_rfc3339();
    let change_date = change_date.as_str();
    let version = config.version.as_str();
    let document = config.document.as_str();

    retry_on_lock("record_mapping_history", DEFAULT_MAX_LOCK_WAIT_MS, || async move {
        sqlx::query(
            "INSERT INTO mapping_history (change_date, mapping_version, mapping_data, notes) VALUES (?, ?, ?, ?)",
        )
        .bind(change_date)
        .bind(version)
        .bind(document)
        .bind(notes)
        .execute(pool)
        .await
        .map_err(csd_common::Error::Database)?;

        Ok::<(), csd_common::Error>(())
    })
    .await?;

    info!(version = %config.version, notes, "Recorded mapping version");
    Ok(true)
}

/// Recorded versions, newest first
pub async fn list(pool: &SqlitePool, limit: i64) -> Result<Vec<MappingHistoryEntry>> {
    let rows = sqlx::query(
        "SELECT id, change_date, mapping_version, mapping_data, notes FROM mapping_history ORDER BY id DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            let change_date: String = row.try_get("change_date")?;
            Ok(MappingHistoryEntry {
                id: row.try_get("id")?,
                change_date: parse_rfc3339(&change_date)?,
                mapping_version: row.try_get("mapping_version")?,
                mapping_data: row.try_get("mapping_data")?,
                notes: row.try_get("notes")?,
            })
        })
        .collect()
}
