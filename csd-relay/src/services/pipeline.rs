//! Submission pipeline
//!
//! One attempt is strictly serial: claim the record, map with the current
//! configuration, gate on validation, call the portal, record the outcome.
//! The outcome is only written after the portal call has returned.

use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::in_flight::{InFlightGuard, InFlightRegistry};
use super::webhook::derive_display_fields;
use crate::db::submissions;
use crate::db::StoreError;
use crate::mapping::{map, MappingStore};
use crate::models::{AttemptOutcome, RawPayload, SubmissionRecord, SubmissionStatus};
use crate::portal::PortalClient;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Submission {0} not found")]
    NotFound(i64),

    #[error("Submission {0} already succeeded and cannot be retried")]
    NotRetryable(i64),

    #[error("Submission {0} has an attempt in progress")]
    InFlight(i64),
}

/// Result of `ingest`
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub record: SubmissionRecord,
    /// The id was already stored; nothing was attempted
    pub duplicate: bool,
}

#[derive(Clone)]
pub struct SubmissionPipeline {
    db: SqlitePool,
    mappings: Arc<MappingStore>,
    portal: Arc<dyn PortalClient>,
    in_flight: InFlightRegistry,
}

impl SubmissionPipeline {
    pub fn new(db: SqlitePool, mappings: Arc<MappingStore>, portal: Arc<dyn PortalClient>) -> Self {
        Self {
            db,
            mappings,
            portal,
            in_flight: InFlightRegistry::new(),
        }
    }

    pub fn db(&self) -> &SqlitePool {
        &self.db
    }

    pub fn mappings(&self) -> &Arc<MappingStore> {
        &self.mappings
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    /// Store a delivery and, if it is new, run its first attempt
    ///
    /// A duplicate delivery returns the stored record unchanged.
    pub async fn ingest(
        &self,
        source_submission_id: &str,
        raw_payload: RawPayload,
    ) -> Result<IngestOutcome, PipelineError> {
        let config = self.mappings.current().await;
        let display = derive_display_fields(&raw_payload, &config.display_fields);

        let (record, created) =
            submissions::upsert_pending(&self.db, source_submission_id, &raw_payload, &display).await?;

        if !created {
            info!(
                id = record.id,
                source_submission_id,
                status = %record.status,
                "Duplicate delivery ignored"
            );
            return Ok(IngestOutcome {
                record,
                duplicate: true,
            });
        }

        info!(id = record.id, source_submission_id, "Received new submission");

        let Some(guard) = self.in_flight.try_acquire(source_submission_id) else {
            return Ok(IngestOutcome {
                record,
                duplicate: false,
            });
        };

        let record = submissions::begin_attempt(&self.db, record.id, SubmissionStatus::Pending).await?;
        let record = self.run_attempt(record, guard).await?;
        Ok(IngestOutcome {
            record,
            duplicate: false,
        })
    }

    /// Retry any failed record, regardless of attempt count or failure kind
    ///
    /// A record left `pending` by an attempt that stopped before recording
    /// its outcome is picked up again here when nothing holds it.
    pub async fn manual_retry(&self, id: i64) -> Result<SubmissionRecord, PipelineError> {
        let record = submissions::get_by_id(&self.db, id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;
        if record.status == SubmissionStatus::Success {
            return Err(PipelineError::NotRetryable(id));
        }

        let guard = self
            .in_flight
            .try_acquire(&record.source_submission_id)
            .ok_or(PipelineError::InFlight(id))?;

        // Re-read under the guard; the status may have moved meanwhile
        let record = submissions::get_by_id(&self.db, id)
            .await?
            .ok_or(PipelineError::NotFound(id))?;

        let expected = match record.status {
            SubmissionStatus::Success => return Err(PipelineError::NotRetryable(id)),
            SubmissionStatus::Failed => SubmissionStatus::Failed,
            SubmissionStatus::Pending => {
                warn!(
                    id,
                    source_submission_id = %record.source_submission_id,
                    "Resuming pending submission with no attempt in flight"
                );
                SubmissionStatus::Pending
            }
        };

        info!(id, source_submission_id = %record.source_submission_id, "Manual retry requested");

        let started = match submissions::begin_attempt(&self.db, id, expected).await {
            Ok(record) => record,
            Err(StoreError::StateConflict { actual, .. }) => {
                return Err(if actual == SubmissionStatus::Success {
                    PipelineError::NotRetryable(id)
                } else {
                    PipelineError::InFlight(id)
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.run_attempt(started, guard).await
    }

    /// Scheduled retry of one candidate; `None` when it was skipped
    ///
    /// Skipped means another attempt holds the record, or it stopped being
    /// eligible (no longer a transient failure under `max_attempts`) since
    /// the candidate list was read.
    pub async fn retry_scheduled(
        &self,
        record: &SubmissionRecord,
        max_attempts: u32,
    ) -> Result<Option<SubmissionRecord>, PipelineError> {
        let Some(guard) = self.in_flight.try_acquire(&record.source_submission_id) else {
            debug!(id = record.id, "Retry skipped: attempt already in flight");
            return Ok(None);
        };

        let Some(started) = submissions::begin_scheduled_retry(&self.db, record.id, max_attempts).await?
        else {
            debug!(id = record.id, "Retry skipped: no longer eligible");
            return Ok(None);
        };

        Ok(Some(self.run_attempt(started, guard).await?))
    }

    /// Run one attempt on a record already moved to `pending`
    ///
    /// The caller's in-flight guard is held until the outcome is written.
    async fn run_attempt(
        &self,
        record: SubmissionRecord,
        _guard: InFlightGuard,
    ) -> Result<SubmissionRecord, PipelineError> {
        let id = record.id;
        let config = self.mappings.current().await;
        let (payload, report) = map(&record.raw_payload, &config);

        for warning in &report.warnings {
            warn!(id, source_submission_id = %record.source_submission_id, "{}", warning);
        }

        let outcome = if report.is_valid() {
            debug!(
                id,
                fields = payload.fields.len(),
                mapping_version = %config.version,
                "Submitting to portal"
            );
            AttemptOutcome::Submitted(self.portal.submit(&payload).await)
        } else {
            warn!(
                id,
                source_submission_id = %record.source_submission_id,
                errors = report.errors.len(),
                "Submission failed validation: {}",
                report.error_summary()
            );
            AttemptOutcome::Invalid {
                message: report.error_summary(),
            }
        };

        Ok(submissions::record_outcome(&self.db, id, &outcome).await?)
    }
}
