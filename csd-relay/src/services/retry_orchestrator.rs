//! Retry orchestrator
//!
//! A retry pass reads the transient failures that still have attempts left
//! and re-runs the pipeline on each, one at a time. The background loop
//! runs passes on a schedule that backs off while failures persist.

use serde::Serialize;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::pipeline::{PipelineError, SubmissionPipeline};
use crate::config::RetryConfig;
use crate::db::submissions;
use crate::models::SubmissionStatus;

/// Scheduled retry policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_attempts: u32,
    pub interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        let interval = Duration::from_secs(config.interval_secs.max(1));
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts,
            interval,
            max_interval: Duration::from_secs(config.max_interval_secs).max(interval),
            multiplier: if config.multiplier.is_finite() && config.multiplier >= 1.0 {
                config.multiplier
            } else {
                1.0
            },
        }
    }
}

/// Delay before the next pass
///
/// Grows by `multiplier` (capped at `max_interval`) after a pass that left
/// failures, and drops back to `interval` after a clean pass.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    interval: Duration,
    max_interval: Duration,
    multiplier: f64,
    current: Duration,
}

impl BackoffSchedule {
    pub fn new(policy: &RetryPolicy) -> Self {
        Self {
            interval: policy.interval,
            max_interval: policy.max_interval,
            multiplier: policy.multiplier,
            current: policy.interval,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    /// Update after a pass; `had_failures` covers both failed records and a failed pass
    pub fn after_pass(&mut self, had_failures: bool) -> Duration {
        self.current = if had_failures {
            self.current.mul_f64(self.multiplier).min(self.max_interval)
        } else {
            self.interval
        };
        self.current
    }
}

/// Counts from one retry pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryPassSummary {
    pub candidates: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Clone)]
pub struct RetryOrchestrator {
    pipeline: SubmissionPipeline,
}

impl RetryOrchestrator {
    pub fn new(pipeline: SubmissionPipeline) -> Self {
        Self { pipeline }
    }

    /// Retry every eligible record once, sequentially
    pub async fn run_retry_pass(&self, max_attempts: u32) -> Result<RetryPassSummary, PipelineError> {
        let candidates = submissions::list_for_retry(self.pipeline.db(), max_attempts).await?;
        let mut summary = RetryPassSummary {
            candidates: candidates.len(),
            ..Default::default()
        };

        if candidates.is_empty() {
            debug!("Retry pass: no candidates");
            return Ok(summary);
        }

        info!(candidates = candidates.len(), max_attempts, "Starting retry pass");

        for record in &candidates {
            match self.pipeline.retry_scheduled(record, max_attempts).await? {
                None => summary.skipped += 1,
                Some(updated) if updated.status == SubmissionStatus::Success => summary.succeeded += 1,
                Some(_) => summary.failed += 1,
            }
        }

        info!(
            candidates = summary.candidates,
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            "Retry pass complete"
        );
        Ok(summary)
    }

    /// Run passes in the background until `cancel` fires
    pub fn spawn(self, policy: RetryPolicy, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            if !policy.enabled {
                info!("Scheduled retries disabled");
                return;
            }

            let mut schedule = BackoffSchedule::new(&policy);
            info!(
                interval_secs = policy.interval.as_secs(),
                max_attempts = policy.max_attempts,
                "Retry scheduler started"
            );

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(schedule.current()) => {}
                }

                let had_failures = match self.run_retry_pass(policy.max_attempts).await {
                    Ok(summary) => summary.failed > 0,
                    Err(e) => {
                        error!(error = %e, "Retry pass failed");
                        true
                    }
                };

                let next = schedule.after_pass(had_failures);
                debug!(next_pass_secs = next.as_secs(), "Next retry pass scheduled");
            }

            info!("Retry scheduler stopped");
        })
    }
}
