//! Submission record and its state machine
//!
//! ```text
//! pending --validation errors--> failed (validation)
//! pending --portal success-----> success
//! pending --retryable failure--> failed (transient)
//! pending --rejection----------> failed (rejected)
//! failed  --retry--------------> pending
//! ```
//!
//! `success` is terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::portal::SubmitOutcome;

/// Inbound key/value data, stored verbatim
pub type RawPayload = serde_json::Map<String, serde_json::Value>;

/// Submission lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Success,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Success => "success",
            SubmissionStatus::Failed => "failed",
        }
    }

    /// Legal edges of the state machine
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Success) | (Pending, Failed) | (Failed, Pending)
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == SubmissionStatus::Success
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "success" => Ok(SubmissionStatus::Success),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(format!("Unknown submission status: {}", other)),
        }
    }
}

/// Why a record is `failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Required fields missing; no portal call was made
    Validation,
    /// Network, timeout, or unrecognized response; eligible for scheduled retry
    Transient,
    /// The portal refused the submission
    Rejected,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Transient => "transient",
            ErrorKind::Rejected => "rejected",
        }
    }

    pub fn is_retryable(&self) -> bool {
        *self == ErrorKind::Transient
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validation" => Ok(ErrorKind::Validation),
            "transient" => Ok(ErrorKind::Transient),
            "rejected" => Ok(ErrorKind::Rejected),
            other => Err(format!("Unknown error kind: {}", other)),
        }
    }
}

/// Denormalized columns shown on the dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFields {
    pub submitter_name: Option<String>,
    pub submitter_email: Option<String>,
    pub builder_name: Option<String>,
    pub plan_name: Option<String>,
}

/// One inbound submission and its delivery state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub source_submission_id: String,
    #[serde(flatten)]
    pub display: DisplayFields,
    pub status: SubmissionStatus,
    pub attempt_count: u32,
    pub error_kind: Option<ErrorKind>,
    pub last_error: Option<String>,
    pub confirmation_code: Option<String>,
    pub raw_payload: RawPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl SubmissionRecord {
    /// Eligible for a scheduled retry (attempt limit aside)
    pub fn is_retryable(&self) -> bool {
        self.status == SubmissionStatus::Failed
            && self.error_kind.map(|k| k.is_retryable()).unwrap_or(false)
    }
}

/// Result of one pass through the attempt pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Mapping produced validation errors; the portal was not called
    Invalid { message: String },
    /// The portal was called
    Submitted(SubmitOutcome),
}

/// Column values an outcome writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub status: SubmissionStatus,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub confirmation_code: Option<String>,
    pub counts_as_attempt: bool,
}

impl AttemptOutcome {
    pub fn resolve(&self) -> Resolution {
        match self {
            AttemptOutcome::Invalid { message } => Resolution {
                status: SubmissionStatus::Failed,
                error_kind: Some(ErrorKind::Validation),
                message: Some(message.clone()),
                confirmation_code: None,
                counts_as_attempt: false,
            },
            AttemptOutcome::Submitted(SubmitOutcome::Success { confirmation_code }) => Resolution {
                status: SubmissionStatus::Success,
                error_kind: None,
                message: None,
                confirmation_code: Some(confirmation_code.clone()),
                counts_as_attempt: true,
            },
            AttemptOutcome::Submitted(SubmitOutcome::Failure { retryable, message }) => Resolution {
                status: SubmissionStatus::Failed,
                error_kind: Some(if *retryable {
                    ErrorKind::Transient
                } else {
                    ErrorKind::Rejected
                }),
                message: Some(message.clone()),
                confirmation_code: None,
                counts_as_attempt: true,
            },
        }
    }
}

/// One status transition, as recorded in `submission_events`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmissionEvent {
    pub id: i64,
    pub submission_id: i64,
    pub from_status: Option<SubmissionStatus>,
    pub to_status: SubmissionStatus,
    pub attempt_count: u32,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Dashboard totals
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionStats {
    pub total: i64,
    pub pending: i64,
    pub success: i64,
    pub failed: i64,
    /// Failed with a transient error
    pub retryable: i64,
    pub validation_failures: i64,
    pub rejected: i64,
}
