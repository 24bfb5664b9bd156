//! CSD portal client
//!
//! The portal is an ASP.NET WebForms page: each submission is a GET that
//! yields hidden view-state tokens and a session cookie, followed by a POST
//! of the form back to the same page. Errors are classified here into a
//! [`SubmitOutcome`] and never propagate past this boundary.

pub mod classifier;
pub mod client;
pub mod form_state;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::mapping::TargetPayload;

pub use classifier::ResponseClassifier;
pub use client::{ConnectionReport, HttpPortalClient};
pub use form_state::{extract_form_state, FormState};

/// Confirmation code stored when the portal accepted a submission without
/// showing a recognizable confirmation
pub const VERIFY_MANUALLY: &str = "VERIFY_MANUALLY";

/// Result of one submission attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Success { confirmation_code: String },
    Failure { retryable: bool, message: String },
}

impl SubmitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SubmitOutcome::Success { .. })
    }
}

/// Portal failures, before classification
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("Portal request failed: {0}")]
    Transport(String),

    #[error("Portal request timed out after {0}s")]
    Timeout(u64),

    #[error("Portal returned HTTP {0}")]
    Status(u16),

    #[error("Portal page is missing form state: {0}")]
    UnexpectedPage(String),

    /// The portal refused the submission; carries its message verbatim
    #[error("{0}")]
    Rejected(String),

    #[error("Invalid portal configuration: {0}")]
    Config(String),
}

impl PortalError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PortalError::Rejected(_) | PortalError::Config(_))
    }
}

impl From<PortalError> for SubmitOutcome {
    fn from(err: PortalError) -> Self {
        SubmitOutcome::Failure {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

/// Submits mapped payloads to the portal
#[async_trait]
pub trait PortalClient: Send + Sync {
    /// Make one submission attempt; never fails, every error is an outcome
    async fn submit(&self, payload: &TargetPayload) -> SubmitOutcome;
}
