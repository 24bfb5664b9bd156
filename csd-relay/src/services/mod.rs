//! Submission services: pipeline, retry orchestration, webhook intake

pub mod in_flight;
pub mod pipeline;
pub mod retry_orchestrator;
pub mod webhook;

pub use in_flight::{InFlightGuard, InFlightRegistry};
pub use pipeline::{IngestOutcome, PipelineError, SubmissionPipeline};
pub use retry_orchestrator::{BackoffSchedule, RetryOrchestrator, RetryPassSummary, RetryPolicy};
pub use webhook::{
    derive_display_fields, parse_jotform_webhook, verify_signature, ParsedSubmission, WebhookError,
};
