//! JotForm webhook intake

use axum::{
    body::Bytes,
    extract::State,
    http::{header::CONTENT_TYPE, HeaderMap},
    routing::post,
    Json, Router,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ApiResult;
use crate::models::SubmissionStatus;
use crate::services::webhook::{parse_jotform_webhook, verify_signature, SIGNATURE_HEADER};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// POST /csd-webhook
///
/// Delivery problems (bad body, bad signature) are 4xx. Submission
/// problems are reported in `status`: the delivery itself was accepted.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookResponse>> {
    if let Some(secret) = state.webhook.secret.as_deref().filter(|s| !s.is_empty()) {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = verify_signature(secret, &body, signature, state.webhook.require_signature) {
            warn!(error = %e, "Rejected webhook delivery");
            return Err(e.into());
        }
    }

    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let parsed = parse_jotform_webhook(&body, content_type)?;
    info!(
        source_submission_id = %parsed.source_submission_id,
        fields = parsed.raw_payload.len(),
        "Received webhook delivery"
    );

    let outcome = state
        .pipeline
        .ingest(&parsed.source_submission_id, parsed.raw_payload)
        .await?;
    let record = outcome.record;

    Ok(Json(WebhookResponse {
        success: record.status == SubmissionStatus::Success,
        submission_id: record.source_submission_id,
        status: record.status,
        duplicate: outcome.duplicate,
        confirmation_code: record.confirmation_code,
        error: record.last_error,
    }))
}

pub fn webhook_routes() -> Router<AppState> {
    Router::new().route("/csd-webhook", post(receive_webhook))
}
