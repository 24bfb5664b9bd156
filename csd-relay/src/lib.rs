//! csd-relay library interface
//!
//! Relays JotForm submissions into the CSD design portal: field mapping,
//! portal submission, a persistent submission store, and retries.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod mapping;
pub mod models;
pub mod portal;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::WebhookConfig;
use crate::services::{RetryOrchestrator, RetryPolicy, SubmissionPipeline};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub pipeline: SubmissionPipeline,
    pub orchestrator: RetryOrchestrator,
    pub retry_policy: RetryPolicy,
    pub webhook: Arc<WebhookConfig>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(pipeline: SubmissionPipeline, retry_policy: RetryPolicy, webhook: WebhookConfig) -> Self {
        Self {
            db: pipeline.db().clone(),
            orchestrator: RetryOrchestrator::new(pipeline.clone()),
            pipeline,
            retry_policy,
            webhook: Arc::new(webhook),
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::webhook_routes())
        .merge(api::submission_routes())
        .merge(api::mapping_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
