//! Field mapping summary and reload

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::warn;

use crate::db::mapping_history::{self, MappingHistoryEntry};
use crate::error::ApiResult;
use crate::mapping::MappingSummary;
use crate::AppState;

/// GET /api/mapping/summary
pub async fn mapping_summary(State(state): State<AppState>) -> Json<MappingSummary> {
    Json(state.pipeline.mappings().current().await.summary())
}

/// GET /api/mapping/history
pub async fn list_mapping_history(State(state): State<AppState>) -> ApiResult<Json<Vec<MappingHistoryEntry>>> {
    Ok(Json(mapping_history::list(&state.db, 50).await?))
}

/// POST /api/mapping/reload
///
/// Re-reads the mapping file. An invalid file is rejected with 422 and
/// the active mapping is kept.
pub async fn reload_mapping(State(state): State<AppState>) -> ApiResult<Json<MappingSummary>> {
    let config = state.pipeline.mappings().reload().await?;

    if let Err(e) = mapping_history::record_if_changed(&state.db, &config, "reloaded via API").await {
        warn!(error = %e, "Failed to record mapping history");
    }

    Ok(Json(config.summary()))
}

pub fn mapping_routes() -> Router<AppState> {
    Router::new()
        .route("/api/mapping/summary", get(mapping_summary))
        .route("/api/mapping/history", get(list_mapping_history))
        .route("/api/mapping/reload", post(reload_mapping))
}
