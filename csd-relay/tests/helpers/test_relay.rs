//! In-process relay over a temporary root folder

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use csd_common::db::init_database;
use csd_relay::config::WebhookConfig;
use csd_relay::db::mapping_history;
use csd_relay::mapping::MappingStore;
use csd_relay::models::RawPayload;
use csd_relay::services::{RetryPolicy, SubmissionPipeline};
use csd_relay::{build_router, AppState};

use super::FakePortal;

/// Small mapping covering required fields, a value map and composite notes
pub const TEST_MAPPING: &str = r#"{
  "version": "1.0",
  "last_updated": "2025-02-03T10:15:00",
  "composite_notes_field": "ctl00_cphBody_txtSpecialInstructions",
  "mappings": [
    {"source_field": "builderName", "label": "Builder Name", "target_field": "ctl00_cphBody_txtBuilderName", "required": true},
    {"source_field": "planName", "label": "Plan Name", "target_field": "ctl00_cphBody_txtPlanName", "required": true},
    {"source_field": "projectName", "label": "Project Name", "target_field": "ctl00_cphBody_txtProjectName", "required": true},
    {"source_field": "roofType", "label": "Roof Framing", "target_field": "rblRoofingFrame", "target_type": "radio",
     "transform": "map_roof_type", "value_mapping": {"Trussed by Others": "Trusses", "Trussed by CBC": "Trusses"}},
    {"source_field": "jobNotes", "label": "Job Notes", "target_field": "COMPOSITE_NOTES", "transform": "append_to_notes"},
    {"source_field": "isThis", "label": "Revision", "target_field": "PLACEHOLDER_REVISION"}
  ]
}"#;

/// A payload that satisfies every required rule in `TEST_MAPPING`
pub fn complete_payload() -> RawPayload {
    json!({
        "builderName": "Acme Homes",
        "planName": "Plan A",
        "projectName": "Acme - Plan A",
        "roofType": "Trussed by Others",
        "jobNotes": "Call before delivery",
        "salesman": "Pat Lee",
    })
    .as_object()
    .cloned()
    .unwrap()
}

/// JotForm-style JSON delivery with answers in `rawRequest`
pub fn webhook_body(submission_id: &str, answers: Value) -> Value {
    json!({
        "submissionID": submission_id,
        "formID": "240734091032042",
        "formTitle": "Design Request",
        "rawRequest": answers,
    })
}

pub struct TestRelay {
    pub router: Router,
    pub state: AppState,
    pub portal: Arc<FakePortal>,
    pub mapping_path: PathBuf,
    _dir: TempDir,
}

impl TestRelay {
    pub async fn start(portal: FakePortal) -> Self {
        Self::start_with(portal, WebhookConfig::default()).await
    }

    pub async fn start_with(portal: FakePortal, webhook: WebhookConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mapping_path = dir.path().join("field_mapping.json");
        std::fs::write(&mapping_path, TEST_MAPPING).unwrap();

        let pool = init_database(&dir.path().join("submissions.db")).await.unwrap();
        let mappings = Arc::new(MappingStore::load(&mapping_path).unwrap());
        mapping_history::record_if_changed(&pool, &*mappings.current().await, "startup")
            .await
            .unwrap();

        let portal = Arc::new(portal);
        let pipeline = SubmissionPipeline::new(pool, mappings, portal.clone());
        let state = AppState::new(pipeline, RetryPolicy::default(), webhook);
        let router = build_router(state.clone());

        Self {
            router,
            state,
            portal,
            mapping_path,
            _dir: dir,
        }
    }

    pub fn pipeline(&self) -> &SubmissionPipeline {
        &self.state.pipeline
    }

    /// Send a request; an empty body decodes to `Value::Null`
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post(&self, path: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::empty())
            .unwrap();
        self.send(request).await
    }

    pub async fn post_json(&self, path: &str, body: &Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Replace the mapping file on disk (takes effect on reload)
    pub fn write_mapping(&self, document: &str) {
        std::fs::write(&self.mapping_path, document).unwrap();
    }
}
