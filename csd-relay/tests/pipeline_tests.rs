//! Submission pipeline integration tests
//!
//! Drives ingest, scheduled retries and manual retries against a real
//! SQLite file and a scripted portal.

mod helpers;

use std::time::Duration;

use csd_relay::db::submissions;
use csd_relay::models::{ErrorKind, SubmissionStatus};
use csd_relay::services::PipelineError;
use helpers::{complete_payload, rejected, success, transient, FakePortal, TestRelay, TEST_MAPPING};

#[tokio::test]
async fn test_ingest_submits_mapped_payload() {
    let relay = TestRelay::start(FakePortal::always(success("CSD-1001"))).await;

    let outcome = relay.pipeline().ingest("5001", complete_payload()).await.unwrap();

    assert!(!outcome.duplicate);
    let record = outcome.record;
    assert_eq!(record.status, SubmissionStatus::Success);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.confirmation_code.as_deref(), Some("CSD-1001"));
    assert_eq!(record.display.builder_name.as_deref(), Some("Acme Homes"));
    assert_eq!(record.display.submitter_name.as_deref(), Some("Pat Lee"));
    assert!(record.submitted_at.is_some());

    let sent = relay.portal.last_payload().unwrap();
    assert_eq!(sent.fields["rblRoofingFrame"], "Trusses");
    assert_eq!(sent.fields["ctl00_cphBody_txtProjectName"], "Acme - Plan A");
    assert_eq!(
        sent.fields["ctl00_cphBody_txtSpecialInstructions"],
        "=== SUBMISSION DETAILS ===\nJob Notes: Call before delivery"
    );
    assert!(!sent.fields.contains_key("PLACEHOLDER_REVISION"));
}

#[tokio::test]
async fn test_duplicate_delivery_is_ignored() {
    let relay = TestRelay::start(FakePortal::succeeding()).await;

    let first = relay.pipeline().ingest("5002", complete_payload()).await.unwrap();
    let second = relay.pipeline().ingest("5002", complete_payload()).await.unwrap();

    assert!(!first.duplicate);
    assert!(second.duplicate);
    assert_eq!(second.record.id, first.record.id);
    assert_eq!(second.record.status, SubmissionStatus::Success);
    assert_eq!(relay.portal.calls(), 1);

    let all = submissions::list_all(relay.pipeline().db(), None, 100).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn test_missing_required_field_never_reaches_portal() {
    let relay = TestRelay::start(FakePortal::succeeding()).await;
    let mut payload = complete_payload();
    payload.remove("projectName");

    let record = relay.pipeline().ingest("5003", payload).await.unwrap().record;

    assert_eq!(record.status, SubmissionStatus::Failed);
    assert_eq!(record.error_kind, Some(ErrorKind::Validation));
    assert_eq!(record.attempt_count, 0);
    assert!(record
        .last_error
        .as_deref()
        .unwrap()
        .contains("Required field missing: Project Name"));
    assert_eq!(relay.portal.calls(), 0);

    // Validation failures are never scheduled
    let candidates = submissions::list_for_retry(relay.pipeline().db(), 3).await.unwrap();
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn test_transient_failure_recovers_on_retry_pass() {
    let relay = TestRelay::start(FakePortal::scripted(
        vec![transient("Portal returned HTTP 503")],
        success("CSD-2002"),
    ))
    .await;

    let record = relay.pipeline().ingest("5004", complete_payload()).await.unwrap().record;
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert_eq!(record.error_kind, Some(ErrorKind::Transient));
    assert_eq!(record.attempt_count, 1);
    assert_eq!(record.last_error.as_deref(), Some("Portal returned HTTP 503"));

    let summary = relay.state.orchestrator.run_retry_pass(3).await.unwrap();
    assert_eq!(summary.candidates, 1);
    assert_eq!(summary.succeeded, 1);

    let record = submissions::get_by_id(relay.pipeline().db(), record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Success);
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.confirmation_code.as_deref(), Some("CSD-2002"));
    assert_eq!(record.error_kind, None);

    let history = submissions::history(relay.pipeline().db(), record.id).await.unwrap();
    let path: Vec<SubmissionStatus> = history.iter().map(|e| e.to_status).collect();
    assert_eq!(
        path,
        vec![
            SubmissionStatus::Pending,
            SubmissionStatus::Failed,
            SubmissionStatus::Pending,
            SubmissionStatus::Success,
        ]
    );
}

#[tokio::test]
async fn test_rejection_waits_for_manual_retry() {
    let relay = TestRelay::start(FakePortal::scripted(
        vec![rejected("Lot number already used")],
        success("CSD-3003"),
    ))
    .await;

    let record = relay.pipeline().ingest("5005", complete_payload()).await.unwrap().record;
    assert_eq!(record.error_kind, Some(ErrorKind::Rejected));
    assert_eq!(record.last_error.as_deref(), Some("Lot number already used"));

    let summary = relay.state.orchestrator.run_retry_pass(3).await.unwrap();
    assert_eq!(summary.candidates, 0);
    assert_eq!(relay.portal.calls(), 1);

    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Success);
    assert_eq!(record.attempt_count, 2);
}

#[tokio::test]
async fn test_scheduled_retries_stop_at_max_attempts() {
    let relay = TestRelay::start(FakePortal::always(transient("Portal request timed out after 30s"))).await;

    let record = relay.pipeline().ingest("5006", complete_payload()).await.unwrap().record;
    for _ in 0..4 {
        relay.state.orchestrator.run_retry_pass(3).await.unwrap();
    }

    let record = submissions::get_by_id(relay.pipeline().db(), record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempt_count, 3);
    assert_eq!(relay.portal.calls(), 3);
    assert!(record.is_retryable());

    // The limit only binds the scheduler
    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.attempt_count, 4);
    assert_eq!(relay.portal.calls(), 4);
}

#[tokio::test]
async fn test_manual_retry_refusals() {
    let relay = TestRelay::start(FakePortal::succeeding()).await;
    let record = relay.pipeline().ingest("5007", complete_payload()).await.unwrap().record;

    assert!(matches!(
        relay.pipeline().manual_retry(record.id).await,
        Err(PipelineError::NotRetryable(_))
    ));
    assert!(matches!(
        relay.pipeline().manual_retry(9999).await,
        Err(PipelineError::NotFound(9999))
    ));
    assert_eq!(relay.portal.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_attempt_in_flight_per_submission() {
    let relay = TestRelay::start(
        FakePortal::always(transient("Portal returned HTTP 502")).with_delay(Duration::from_millis(300)),
    )
    .await;
    let id = relay.pipeline().ingest("5008", complete_payload()).await.unwrap().record.id;
    assert_eq!(relay.portal.calls(), 1);

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let pipeline = relay.pipeline().clone();
        tasks.push(tokio::spawn(async move { pipeline.manual_retry(id).await }));
    }
    let orchestrator = relay.state.orchestrator.clone();
    let pass = tokio::spawn(async move { orchestrator.run_retry_pass(3).await });

    let mut attempted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => attempted += 1,
            Err(PipelineError::InFlight(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    let summary = pass.await.unwrap().unwrap();
    attempted += summary.succeeded + summary.failed;

    assert_eq!(attempted, 1);
    assert_eq!(relay.portal.calls(), 2);
    assert_eq!(relay.portal.max_concurrency(), 1);

    let record = submissions::get_by_id(relay.pipeline().db(), id).await.unwrap().unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(record.status, SubmissionStatus::Failed);
}

#[tokio::test]
async fn test_interrupted_attempts_recovered_as_transient() {
    let relay = TestRelay::start(FakePortal::succeeding()).await;
    let db = relay.pipeline().db();

    let (record, created) =
        submissions::upsert_pending(db, "5009", &complete_payload(), &Default::default())
            .await
            .unwrap();
    assert!(created);

    let recovered = submissions::recover_interrupted(db).await.unwrap();
    assert_eq!(recovered, 1);

    let record = submissions::get_by_id(db, record.id).await.unwrap().unwrap();
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert_eq!(record.error_kind, Some(ErrorKind::Transient));
    assert_eq!(record.attempt_count, 0);
    assert_eq!(record.last_error.as_deref(), Some(submissions::INTERRUPTED_MESSAGE));

    let summary = relay.state.orchestrator.run_retry_pass(3).await.unwrap();
    assert_eq!(summary.succeeded, 1);
}

#[tokio::test]
async fn test_mapping_fix_then_manual_retry() {
    let relay = TestRelay::start(FakePortal::always(success("CSD-4004"))).await;
    let mut payload = complete_payload();
    payload.remove("projectName");

    let record = relay.pipeline().ingest("5010", payload).await.unwrap().record;
    assert_eq!(record.error_kind, Some(ErrorKind::Validation));

    let fixed = TEST_MAPPING
        .replace(r#""version": "1.0""#, r#""version": "1.1""#)
        .replace(
            r#""target_field": "ctl00_cphBody_txtProjectName", "required": true"#,
            r#""target_field": "ctl00_cphBody_txtProjectName", "required": true, "fallback": "{builderName} - {planName}""#,
        );
    relay.write_mapping(&fixed);
    let config = relay.pipeline().mappings().reload().await.unwrap();
    assert_eq!(config.version, "1.1");

    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Success);
    assert_eq!(record.attempt_count, 1);
    assert_eq!(
        relay.portal.last_payload().unwrap().fields["ctl00_cphBody_txtProjectName"],
        "Acme Homes - Plan A"
    );
}

#[tokio::test]
async fn test_stale_candidate_rejected_by_manual_retry_is_not_resubmitted() {
    let relay = TestRelay::start(FakePortal::scripted(
        vec![transient("Portal returned HTTP 503"), rejected("Lot number already used")],
        success("CSD-5005"),
    ))
    .await;

    let record = relay.pipeline().ingest("5011", complete_payload()).await.unwrap().record;
    let candidates = submissions::list_for_retry(relay.pipeline().db(), 3).await.unwrap();
    assert_eq!(candidates.len(), 1);

    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.error_kind, Some(ErrorKind::Rejected));

    for candidate in &candidates {
        let outcome = relay.pipeline().retry_scheduled(candidate, 3).await.unwrap();
        assert!(outcome.is_none());
    }

    let record = submissions::get_by_id(relay.pipeline().db(), record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, SubmissionStatus::Failed);
    assert_eq!(record.error_kind, Some(ErrorKind::Rejected));
    assert_eq!(record.attempt_count, 2);
    assert_eq!(relay.portal.calls(), 2);
}

#[tokio::test]
async fn test_stale_candidate_over_attempt_limit_is_not_resubmitted() {
    let relay = TestRelay::start(FakePortal::always(transient("Portal returned HTTP 503"))).await;

    let record = relay.pipeline().ingest("5012", complete_payload()).await.unwrap().record;
    let candidates = submissions::list_for_retry(relay.pipeline().db(), 2).await.unwrap();
    assert_eq!(candidates.len(), 1);

    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.attempt_count, 2);

    let outcome = relay.pipeline().retry_scheduled(&candidates[0], 2).await.unwrap();
    assert!(outcome.is_none());

    let record = submissions::get_by_id(relay.pipeline().db(), record.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.attempt_count, 2);
    assert_eq!(relay.portal.calls(), 2);
}

#[tokio::test]
async fn test_manual_retry_resumes_stranded_pending_record() {
    let relay = TestRelay::start(FakePortal::scripted(
        vec![transient("Portal returned HTTP 503")],
        success("CSD-6006"),
    ))
    .await;
    let db = relay.pipeline().db();

    let record = relay.pipeline().ingest("5013", complete_payload()).await.unwrap().record;
    assert_eq!(record.status, SubmissionStatus::Failed);

    // An attempt that started but never recorded its outcome
    let stranded = submissions::begin_attempt(db, record.id, SubmissionStatus::Failed)
        .await
        .unwrap();
    assert_eq!(stranded.status, SubmissionStatus::Pending);
    assert!(!relay.pipeline().in_flight().is_in_flight("5013"));

    let record = relay.pipeline().manual_retry(record.id).await.unwrap();
    assert_eq!(record.status, SubmissionStatus::Success);
    assert_eq!(record.confirmation_code.as_deref(), Some("CSD-6006"));
    assert_eq!(record.attempt_count, 2);
    assert_eq!(relay.portal.calls(), 2);
}

#[tokio::test]
async fn test_manual_retry_refused_while_attempt_holds_record() {
    let relay = TestRelay::start(FakePortal::succeeding()).await;
    let db = relay.pipeline().db();

    let (record, _) = submissions::upsert_pending(db, "5014", &complete_payload(), &Default::default())
        .await
        .unwrap();
    let _guard = relay.pipeline().in_flight().try_acquire("5014").unwrap();

    assert!(matches!(
        relay.pipeline().manual_retry(record.id).await,
        Err(PipelineError::InFlight(_))
    ));
    assert_eq!(relay.portal.calls(), 0);
}
