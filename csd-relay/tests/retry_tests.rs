//! Background retry scheduler tests

mod helpers;

use std::time::Duration;
use tokio_util::sync::CancellationToken;

use csd_relay::db::submissions;
use csd_relay::models::SubmissionStatus;
use csd_relay::services::RetryPolicy;
use helpers::{complete_payload, success, transient, FakePortal, TestRelay};

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        enabled: true,
        max_attempts: 3,
        interval: Duration::from_millis(50),
        max_interval: Duration::from_millis(200),
        multiplier: 2.0,
    }
}

#[tokio::test]
async fn test_scheduler_retries_until_success() {
    let relay = TestRelay::start(FakePortal::scripted(
        vec![transient("Portal returned HTTP 503")],
        success("CSD-9009"),
    ))
    .await;
    let record = relay.pipeline().ingest("7001", complete_payload()).await.unwrap().record;
    assert_eq!(record.status, SubmissionStatus::Failed);

    let cancel = CancellationToken::new();
    let handle = relay.state.orchestrator.clone().spawn(fast_policy(), cancel.clone());

    let mut status = record.status;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        status = submissions::get_by_id(relay.pipeline().db(), record.id)
            .await
            .unwrap()
            .unwrap()
            .status;
        if status == SubmissionStatus::Success {
            break;
        }
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();

    assert_eq!(status, SubmissionStatus::Success);
    assert_eq!(relay.portal.calls(), 2);
}

#[tokio::test]
async fn test_scheduler_respects_attempt_limit() {
    let relay = TestRelay::start(FakePortal::always(transient("Portal returned HTTP 503"))).await;
    relay.pipeline().ingest("7002", complete_payload()).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = relay.state.orchestrator.clone().spawn(fast_policy(), cancel.clone());

    // Well past enough passes to exhaust three attempts
    tokio::time::sleep(Duration::from_millis(1500)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(relay.portal.calls(), 3);
}

#[tokio::test]
async fn test_disabled_scheduler_exits_immediately() {
    let relay = TestRelay::start(FakePortal::always(transient("Portal returned HTTP 503"))).await;
    relay.pipeline().ingest("7003", complete_payload()).await.unwrap();

    let policy = RetryPolicy {
        enabled: false,
        ..fast_policy()
    };
    let handle = relay
        .state
        .orchestrator
        .clone()
        .spawn(policy, CancellationToken::new());

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("disabled scheduler kept running")
        .unwrap();
    assert_eq!(relay.portal.calls(), 1);
}
