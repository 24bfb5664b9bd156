//! Scripted portal stand-in

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use csd_relay::mapping::TargetPayload;
use csd_relay::portal::{PortalClient, SubmitOutcome};

pub fn success(code: &str) -> SubmitOutcome {
    SubmitOutcome::Success {
        confirmation_code: code.to_string(),
    }
}

pub fn transient(message: &str) -> SubmitOutcome {
    SubmitOutcome::Failure {
        retryable: true,
        message: message.to_string(),
    }
}

pub fn rejected(message: &str) -> SubmitOutcome {
    SubmitOutcome::Failure {
        retryable: false,
        message: message.to_string(),
    }
}

/// Returns scripted outcomes in order, then `fallback` forever
pub struct FakePortal {
    script: Mutex<VecDeque<SubmitOutcome>>,
    fallback: SubmitOutcome,
    delay: Duration,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    payloads: Mutex<Vec<TargetPayload>>,
}

impl FakePortal {
    pub fn scripted(outcomes: Vec<SubmitOutcome>, fallback: SubmitOutcome) -> Self {
        Self {
            script: Mutex::new(outcomes.into()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::always(success("CSD-0001"))
    }

    pub fn always(outcome: SubmitOutcome) -> Self {
        Self::scripted(Vec::new(), outcome)
    }

    /// Hold each call open for `delay` before answering
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were open at the same time
    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn last_payload(&self) -> Option<TargetPayload> {
        self.payloads.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl PortalClient for FakePortal {
    async fn submit(&self, payload: &TargetPayload) -> SubmitOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.payloads.lock().unwrap().push(payload.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
