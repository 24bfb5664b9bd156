//! HTTP portal client

use async_trait::async_trait;
use reqwest::cookie::Jar;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::classifier::ResponseClassifier;
use super::form_state::{extract_form_state, FormState};
use super::{PortalClient, PortalError, SubmitOutcome};
use crate::config::PortalConfig;
use crate::mapping::TargetPayload;

/// Result of a reachability check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionReport {
    pub url: String,
    pub status: u16,
    pub state_fields_found: Vec<String>,
    pub elapsed_ms: u64,
}

fn build_session(config: &PortalConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .cookie_provider(Arc::new(Jar::default()))
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
}

/// A client that cannot be built mid-attempt never reached the portal
fn session_error(err: impl std::fmt::Display) -> PortalError {
    PortalError::Transport(format!("HTTP client unavailable: {}", err))
}

/// Submits to the live portal over HTTP
///
/// Every attempt builds its own `reqwest::Client` with a fresh cookie jar,
/// so the ASP.NET session of one attempt is never reused by another.
pub struct HttpPortalClient {
    config: PortalConfig,
    classifier: ResponseClassifier,
}

impl HttpPortalClient {
    pub fn new(config: PortalConfig) -> Result<Self, PortalError> {
        let url = url::Url::parse(&config.url)
            .map_err(|e| PortalError::Config(format!("portal url '{}': {}", config.url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PortalError::Config(format!(
                "portal url '{}' must be http or https",
                config.url
            )));
        }
        if config.timeout_secs == 0 {
            return Err(PortalError::Config("timeout_secs must be greater than zero".to_string()));
        }

        let classifier = ResponseClassifier::new(&config.markers)?;
        // Settings the HTTP client rejects are a startup error
        build_session(&config).map_err(|e| PortalError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { config, classifier })
    }

    fn session(&self) -> Result<reqwest::Client, PortalError> {
        build_session(&self.config).map_err(session_error)
    }

    fn request_error(&self, err: reqwest::Error) -> PortalError {
        if err.is_timeout() {
            PortalError::Timeout(self.config.timeout_secs)
        } else {
            PortalError::Transport(err.to_string())
        }
    }

    /// GET the form page and read its state
    async fn fetch_form(&self, session: &reqwest::Client) -> Result<(u16, FormState), PortalError> {
        let response = session
            .get(&self.config.url)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            return Err(PortalError::Status(status));
        }

        let body = response.text().await.map_err(|e| self.request_error(e))?;
        let state = extract_form_state(
            &body,
            &self.config.state_fields,
            &self.config.required_state_fields,
        )?;
        Ok((status, state))
    }

    /// Form body in post order: hidden state, static fields, mapped fields
    pub fn build_form(&self, state: &FormState, payload: &TargetPayload) -> Vec<(String, String)> {
        let mut form: Vec<(String, String)> = state.hidden.clone();

        form.extend(
            self.config
                .static_fields
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        form.extend(payload.fields.iter().map(|(key, value)| {
            let name = if self.config.resolve_control_names {
                state.post_name(key)
            } else {
                key.as_str()
            };
            (name.to_string(), value.clone())
        }));

        form
    }

    async fn attempt(&self, payload: &TargetPayload) -> Result<SubmitOutcome, PortalError> {
        let session = self.session()?;

        let (_, state) = self.fetch_form(&session).await?;
        debug!(
            state_fields = state.hidden.len(),
            controls = state.control_names.len(),
            "Fetched portal form state"
        );

        let form = self.build_form(&state, payload);
        let response = session
            .post(&self.config.url)
            .form(&form)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.request_error(e))?;
        Ok(self.classifier.classify(status, &body))
    }

    /// Perform only the fetch phase and report what came back
    pub async fn check_connection(&self) -> Result<ConnectionReport, PortalError> {
        let started = Instant::now();
        let session = self.session()?;
        let (status, state) = self.fetch_form(&session).await?;

        let report = ConnectionReport {
            url: self.config.url.clone(),
            status,
            state_fields_found: state.hidden.into_iter().map(|(name, _)| name).collect(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            url = %report.url,
            status = report.status,
            elapsed_ms = report.elapsed_ms,
            "Portal connection check succeeded"
        );
        Ok(report)
    }
}

#[async_trait]
impl PortalClient for HttpPortalClient {
    async fn submit(&self, payload: &TargetPayload) -> SubmitOutcome {
        let started = Instant::now();
        let outcome = match self.attempt(payload).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, retryable = err.is_retryable(), "Portal submission failed");
                err.into()
            }
        };

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            success = outcome.is_success(),
            "Portal attempt finished"
        );
        outcome
    }
}
