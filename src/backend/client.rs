//! Backend access: the `ReportBackend` trait every command flows through,
//! and the rate-limited HTTP implementation.
//!
//! The backend is the single source of truth. Client-side validation in the
//! workflow layer is advisory; whatever this module returns is what actually
//! happened.

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Jitter, Quota, RateLimiter};
use serde_json::json;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::errors::{BackendError, ErrorBody};
use super::types::{ExportFormat, ReportState, Section};
use crate::telemetry::generate_correlation_id;

/// The seven logical operations the report backend exposes.
#[async_trait]
pub trait ReportBackend: Send + Sync {
    /// Create/confirm the report. `confirm = false` is a dry-run probe and
    /// must not create persistent state.
    async fn init(&self, session_id: &str, confirm: bool) -> Result<ReportState, BackendError>;

    /// Fetch the authoritative snapshot. `Ok(None)` means the report does
    /// not exist yet, which is a valid observation, not a failure.
    async fn get_state(&self, session_id: &str) -> Result<Option<ReportState>, BackendError>;

    /// Trigger async generation. Conflict if already generating or
    /// dependencies unmet.
    async fn generate_section(
        &self,
        session_id: &str,
        section_id: &str,
    ) -> Result<Section, BackendError>;

    async fn submit_review(
        &self,
        session_id: &str,
        section_id: &str,
        accepted: bool,
        feedback: Option<&str>,
    ) -> Result<Section, BackendError>;

    async fn reset_section(
        &self,
        session_id: &str,
        section_id: &str,
        force: bool,
    ) -> Result<Section, BackendError>;

    async fn finalize(&self, session_id: &str) -> Result<ReportState, BackendError>;

    async fn export(
        &self,
        session_id: &str,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError>;
}

/// HTTP+JSON implementation, rate limited so a polling loop plus rapid user
/// commands cannot hammer the backend.
pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
}

impl HttpBackend {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        requests_per_second: u32,
        burst: u32,
    ) -> Result<Self, BackendError> {
        let quota = Quota::per_second(
            NonZeroU32::new(requests_per_second.max(1)).expect("clamped to at least 1"),
        )
        .allow_burst(NonZeroU32::new(burst.max(1)).expect("clamped to at least 1"));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    fn report_url(&self, session_id: &str) -> String {
        format!("{}/api/sessions/{}/report", self.base_url, session_id)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, BackendError> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let correlation_id = generate_correlation_id();
        let mut request = request.header("x-correlation-id", &correlation_id);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        debug!(correlation_id = %correlation_id, "issuing backend request");
        Ok(request.send().await?)
    }

    /// Convert a non-2xx response into a classified error.
    async fn classify_failure(
        session_id: &str,
        response: reqwest::Response,
    ) -> BackendError {
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(text) => serde_json::from_str::<ErrorBody>(&text).unwrap_or(ErrorBody {
                error: text,
                code: None,
            }),
            Err(_) => ErrorBody {
                error: String::new(),
                code: None,
            },
        };
        BackendError::classify(session_id, status, body)
    }

    async fn expect_json<T: serde::de::DeserializeOwned>(
        session_id: &str,
        response: reqwest::Response,
    ) -> Result<T, BackendError> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_failure(session_id, response).await);
        }
        response.json::<T>().await.map_err(|e| BackendError::Api {
            status: status.as_u16(),
            message: format!("unparseable response body: {e}"),
        })
    }
}

#[async_trait]
impl ReportBackend for HttpBackend {
    async fn init(&self, session_id: &str, confirm: bool) -> Result<ReportState, BackendError> {
        let url = format!("{}/init", self.report_url(session_id));
        let response = self
            .send(self.http.post(&url).json(&json!({ "confirm": confirm })))
            .await?;
        Self::expect_json(session_id, response).await
    }

    async fn get_state(&self, session_id: &str) -> Result<Option<ReportState>, BackendError> {
        let response = self.send(self.http.get(self.report_url(session_id))).await?;
        match Self::expect_json(session_id, response).await {
            Ok(state) => Ok(Some(state)),
            Err(BackendError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn generate_section(
        &self,
        session_id: &str,
        section_id: &str,
    ) -> Result<Section, BackendError> {
        let url = format!(
            "{}/sections/{}/generate",
            self.report_url(session_id),
            section_id
        );
        let response = self.send(self.http.post(&url)).await?;
        Self::expect_json(session_id, response).await
    }

    async fn submit_review(
        &self,
        session_id: &str,
        section_id: &str,
        accepted: bool,
        feedback: Option<&str>,
    ) -> Result<Section, BackendError> {
        let url = format!(
            "{}/sections/{}/review",
            self.report_url(session_id),
            section_id
        );
        let body = json!({ "accepted": accepted, "feedback": feedback });
        let response = self.send(self.http.post(&url).json(&body)).await?;
        Self::expect_json(session_id, response).await
    }

    async fn reset_section(
        &self,
        session_id: &str,
        section_id: &str,
        force: bool,
    ) -> Result<Section, BackendError> {
        let url = format!(
            "{}/sections/{}/reset",
            self.report_url(session_id),
            section_id
        );
        let response = self
            .send(self.http.post(&url).json(&json!({ "force": force })))
            .await?;
        Self::expect_json(session_id, response).await
    }

    async fn finalize(&self, session_id: &str) -> Result<ReportState, BackendError> {
        let url = format!("{}/finalize", self.report_url(session_id));
        let response = self.send(self.http.post(&url)).await?;
        Self::expect_json(session_id, response).await
    }

    async fn export(
        &self,
        session_id: &str,
        format: ExportFormat,
    ) -> Result<Vec<u8>, BackendError> {
        let url = format!("{}/export", self.report_url(session_id));
        let response = self
            .send(self.http.get(&url).query(&[("format", format.as_str())]))
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Self::classify_failure(session_id, response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }
}
