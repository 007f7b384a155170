//! HTTP client for worker instances
//!
//! Session lifecycle operations retry transient failures through the
//! shared retry helper. Sends run exactly once per account: a timed-out
//! send may still have gone through, so transport-level retries would
//! risk duplicate messages. Failed sends are retried at the log level
//! instead.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{classify_status, SendOutcome};
use crate::config::Config;
use crate::models::AccountStatus;
use crate::utils::error::GatewayError;
use crate::utils::retry::{with_retry_if, RetryConfig};

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the instance gateway client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Request timeout
    pub request_timeout: Duration,

    /// Retry count for session lifecycle calls
    pub retry_count: u32,

    /// Base delay between retries in milliseconds
    pub retry_base_delay_ms: u64,

    /// Bearer token for the instance API, when it requires one
    pub api_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            retry_count: 3,
            retry_base_delay_ms: 500,
            api_token: None,
        }
    }
}

impl ClientConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            api_token: config.instances.api_token.clone(),
            ..Self::default()
        }
    }

    /// Set timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set retry count
    pub fn with_retry_count(mut self, count: u32) -> Self {
        self.retry_count = count;
        self
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// Generic response envelope from the instance API
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Session state as reported by its instance
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatus {
    pub session_id: String,
    pub status: String,
    /// Ban-risk signal in [0,100], when the instance computes one
    pub ban_risk: Option<i32>,
}

impl SessionStatus {
    /// Parsed connection state, `None` for states this side doesn't know
    pub fn account_status(&self) -> Option<AccountStatus> {
        AccountStatus::parse(&self.status)
    }
}

#[derive(Debug, Deserialize)]
struct SendData {
    message_id: Option<String>,
}

// ============================================================================
// Gateway Client
// ============================================================================

/// HTTP client for the worker-instance API
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    config: ClientConfig,
    retry: RetryConfig,
}

impl GatewayClient {
    pub fn new(config: ClientConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let retry = RetryConfig::with_delays(
            config.retry_count,
            config.retry_base_delay_ms,
            config.retry_base_delay_ms * 8,
        )
        .with_jitter();

        Ok(Self {
            http,
            config,
            retry,
        })
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.config.api_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    // =========================================================================
    // Session Lifecycle
    // =========================================================================

    /// Create (or revive) a session on an instance
    pub async fn create_session(
        &self,
        instance_url: &str,
        session_id: &str,
    ) -> Result<SessionStatus, GatewayError> {
        let url = format!("{instance_url}/api/sessions");

        self.retrying(|| async {
            let response = self
                .request(Method::POST, url.clone())
                .json(&serde_json::json!({ "session_id": session_id }))
                .send()
                .await?;

            Self::read_data(session_id, response).await
        })
        .await
    }

    /// Ask an instance to re-establish a session's connection
    pub async fn reconnect_session(
        &self,
        instance_url: &str,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{instance_url}/api/sessions/{session_id}/reconnect");

        self.retrying(|| async {
            let response = self.request(Method::POST, url.clone()).send().await?;
            Self::read_unit(session_id, response).await
        })
        .await
    }

    /// Tear a session down. Already-gone counts as success, so repeated
    /// disconnects and races with instance restarts are harmless.
    pub async fn disconnect_session(
        &self,
        instance_url: &str,
        session_id: &str,
    ) -> Result<(), GatewayError> {
        let url = format!("{instance_url}/api/sessions/{session_id}");

        self.retrying(|| async {
            let response = self.request(Method::DELETE, url.clone()).send().await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Ok(());
            }
            Self::read_unit(session_id, response).await
        })
        .await
    }

    /// Current state of a session on its instance
    pub async fn session_status(
        &self,
        instance_url: &str,
        session_id: &str,
    ) -> Result<SessionStatus, GatewayError> {
        let url = format!("{instance_url}/api/sessions/{session_id}/status");

        self.retrying(|| async {
            let response = self.request(Method::GET, url.clone()).send().await?;
            Self::read_data(session_id, response).await
        })
        .await
    }

    // =========================================================================
    // Sending
    // =========================================================================

    /// Send one message through a session. Single attempt; every way
    /// this can go wrong is folded into the returned outcome.
    pub async fn send_message(
        &self,
        instance_url: &str,
        session_id: &str,
        payload: &serde_json::Value,
    ) -> SendOutcome {
        let url = format!("{instance_url}/api/sessions/{session_id}/messages");

        let response = match self.request(Method::POST, url).json(payload).send().await {
            Ok(response) => response,
            Err(err) => {
                return SendOutcome::transient(format!("request failed: {err}"));
            }
        };

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return SendOutcome::Failed {
                kind: classify_status(status.as_u16()),
                message: format!("instance returned {status}: {message}"),
            };
        }

        match response.json::<ApiResponse<SendData>>().await {
            Ok(body) if body.success => SendOutcome::Sent {
                message_id: body.data.and_then(|d| d.message_id),
            },
            Ok(body) => SendOutcome::Failed {
                kind: SendErrorKindForBody::classify(body.error.as_deref()),
                message: body.error.unwrap_or_else(|| "send rejected".to_string()),
            },
            Err(err) => SendOutcome::transient(format!("unreadable send response: {err}")),
        }
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn retrying<T, F, Fut>(&self, operation: F) -> Result<T, GatewayError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, GatewayError>>,
    {
        with_retry_if(
            &self.retry,
            || async { operation().await.map_err(anyhow::Error::from) },
            |err| {
                err.downcast_ref::<GatewayError>()
                    .is_some_and(|e| e.is_recoverable())
            },
        )
        .await
        .map_err(|err| match err.downcast::<GatewayError>() {
            Ok(gateway) => gateway,
            Err(other) => GatewayError::InvalidResponse(other.to_string()),
        })
    }

    async fn read_data<T: for<'de> Deserialize<'de>>(
        session_id: &str,
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::ServerError(status.as_u16()));
        }

        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;

        if !body.success {
            return Err(GatewayError::InvalidResponse(
                body.error.unwrap_or_else(|| "request failed".to_string()),
            ));
        }

        body.data
            .ok_or_else(|| GatewayError::InvalidResponse("missing response data".to_string()))
    }

    async fn read_unit(session_id: &str, response: reqwest::Response) -> Result<(), GatewayError> {
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::SessionNotFound(session_id.to_string()));
        }
        if !status.is_success() {
            return Err(GatewayError::ServerError(status.as_u16()));
        }

        Ok(())
    }
}

/// Failure classification from a rejected-send error message
struct SendErrorKindForBody;

impl SendErrorKindForBody {
    fn classify(error: Option<&str>) -> super::SendErrorKind {
        let Some(error) = error else {
            return super::SendErrorKind::Transient;
        };
        let lowered = error.to_ascii_lowercase();

        if lowered.contains("invalid") || lowered.contains("not a valid") {
            super::SendErrorKind::PermanentValidation
        } else if lowered.contains("not connected")
            || lowered.contains("session")
            || lowered.contains("logged out")
        {
            super::SendErrorKind::SessionUnavailable
        } else {
            super::SendErrorKind::Transient
        }
    }
}
