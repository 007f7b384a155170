//! HTTP handlers for the webhook server
//!
//! One signed ingest endpoint for instance events plus the small
//! internal control API (health, metrics, instance assignment).

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics;
use crate::queue::{Job, JobPayload};

use super::events::{is_manual_device, InstanceEvent};
use super::server::AppState;
use super::signature::{self, SignatureError, SIGNATURE_HEADER, TIMESTAMP_HEADER};

// ============================================================================
// API Response Types
// ============================================================================

/// Generic API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Simple error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub database: bool,
    pub redis: bool,
}

/// Acknowledgement for an accepted webhook event
#[derive(Debug, Serialize)]
pub struct EventAck {
    pub event: &'static str,
}

/// An account's resolved instance assignment
#[derive(Debug, Serialize)]
pub struct InstanceAssignment {
    pub account_id: Uuid,
    pub instance_index: i32,
    pub instance_url: String,
}

/// Request to pin an account to an instance
#[derive(Debug, Deserialize)]
pub struct AssignInstanceRequest {
    pub instance_index: usize,
}

// ============================================================================
// API Routes
// ============================================================================

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Instance event ingest
        .route("/webhook/events", post(receive_event))
        // Health and metrics
        .route("/api/health", get(health_check))
        .route("/metrics", get(export_metrics))
        // Instance assignment
        .route(
            "/api/accounts/{id}/instance",
            get(get_account_instance).patch(assign_account_instance),
        )
        .with_state(state)
}

// ============================================================================
// Webhook Ingest
// ============================================================================

/// Check the HMAC signature and timestamp headers against the raw body
fn verify_request(
    config: &ServerConfig,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    let timestamp = headers
        .get(TIMESTAMP_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingTimestamp)?;
    let sig = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or(SignatureError::MissingSignature)?;

    signature::verify(
        &config.webhook_secret,
        timestamp,
        sig,
        body,
        Utc::now().timestamp(),
        config.timestamp_tolerance_secs,
    )
}

/// Receive a signed instance event
///
/// The body is taken raw because the signature covers the exact bytes
/// on the wire; parsing happens only after verification.
async fn receive_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> axum::response::Response {
    if let Err(e) = verify_request(&state.config, &headers, &body) {
        metrics::record_webhook_event("unverified", "rejected");
        tracing::warn!(error = %e, "Rejected webhook request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response();
    }

    let event: InstanceEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            metrics::record_webhook_event("unparsed", "rejected");
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::new(format!("Malformed event payload: {e}"))),
            )
                .into_response();
        }
    };

    let kind = event.kind();
    match apply_event(&state, event).await {
        Ok(()) => {
            metrics::record_webhook_event(kind, "ok");
            (
                StatusCode::OK,
                Json(ApiResponse::success(EventAck { event: kind })),
            )
                .into_response()
        }
        Err(e) => {
            metrics::record_webhook_event(kind, "error");
            tracing::error!(event = kind, error = %e, "Failed to apply webhook event");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to apply event")),
            )
                .into_response()
        }
    }
}

/// Route a verified event to the component that owns it
async fn apply_event(state: &AppState, event: InstanceEvent) -> crate::error::Result<()> {
    match event {
        InstanceEvent::SessionReady { session_id } => {
            state.registry.handle_session_ready(&session_id).await?;
        }
        InstanceEvent::SessionDisconnected { session_id, reason } => {
            state
                .registry
                .handle_session_disconnected(&session_id, reason.as_deref())
                .await?;
        }
        InstanceEvent::MessageStatusUpdated { message_id, status } => {
            apply_receipt(state, &message_id, &status).await?;
        }
        InstanceEvent::MessageDelivered { message_id } => {
            apply_receipt(state, &message_id, "delivered").await?;
        }
        InstanceEvent::MessageRead { message_id } => {
            apply_receipt(state, &message_id, "read").await?;
        }
        InstanceEvent::MessageCreate {
            session_id,
            from_me,
            device_type,
            timestamp,
        } => {
            if from_me && is_manual_device(device_type.as_deref()) {
                let at = timestamp.unwrap_or_else(Utc::now);
                state.conflict.handle_mobile_activity(&session_id, at).await?;
            } else {
                tracing::trace!(session_id, from_me, "Ignoring message_create");
            }
        }
    }

    Ok(())
}

/// Record a delivery/read receipt and refresh the campaign's counters
async fn apply_receipt(
    state: &AppState,
    message_id: &str,
    status: &str,
) -> crate::error::Result<()> {
    let campaign_id = match status {
        "delivered" => state.store.mark_delivered(message_id).await?,
        "read" => state.store.mark_read(message_id).await?,
        other => {
            tracing::debug!(message_id, status = other, "Ignoring unhandled message status");
            return Ok(());
        }
    };

    if let Some(campaign_id) = campaign_id {
        state
            .queue
            .enqueue(&Job::new(JobPayload::StatsRefresh { campaign_id }))
            .await?;
    }

    Ok(())
}

// ============================================================================
// Health and Metrics Handlers
// ============================================================================

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.store.health_check().await.unwrap_or(false);
    let redis = state.cache.health_check().await.unwrap_or(false);
    let status = if database && redis {
        "healthy"
    } else {
        "degraded"
    };

    Json(ApiResponse::success(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        database,
        redis,
    }))
}

/// Prometheus text exposition endpoint
async fn export_metrics() -> axum::response::Response {
    match metrics::encode_metrics() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding failed".to_string(),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Instance Assignment Handlers
// ============================================================================

/// Resolve the instance an account currently routes to
async fn get_account_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    match state.router.route_for(id).await {
        Ok(route) => (
            StatusCode::OK,
            Json(ApiResponse::success(InstanceAssignment {
                account_id: id,
                instance_index: route.instance_index,
                instance_url: route.instance_url,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

/// Pin an account to a specific instance
async fn assign_account_instance(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignInstanceRequest>,
) -> axum::response::Response {
    match state
        .router
        .assign_to_instance(id, request.instance_index)
        .await
    {
        Ok(route) => {
            tracing::info!(
                account_id = %id,
                instance = route.instance_index,
                "Account pinned to instance"
            );
            (
                StatusCode::OK,
                Json(ApiResponse::success(InstanceAssignment {
                    account_id: id,
                    instance_index: route.instance_index,
                    instance_url: route.instance_url,
                })),
            )
                .into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::new(e.to_string())),
        )
            .into_response(),
    }
}

// ============================================================================
// Tests
// ============================================================================
