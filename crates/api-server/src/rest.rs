//! Shared handler state, error mapping and operational endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use campus_core::config::LiveConfig;
use campus_core::error::PresenceError;
use campus_core::types::SessionId;
use campus_emergency::EmergencyCoordinator;
use campus_presence::{PresenceService, PresenceStats, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;
use utoipa::{IntoParams, ToSchema};

/// Shared application state for REST and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub presence: Arc<PresenceService>,
    pub emergency: Arc<EmergencyCoordinator>,
    pub live: LiveConfig,
    pub node_id: String,
    pub start_time: Instant,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub type ApiResult<T> = Result<Json<T>, ApiError>;

/// Map a domain error to its HTTP status and error body.
pub fn api_error(err: PresenceError) -> ApiError {
    let (status, code) = match &err {
        PresenceError::SessionInvalid => (StatusCode::UNAUTHORIZED, "session_invalid"),
        PresenceError::GeofenceRejected(_) => {
            (StatusCode::UNPROCESSABLE_ENTITY, "geofence_rejected")
        }
        PresenceError::AlertNotFound(_) => (StatusCode::NOT_FOUND, "alert_not_found"),
        PresenceError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        PresenceError::Crypto(_)
        | PresenceError::Config(_)
        | PresenceError::Serialization(_)
        | PresenceError::Internal(_) => {
            error!(error = %err, "Request failed");
            metrics::counter!("api.errors").increment(1);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "internal_error".to_string(),
                    message: "Internal processing error".to_string(),
                }),
            );
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: code.to_string(),
            message: err.to_string(),
        }),
    )
}

/// `?session_id=` on endpoints that act on behalf of a session.
#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct CallerQuery {
    /// The caller's session token.
    pub session_id: Option<SessionId>,
}

/// The caller's active session; 401 when the token is missing, expired or ended.
pub fn require_session(state: &AppState, caller: &CallerQuery) -> Result<Session, ApiError> {
    let session_id = caller
        .session_id
        .as_ref()
        .ok_or_else(|| api_error(PresenceError::SessionInvalid))?;
    state.presence.sessions.get(session_id).map_err(api_error)
}

pub fn bad_request(code: &str, message: &str) -> ApiError {
    metrics::counter!("api.validation_errors").increment(1);
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: code.to_string(),
            message: message.to_string(),
        }),
    )
}

/// GET /health: Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "Operations",
    responses((status = 200, description = "Service is healthy", body = HealthResponse))
)]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        node_id: state.node_id.clone(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        live_subscribers: state.presence.hub.subscriber_count(),
    })
}

/// GET /ready: Readiness probe.
#[utoipa::path(
    get,
    path = "/ready",
    tag = "Operations",
    responses((status = 200, description = "Ready to accept traffic"))
)]
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live: Liveness probe.
#[utoipa::path(
    get,
    path = "/live",
    tag = "Operations",
    responses((status = 200, description = "Process is alive"))
)]
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// GET /v1/stats: Aggregate counts; no per-session data.
#[utoipa::path(
    get,
    path = "/v1/stats",
    tag = "Operations",
    responses((status = 200, description = "Aggregate presence and alert counts", body = ServiceStats))
)]
pub async fn handle_stats(State(state): State<AppState>) -> Json<ServiceStats> {
    Json(ServiceStats {
        presence: state.presence.registry.stats(),
        active_alerts: state.emergency.active_count(),
    })
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub uptime_secs: u64,
    pub live_subscribers: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ServiceStats {
    #[serde(flatten)]
    pub presence: PresenceStats,
    pub active_alerts: usize,
}
