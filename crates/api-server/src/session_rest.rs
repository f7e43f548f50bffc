//! REST handlers for the session lifecycle.
//!
//! The session id in the path is the caller's bearer credential; it is
//! returned only to the creator and never appears in broadcast payloads.

use crate::rest::{api_error, ApiResult, AppState, ErrorResponse};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use campus_core::types::{Role, SessionId};
use campus_presence::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateSessionRequest {
    pub role: Role,
    /// Phone number or email address; stored sealed.
    #[serde(default)]
    pub emergency_contact: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SwitchRoleRequest {
    pub role: Role,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionView {
    pub session_id: SessionId,
    /// Alias under which other clients see this session.
    pub peer: String,
    pub role: Role,
    pub campus_verified: bool,
    pub has_emergency_contact: bool,
    pub created_at: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            peer: session.session_id.public_alias(),
            has_emergency_contact: session.has_emergency_contact(),
            session_id: session.session_id,
            role: session.role,
            campus_verified: session.campus_verified,
            created_at: session.created_at,
            active_until: session.active_until,
            last_seen: session.last_seen,
        }
    }
}

/// POST /v1/sessions: Start an anonymous session.
#[utoipa::path(
    post,
    path = "/v1/sessions",
    tag = "Sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = SessionView),
    )
)]
pub async fn handle_create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<SessionView>), (StatusCode, Json<ErrorResponse>)> {
    let session = state
        .presence
        .sessions
        .create(request.role, request.emergency_contact.as_deref())
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// GET /v1/sessions/{session_id}
#[utoipa::path(
    get,
    path = "/v1/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Current session", body = SessionView),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<SessionView> {
    let session = state.presence.sessions.get(&session_id).map_err(api_error)?;
    Ok(Json(session.into()))
}

/// PUT /v1/sessions/{session_id}/role
#[utoipa::path(
    put,
    path = "/v1/sessions/{session_id}/role",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session token")),
    request_body = SwitchRoleRequest,
    responses(
        (status = 200, description = "Role switched", body = SessionView),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_switch_role(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
    Json(request): Json<SwitchRoleRequest>,
) -> ApiResult<SessionView> {
    let session = state
        .presence
        .sessions
        .switch_role(&session_id, request.role)
        .map_err(api_error)?;
    Ok(Json(session.into()))
}

/// POST /v1/sessions/{session_id}/refresh: Restart the lifetime window.
#[utoipa::path(
    post,
    path = "/v1/sessions/{session_id}/refresh",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session token")),
    responses(
        (status = 200, description = "Lifetime restarted", body = SessionView),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_refresh_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> ApiResult<SessionView> {
    let session = state.presence.sessions.refresh(&session_id).map_err(api_error)?;
    Ok(Json(session.into()))
}

/// DELETE /v1/sessions/{session_id}
#[utoipa::path(
    delete,
    path = "/v1/sessions/{session_id}",
    tag = "Sessions",
    params(("session_id" = String, Path, description = "Session token")),
    responses(
        (status = 204, description = "Session ended"),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_end_session(
    State(state): State<AppState>,
    Path(session_id): Path<SessionId>,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    state.presence.end_session(&session_id).map_err(api_error)?;
    debug!(peer = %session_id.public_alias(), "Session ended over REST");
    Ok(StatusCode::NO_CONTENT)
}
