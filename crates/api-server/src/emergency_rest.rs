//! REST handlers for emergency alerts.
//!
//! Alerts are visible only to the session that raised them. Another
//! session's alert id answers 404, the same as an unknown one.

use crate::rest::{
    api_error, bad_request, require_session, ApiError, ApiResult, AppState, CallerQuery,
    ErrorResponse,
};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use campus_core::error::PresenceError;
use campus_core::types::{AlertId, AlertType, GeoPoint, SessionId};
use campus_emergency::{EmergencyAlert, TriggerRequest};
use campus_geofence::geo::coordinates_in_range;
use serde::Deserialize;
use tracing::warn;
use utoipa::ToSchema;

/// Maximum length of a client idempotency key.
const MAX_KEY_LEN: usize = 128;

/// Maximum length of free text (alert message, resolver note).
const MAX_TEXT_LEN: usize = 1_000;

#[derive(Debug, Deserialize, ToSchema)]
pub struct TriggerAlertRequest {
    pub session_id: SessionId,
    pub latitude: f64,
    pub longitude: f64,
    pub alert_type: AlertType,
    #[serde(default)]
    pub message: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ResolveAlertRequest {
    #[serde(default)]
    pub note: Option<String>,
}

fn validate_trigger(request: &TriggerAlertRequest) -> Result<(), &'static str> {
    let key = request.idempotency_key.trim();
    if key.is_empty() {
        return Err("idempotency_key must not be empty");
    }
    if key.len() > MAX_KEY_LEN {
        return Err("idempotency_key exceeds maximum length");
    }
    if request.message.as_ref().is_some_and(|m| m.len() > MAX_TEXT_LEN) {
        return Err("message exceeds maximum length");
    }
    if !coordinates_in_range(&GeoPoint::new(request.latitude, request.longitude)) {
        return Err("latitude or longitude out of range");
    }
    Ok(())
}

/// The alert, provided the caller raised it.
fn owned_alert(
    state: &AppState,
    caller: &CallerQuery,
    alert_id: AlertId,
) -> Result<EmergencyAlert, ApiError> {
    let session = require_session(state, caller)?;
    let alert = state.emergency.get(alert_id).map_err(api_error)?;
    if alert.session_id != session.session_id {
        return Err(api_error(PresenceError::AlertNotFound(alert_id)));
    }
    Ok(alert)
}

/// POST /v1/emergency/alerts: Raise an alert and start the fan-out.
#[utoipa::path(
    post,
    path = "/v1/emergency/alerts",
    tag = "Emergency",
    request_body = TriggerAlertRequest,
    responses(
        (status = 202, description = "Alert created; dispatch continues in the background", body = EmergencyAlert),
        (status = 400, description = "Malformed request", body = ErrorResponse),
        (status = 401, description = "Session absent, expired or not campus-verified", body = ErrorResponse),
    )
)]
pub async fn handle_trigger_alert(
    State(state): State<AppState>,
    Json(request): Json<TriggerAlertRequest>,
) -> Result<(StatusCode, Json<EmergencyAlert>), (StatusCode, Json<ErrorResponse>)> {
    if let Err(msg) = validate_trigger(&request) {
        warn!(error = msg, "Alert trigger validation failed");
        return Err(bad_request("invalid_alert_request", msg));
    }

    let alert = state
        .emergency
        .trigger(TriggerRequest {
            session_id: request.session_id,
            location: GeoPoint::new(request.latitude, request.longitude),
            alert_type: request.alert_type,
            message: request.message,
            idempotency_key: request.idempotency_key.trim().to_string(),
        })
        .map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(alert)))
}

/// GET /v1/emergency/alerts?session_id=...: The caller's non-resolved alerts, oldest first.
#[utoipa::path(
    get,
    path = "/v1/emergency/alerts",
    tag = "Emergency",
    params(CallerQuery),
    responses(
        (status = 200, description = "Active alerts raised by the caller", body = Vec<EmergencyAlert>),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_list_active_alerts(
    State(state): State<AppState>,
    Query(caller): Query<CallerQuery>,
) -> ApiResult<Vec<EmergencyAlert>> {
    let session = require_session(&state, &caller)?;
    Ok(Json(state.emergency.list_active(Some(&session.session_id))))
}

/// GET /v1/emergency/alerts/{alert_id}
#[utoipa::path(
    get,
    path = "/v1/emergency/alerts/{alert_id}",
    tag = "Emergency",
    params(("alert_id" = String, Path, description = "Alert identifier"), CallerQuery),
    responses(
        (status = 200, description = "Alert with its dispatch log", body = EmergencyAlert),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
        (status = 404, description = "Alert not found", body = ErrorResponse),
    )
)]
pub async fn handle_get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<AlertId>,
    Query(caller): Query<CallerQuery>,
) -> ApiResult<EmergencyAlert> {
    owned_alert(&state, &caller, alert_id).map(Json)
}

/// POST /v1/emergency/alerts/{alert_id}/resolve
#[utoipa::path(
    post,
    path = "/v1/emergency/alerts/{alert_id}/resolve",
    tag = "Emergency",
    params(("alert_id" = String, Path, description = "Alert identifier"), CallerQuery),
    request_body = ResolveAlertRequest,
    responses(
        (status = 200, description = "Alert resolved", body = EmergencyAlert),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
        (status = 404, description = "Alert not found", body = ErrorResponse),
        (status = 409, description = "Alert still dispatching or already resolved", body = ErrorResponse),
    )
)]
pub async fn handle_resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<AlertId>,
    Query(caller): Query<CallerQuery>,
    Json(request): Json<ResolveAlertRequest>,
) -> ApiResult<EmergencyAlert> {
    owned_alert(&state, &caller, alert_id)?;
    if request.note.as_ref().is_some_and(|n| n.len() > MAX_TEXT_LEN) {
        return Err(bad_request("invalid_resolve_request", "note exceeds maximum length"));
    }
    let note = request
        .note
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    state
        .emergency
        .resolve(alert_id, note)
        .map(Json)
        .map_err(api_error)
}

/// POST /v1/emergency/alerts/{alert_id}/retry: Re-dispatch failed channels.
#[utoipa::path(
    post,
    path = "/v1/emergency/alerts/{alert_id}/retry",
    tag = "Emergency",
    params(("alert_id" = String, Path, description = "Alert identifier"), CallerQuery),
    responses(
        (status = 202, description = "Retry round started", body = EmergencyAlert),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
        (status = 404, description = "Alert not found", body = ErrorResponse),
        (status = 409, description = "Alert is not partially failed", body = ErrorResponse),
    )
)]
pub async fn handle_retry_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<AlertId>,
    Query(caller): Query<CallerQuery>,
) -> Result<(StatusCode, Json<EmergencyAlert>), ApiError> {
    owned_alert(&state, &caller, alert_id)?;
    let alert = state.emergency.retry_failed(alert_id).map_err(api_error)?;
    Ok((StatusCode::ACCEPTED, Json(alert)))
}
