//! REST handlers for location reports, the active-location snapshot and
//! campus geography lookups.

use crate::rest::{
    api_error, bad_request, require_session, ApiResult, AppState, CallerQuery, ErrorResponse,
};
use axum::extract::{Query, State};
use axum::Json;
use campus_core::types::{BikeAvailability, GeoPoint, GeofenceReason, PositionFix, SessionId};
use campus_geofence::{
    describe_location, landmarks_by_kind, nearby_landmarks, validate, GeofenceVerdict, Landmark,
    NearbyLandmark, Zone,
};
use campus_presence::{PresenceView, ReportAccepted, SpotAvailability};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

/// Upper bound on a nearby-landmark query radius.
const MAX_NEARBY_RADIUS_M: f64 = 5_000.0;

const DEFAULT_NEARBY_RADIUS_M: f64 = 500.0;

#[derive(Debug, Deserialize, ToSchema)]
pub struct LocationReport {
    pub session_id: SessionId,
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy_meters: f64,
    #[serde(default)]
    pub bike_availability: BikeAvailability,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct GeofenceCheckRequest {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct GeofenceCheckResponse {
    pub accepted: bool,
    pub zone: Option<String>,
    pub reason: Option<GeofenceReason>,
    /// Present only for accepted points.
    pub landmark: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct LandmarkQuery {
    /// Restrict to one landmark kind (e.g. `entrance`, `hostel`, `faculty`).
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct NearbyQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_m: Option<f64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LandmarksResponse {
    pub campus: String,
    pub zones: Vec<Zone>,
    pub landmarks: Vec<Landmark>,
}

/// POST /v1/location: Report the caller's position and bike availability.
#[utoipa::path(
    post,
    path = "/v1/location",
    tag = "Location",
    request_body = LocationReport,
    responses(
        (status = 200, description = "Location accepted", body = ReportAccepted),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
        (status = 422, description = "Location rejected by the geofence", body = ErrorResponse),
    )
)]
pub async fn handle_report_location(
    State(state): State<AppState>,
    Json(report): Json<LocationReport>,
) -> ApiResult<ReportAccepted> {
    let fix = PositionFix {
        point: GeoPoint::new(report.latitude, report.longitude),
        accuracy_meters: report.accuracy_meters,
    };
    let accepted = state
        .presence
        .registry
        .report(&report.session_id, fix, report.bike_availability)
        .map_err(api_error)?;
    Ok(Json(accepted))
}

/// GET /v1/location/active?session_id=...: Fresh positions of all active sessions.
#[utoipa::path(
    get,
    path = "/v1/location/active",
    tag = "Location",
    params(CallerQuery),
    responses(
        (status = 200, description = "Active locations, oldest report first", body = Vec<PresenceView>),
        (status = 401, description = "Session absent, expired or ended", body = ErrorResponse),
    )
)]
pub async fn handle_active_locations(
    State(state): State<AppState>,
    Query(caller): Query<CallerQuery>,
) -> ApiResult<Vec<PresenceView>> {
    require_session(&state, &caller)?;
    let views = state
        .presence
        .registry
        .snapshot()
        .iter()
        .map(|record| record.view())
        .collect();
    Ok(Json(views))
}

/// GET /v1/location/spots: Rolled-up availability per pickup spot.
#[utoipa::path(
    get,
    path = "/v1/location/spots",
    tag = "Location",
    responses((status = 200, description = "Availability per pickup spot", body = Vec<SpotAvailability>))
)]
pub async fn handle_spot_availability(State(state): State<AppState>) -> Json<Vec<SpotAvailability>> {
    Json(state.presence.registry.spot_availability())
}

/// POST /v1/geofence/check: Validate a point without storing anything.
#[utoipa::path(
    post,
    path = "/v1/geofence/check",
    tag = "Location",
    request_body = GeofenceCheckRequest,
    responses((status = 200, description = "Geofence verdict", body = GeofenceCheckResponse))
)]
pub async fn handle_geofence_check(
    State(state): State<AppState>,
    Json(request): Json<GeofenceCheckRequest>,
) -> Json<GeofenceCheckResponse> {
    let campus = state.presence.registry.campus();
    let point = GeoPoint::new(request.latitude, request.longitude);
    let response = match validate(campus, &point) {
        GeofenceVerdict::Accepted { zone } => GeofenceCheckResponse {
            accepted: true,
            zone,
            reason: None,
            landmark: Some(describe_location(campus, &point)),
        },
        GeofenceVerdict::Rejected { reason } => GeofenceCheckResponse {
            accepted: false,
            zone: None,
            reason: Some(reason),
            landmark: None,
        },
    };
    Json(response)
}

/// GET /v1/landmarks: Zones and named landmarks.
#[utoipa::path(
    get,
    path = "/v1/landmarks",
    tag = "Location",
    params(LandmarkQuery),
    responses((status = 200, description = "Campus zones and landmarks", body = LandmarksResponse))
)]
pub async fn handle_landmarks(
    State(state): State<AppState>,
    Query(query): Query<LandmarkQuery>,
) -> Json<LandmarksResponse> {
    let campus = state.presence.registry.campus();
    let landmarks = match query.kind.as_deref() {
        Some(kind) => landmarks_by_kind(campus, kind).into_iter().cloned().collect(),
        None => campus.landmarks.clone(),
    };
    Json(LandmarksResponse {
        campus: campus.name.clone(),
        zones: campus.zones.clone(),
        landmarks,
    })
}

/// GET /v1/landmarks/nearby: Landmarks around a point, closest first.
#[utoipa::path(
    get,
    path = "/v1/landmarks/nearby",
    tag = "Location",
    params(NearbyQuery),
    responses(
        (status = 200, description = "Landmarks within the radius", body = Vec<NearbyLandmark>),
        (status = 400, description = "Radius out of range", body = ErrorResponse),
    )
)]
pub async fn handle_nearby_landmarks(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> ApiResult<Vec<NearbyLandmark>> {
    let radius_m = query.radius_m.unwrap_or(DEFAULT_NEARBY_RADIUS_M);
    if !radius_m.is_finite() || radius_m <= 0.0 || radius_m > MAX_NEARBY_RADIUS_M {
        return Err(bad_request(
            "invalid_radius",
            "radius_m must be positive and at most 5000",
        ));
    }
    let point = GeoPoint::new(query.latitude, query.longitude);
    Ok(Json(nearby_landmarks(
        state.presence.registry.campus(),
        &point,
        radius_m,
    )))
}
