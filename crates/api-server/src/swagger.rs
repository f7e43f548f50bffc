//! OpenAPI specification and Swagger UI configuration.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Campus Presence API",
        version = "0.1.0",
        description = "Anonymous, campus-bounded presence for bike riders and passengers.\n\nSessions, geofenced location reports, pickup-spot availability and emergency alerts. Live updates are pushed over the WebSocket at `/v1/live`.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Sessions", description = "Ephemeral role-tagged sessions"),
        (name = "Location", description = "Location reports, active locations and campus geography"),
        (name = "Emergency", description = "Emergency alert trigger, status and resolution"),
        (name = "Operations", description = "Health, readiness, liveness and aggregate stats"),
    ),
    paths(
        // Sessions
        crate::session_rest::handle_create_session,
        crate::session_rest::handle_get_session,
        crate::session_rest::handle_switch_role,
        crate::session_rest::handle_refresh_session,
        crate::session_rest::handle_end_session,
        // Location
        crate::location_rest::handle_report_location,
        crate::location_rest::handle_active_locations,
        crate::location_rest::handle_spot_availability,
        crate::location_rest::handle_geofence_check,
        crate::location_rest::handle_landmarks,
        crate::location_rest::handle_nearby_landmarks,
        // Emergency
        crate::emergency_rest::handle_trigger_alert,
        crate::emergency_rest::handle_list_active_alerts,
        crate::emergency_rest::handle_get_alert,
        crate::emergency_rest::handle_resolve_alert,
        crate::emergency_rest::handle_retry_alert,
        // Operations
        crate::rest::health_check,
        crate::rest::readiness,
        crate::rest::liveness,
        crate::rest::handle_stats,
    ),
    components(schemas(
        // Domain types
        campus_core::types::SessionId,
        campus_core::types::AlertId,
        campus_core::types::Role,
        campus_core::types::BikeAvailability,
        campus_core::types::GeoPoint,
        campus_core::types::GeofenceReason,
        campus_core::types::AlertType,
        campus_core::types::AlertStatus,
        campus_core::types::DispatchChannel,
        campus_core::types::DispatchLogEntry,
        campus_geofence::Zone,
        campus_geofence::Landmark,
        campus_geofence::NearbyLandmark,
        campus_presence::PresenceView,
        campus_presence::AlertBroadcast,
        campus_presence::ReportAccepted,
        campus_presence::SpotAvailability,
        campus_presence::PresenceStats,
        campus_emergency::EmergencyAlert,
        // Request/response types
        crate::session_rest::CreateSessionRequest,
        crate::session_rest::SwitchRoleRequest,
        crate::session_rest::SessionView,
        crate::location_rest::LocationReport,
        crate::location_rest::GeofenceCheckRequest,
        crate::location_rest::GeofenceCheckResponse,
        crate::location_rest::LandmarksResponse,
        crate::emergency_rest::TriggerAlertRequest,
        crate::emergency_rest::ResolveAlertRequest,
        // REST error/health types
        crate::rest::ErrorResponse,
        crate::rest::HealthResponse,
        crate::rest::ServiceStats,
    ))
)]
pub struct ApiDoc;
