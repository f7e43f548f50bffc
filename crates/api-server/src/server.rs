//! API server: HTTP REST, the live WebSocket channel and the metrics exporter.

use crate::rest::{self, AppState};
use crate::swagger::ApiDoc;
use crate::{emergency_rest, live, location_rest, session_rest};
use axum::routing::{get, post, put};
use axum::Router;
use campus_core::config::AppConfig;
use campus_emergency::EmergencyCoordinator;
use campus_presence::PresenceService;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(
        config: AppConfig,
        presence: Arc<PresenceService>,
        emergency: Arc<EmergencyCoordinator>,
    ) -> Self {
        let state = AppState {
            presence,
            emergency,
            live: config.live.clone(),
            node_id: config.node_id.clone(),
            start_time: Instant::now(),
        };
        Self { config, state }
    }

    /// The full application router with middleware applied.
    pub fn router(&self) -> Router {
        build_router(
            self.state.clone(),
            Duration::from_millis(self.config.api.request_timeout_ms),
        )
    }

    /// Serve HTTP until `shutdown` resolves, then drain in-flight requests.
    pub async fn start_http<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await?;

        info!("HTTP server stopped");
        Ok(())
    }

    /// Start the metrics server on a separate port.
    pub async fn start_metrics(&self) -> anyhow::Result<()> {
        if !self.config.metrics.enabled {
            info!("Metrics exporter disabled");
            return Ok(());
        }

        let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
        let handle = builder
            .with_http_listener(SocketAddr::new(
                self.config.api.host.parse()?,
                self.config.metrics.port,
            ))
            .install_recorder()?;

        info!(port = self.config.metrics.port, "Metrics exporter started");

        // Keep the handle alive
        std::mem::forget(handle);
        Ok(())
    }
}

pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    // The live channel outlives any request timeout once upgraded.
    let live_routes = Router::new().route("/v1/live", get(live::handle_live));

    let api_routes = Router::new()
        // Sessions
        .route("/v1/sessions", post(session_rest::handle_create_session))
        .route(
            "/v1/sessions/:session_id",
            get(session_rest::handle_get_session).delete(session_rest::handle_end_session),
        )
        .route("/v1/sessions/:session_id/role", put(session_rest::handle_switch_role))
        .route(
            "/v1/sessions/:session_id/refresh",
            post(session_rest::handle_refresh_session),
        )
        // Location
        .route("/v1/location", post(location_rest::handle_report_location))
        .route("/v1/location/active", get(location_rest::handle_active_locations))
        .route("/v1/location/spots", get(location_rest::handle_spot_availability))
        .route("/v1/geofence/check", post(location_rest::handle_geofence_check))
        .route("/v1/landmarks", get(location_rest::handle_landmarks))
        .route("/v1/landmarks/nearby", get(location_rest::handle_nearby_landmarks))
        // Emergency
        .route(
            "/v1/emergency/alerts",
            post(emergency_rest::handle_trigger_alert).get(emergency_rest::handle_list_active_alerts),
        )
        .route("/v1/emergency/alerts/:alert_id", get(emergency_rest::handle_get_alert))
        .route(
            "/v1/emergency/alerts/:alert_id/resolve",
            post(emergency_rest::handle_resolve_alert),
        )
        .route(
            "/v1/emergency/alerts/:alert_id/retry",
            post(emergency_rest::handle_retry_alert),
        )
        // Operational endpoints
        .route("/v1/stats", get(rest::handle_stats))
        .route("/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CompressionLayer::new());

    Router::new()
        .merge(api_routes)
        .merge(live_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
