//! Campus Presence: anonymous, campus-bounded presence and emergency alerts.
//!
//! Main entry point that wires the subsystems together and starts the server.

use campus_api::ApiServer;
use campus_channels::{ChannelRouter, EmailGateway, SmsGateway};
use campus_core::clock::system_clock;
use campus_core::config::AppConfig;
use campus_core::contact::ContactSealer;
use campus_core::event_bus::tracing_sink;
use campus_emergency::EmergencyCoordinator;
use campus_geofence::CampusBoundary;
use campus_presence::{PresenceService, Sweeper};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

const DEFAULT_LOG_FILTER: &str = "campus_presence=info,campus_api=info,campus_emergency=info,\
campus_channels=info,campus_geofence=info,campus_core=info,tower_http=info";

#[derive(Parser, Debug)]
#[command(name = "campus-presence")]
#[command(about = "Anonymous campus presence and emergency alert service")]
#[command(version)]
struct Cli {
    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(long, env = "CAMPUS_PRESENCE_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "CAMPUS_PRESENCE__NODE_ID")]
    node_id: Option<String>,

    /// Bind address (overrides config)
    #[arg(long, env = "CAMPUS_PRESENCE__API__HOST")]
    host: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "CAMPUS_PRESENCE__API__HTTP_PORT")]
    http_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Campus Presence starting up");

    // An explicit config file must load; env-only config falls back to defaults.
    let mut config = match cli.config.as_deref() {
        Some(path) => AppConfig::load(Some(path))?,
        None => AppConfig::load(None).unwrap_or_else(|e| {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }),
    };

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(host) = cli.host {
        config.api.host = host;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        campus = %config.campus.name,
        session_ttl_secs = config.session.ttl_secs,
        "Configuration loaded"
    );

    let sealer = match config.crypto.contact_key_hex.as_deref() {
        Some(key_hex) => ContactSealer::from_hex(key_hex)?,
        None => {
            info!("No contact key configured, generating an ephemeral one");
            ContactSealer::random()
        }
    };

    let campus = Arc::new(CampusBoundary::from_config(&config.campus)?);
    let clock = system_clock();

    let presence = Arc::new(PresenceService::new(
        &config,
        campus,
        clock.clone(),
        Arc::new(sealer),
        tracing_sink(),
    ));

    let dispatcher = Arc::new(ChannelRouter::new(
        Arc::new(SmsGateway::new(config.emergency.sms_sender_id.clone())),
        Arc::new(EmailGateway::new(
            config.emergency.email_from.clone(),
            "OAU Campus Emergency",
        )),
    ));
    let emergency = Arc::new(
        EmergencyCoordinator::new(config.emergency.clone(), presence.clone(), dispatcher, clock)
            .with_event_sink(tracing_sink()),
    );

    // Spawn the session/location sweeper
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = Arc::new(
        Sweeper::new(Duration::from_secs(config.session.sweep_interval_secs.max(1)))
            .with_task(presence.clone())
            .with_task(emergency.clone()),
    );
    let sweeper_handle = sweeper.spawn(shutdown_rx);

    let api_server = ApiServer::new(config.clone(), presence, emergency);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Campus Presence is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http(shutdown_signal()).await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "Sweeper task failed");
    }

    info!("Campus Presence stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
