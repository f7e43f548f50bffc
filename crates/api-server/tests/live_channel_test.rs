//! Live channel tests over a real socket.

use axum::Router;
use campus_api::ApiServer;
use campus_channels::ScriptedDispatcher;
use campus_core::clock::ManualClock;
use campus_core::config::AppConfig;
use campus_core::contact::ContactSealer;
use campus_core::event_bus::noop_sink;
use campus_core::types::{BikeAvailability, GeoPoint, PositionFix, Role, SessionId};
use campus_emergency::EmergencyCoordinator;
use campus_geofence::CampusBoundary;
use campus_presence::PresenceService;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const GATE: GeoPoint = GeoPoint::new(7.5227, 4.5198);

struct LiveApp {
    addr: SocketAddr,
    presence: Arc<PresenceService>,
}

impl LiveApp {
    async fn start(config: AppConfig) -> Self {
        let clock = ManualClock::starting_now();
        let campus = Arc::new(CampusBoundary::from_config(&config.campus).unwrap());
        let presence = Arc::new(PresenceService::new(
            &config,
            campus,
            clock.clone(),
            Arc::new(ContactSealer::random()),
            noop_sink(),
        ));
        let emergency = Arc::new(EmergencyCoordinator::new(
            config.emergency.clone(),
            presence.clone(),
            Arc::new(ScriptedDispatcher::new()),
            clock,
        ));
        let router: Router = ApiServer::new(config, presence.clone(), emergency).router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Self { addr, presence }
    }

    fn session(&self, role: Role) -> SessionId {
        self.presence.sessions.create(role, None).unwrap().session_id
    }

    fn report(&self, session_id: &SessionId, availability: BikeAvailability) {
        self.presence
            .registry
            .report(
                session_id,
                PositionFix {
                    point: GATE,
                    accuracy_meters: 10.0,
                },
                availability,
            )
            .unwrap();
    }

    async fn connect(&self, session_id: &str) -> Client {
        let url = format!("ws://{}/v1/live?session_id={session_id}", self.addr);
        let (client, _) = connect_async(url).await.unwrap();
        client
    }
}

/// Next text frame as JSON, skipping control frames.
async fn next_json(client: &mut Client) -> Value {
    loop {
        match client.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

/// Wait for the server to close the socket.
async fn expect_closed(client: &mut Client) {
    loop {
        match client.next().await {
            None | Some(Ok(Message::Close(_))) | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_snapshot_first_then_deltas_and_heartbeat() {
    let app = LiveApp::start(AppConfig::default()).await;
    let rider = app.session(Role::Driver);
    app.report(&rider, BikeAvailability::High);
    let watcher = app.session(Role::Passenger);

    let mut client = app.connect(&watcher.to_string()).await;
    let snapshot = next_json(&mut client).await;
    assert_eq!(snapshot["kind"], "snapshot");
    let peers = snapshot["payload"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["peer"], rider.public_alias());
    assert!(!snapshot.to_string().contains(&rider.to_string()));

    app.report(&rider, BikeAvailability::Low);
    let delta = next_json(&mut client).await;
    assert_eq!(delta["kind"], "location");
    assert_eq!(delta["payload"]["availability"], "low");

    client.send(Message::Text("hello".to_string())).await.unwrap();
    let heartbeat = next_json(&mut client).await;
    assert_eq!(heartbeat["kind"], "heartbeat");
    assert!(heartbeat["payload"]["timestamp"].is_string());
    assert_eq!(app.presence.hub.subscriber_count(), 1);
}

#[tokio::test]
async fn test_invalid_session_is_refused() {
    let app = LiveApp::start(AppConfig::default()).await;
    let url = format!(
        "ws://{}/v1/live?session_id={}",
        app.addr,
        SessionId::new()
    );
    assert!(connect_async(url).await.is_err());
    assert_eq!(app.presence.hub.subscriber_count(), 0);
}

#[tokio::test]
async fn test_socket_closes_when_session_ends() {
    let app = LiveApp::start(AppConfig::default()).await;
    let watcher = app.session(Role::Passenger);
    let mut client = app.connect(&watcher.to_string()).await;
    assert_eq!(next_json(&mut client).await["kind"], "snapshot");

    app.presence.end_session(&watcher).unwrap();
    tokio::time::timeout(Duration::from_secs(5), expect_closed(&mut client))
        .await
        .unwrap();
    assert_eq!(app.presence.hub.subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_idle_connection_is_closed_and_unsubscribed() {
    let mut config = AppConfig::default();
    config.live.idle_timeout_secs = 5;
    // Pongs count as inbound traffic, so keep pings out of the idle window.
    config.live.ping_interval_secs = 60;
    let app = LiveApp::start(config).await;
    let watcher = app.session(Role::Passenger);

    let mut client = app.connect(&watcher.to_string()).await;
    let opened = tokio::time::Instant::now();
    assert_eq!(next_json(&mut client).await["kind"], "snapshot");
    assert_eq!(app.presence.hub.subscriber_count(), 1);

    expect_closed(&mut client).await;
    assert!(opened.elapsed() >= Duration::from_secs(4));
    assert_eq!(app.presence.hub.subscriber_count(), 0);
}
