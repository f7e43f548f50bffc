//! WebSocket live channel.
//!
//! One task per connection drains the subscriber's bounded queue into the
//! socket. When the hub drops the subscriber (overload, session ended or
//! expired) the queue closes and so does the socket.

use crate::rest::{api_error, AppState, ErrorResponse};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use campus_core::config::LiveConfig;
use campus_core::types::SessionId;
use campus_presence::{BroadcastHub, LiveMessage, Subscription};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    pub session_id: SessionId,
}

/// GET /v1/live?session_id=...: Upgrade to the live push channel.
pub async fn handle_live(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<LiveQuery>,
) -> Result<Response, (StatusCode, Json<ErrorResponse>)> {
    let subscription = state.presence.subscribe(&query.session_id).map_err(api_error)?;
    let hub = state.presence.hub.clone();
    let config = state.live.clone();
    Ok(ws.on_upgrade(move |socket| run_live(socket, subscription, hub, config)))
}

/// Why a live connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    Unsubscribed,
    IdleTimeout,
    SendFailed,
}

async fn run_live(
    mut socket: WebSocket,
    mut subscription: Subscription,
    hub: Arc<BroadcastHub>,
    config: LiveConfig,
) {
    let subscriber = subscription.id;
    let peer = subscription.session_id.public_alias();
    info!(%subscriber, %peer, "Live channel opened");
    metrics::gauge!("live.connections").increment(1.0);

    let idle_timeout = Duration::from_secs(config.idle_timeout_secs.max(1));
    let mut ping = tokio::time::interval(Duration::from_secs(config.ping_interval_secs.max(1)));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut last_inbound = Instant::now();

    let reason = loop {
        tokio::select! {
            outbound = subscription.receiver.recv() => match outbound {
                Some(message) => {
                    if send_json(&mut socket, &message).await.is_err() {
                        break CloseReason::SendFailed;
                    }
                }
                None => break CloseReason::Unsubscribed,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(_))) => {
                    last_inbound = Instant::now();
                    let heartbeat = LiveMessage::heartbeat(Utc::now());
                    if send_json(&mut socket, &heartbeat).await.is_err() {
                        break CloseReason::SendFailed;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                Some(Ok(_)) => last_inbound = Instant::now(),
                Some(Err(e)) => {
                    debug!(%subscriber, error = %e, "Live socket read failed");
                    break CloseReason::ClientClosed;
                }
            },
            _ = ping.tick() => {
                if socket.send(Message::Ping(Vec::new())).await.is_err() {
                    break CloseReason::SendFailed;
                }
            }
            _ = tokio::time::sleep_until(last_inbound + idle_timeout) => {
                break CloseReason::IdleTimeout;
            }
        }
    };

    hub.unsubscribe(subscriber);
    if matches!(reason, CloseReason::Unsubscribed | CloseReason::IdleTimeout) {
        let _ = socket.send(Message::Close(None)).await;
    }
    if reason == CloseReason::IdleTimeout {
        warn!(%subscriber, %peer, "Live channel idle, closing");
        metrics::counter!("live.idle_timeouts").increment(1);
    }
    metrics::gauge!("live.connections").decrement(1.0);
    info!(%subscriber, %peer, ?reason, "Live channel closed");
}

async fn send_json(socket: &mut WebSocket, message: &LiveMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(text) => socket.send(Message::Text(text)).await,
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "Failed to encode live message");
            Ok(())
        }
    }
}
