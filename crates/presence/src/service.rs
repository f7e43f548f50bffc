//! Wires the session store, registry and hub together and owns the
//! cascades that span them.

use crate::hub::{BroadcastHub, Subscription};
use crate::messages::LiveMessage;
use crate::registry::PresenceRegistry;
use crate::session::SessionStore;
use crate::sweeper::SweepTask;
use campus_core::clock::Clock;
use campus_core::config::AppConfig;
use campus_core::contact::ContactSealer;
use campus_core::error::PresenceResult;
use campus_core::event_bus::EventSink;
use campus_core::types::SessionId;
use campus_geofence::CampusBoundary;
use std::sync::Arc;
use tracing::info;

pub struct PresenceService {
    pub sessions: Arc<SessionStore>,
    pub registry: Arc<PresenceRegistry>,
    pub hub: Arc<BroadcastHub>,
}

impl PresenceService {
    pub fn new(
        config: &AppConfig,
        campus: Arc<CampusBoundary>,
        clock: Arc<dyn Clock>,
        sealer: Arc<ContactSealer>,
        event_sink: Arc<dyn EventSink>,
    ) -> Self {
        let sessions = Arc::new(
            SessionStore::new(config.session.ttl_secs, clock.clone(), sealer)
                .with_event_sink(event_sink),
        );
        let hub = Arc::new(BroadcastHub::new(config.live.queue_capacity));
        let registry = Arc::new(PresenceRegistry::new(
            config.presence.clone(),
            campus,
            sessions.clone(),
            hub.clone(),
            clock,
        ));
        Self {
            sessions,
            registry,
            hub,
        }
    }

    /// End a session and drop everything hanging off it.
    pub fn end_session(&self, session_id: &SessionId) -> PresenceResult<()> {
        self.sessions.end(session_id)?;
        self.detach(session_id);
        Ok(())
    }

    /// Subscribe a live session to the broadcast hub.
    pub fn subscribe(&self, session_id: &SessionId) -> PresenceResult<Subscription> {
        self.sessions.get(session_id)?;
        Ok(self.hub.subscribe(*session_id, self.registry.as_ref()))
    }

    fn detach(&self, session_id: &SessionId) {
        if self.registry.forget(session_id) {
            self.hub.publish(LiveMessage::Departure {
                peer: session_id.public_alias(),
            });
        }
        self.hub.unsubscribe_session(session_id);
    }

    /// Purge expired sessions with their samples and subscriptions, then
    /// stale samples. Returns the number of records removed.
    pub fn purge(&self) -> usize {
        let expired = self.sessions.purge_expired();
        for id in &expired {
            self.detach(id);
        }
        let stale = self.registry.purge_stale();
        for id in &stale {
            self.hub.publish(LiveMessage::Departure {
                peer: id.public_alias(),
            });
        }
        if !expired.is_empty() || !stale.is_empty() {
            info!(
                expired_sessions = expired.len(),
                stale_samples = stale.len(),
                "Presence purge complete"
            );
        }
        expired.len() + stale.len()
    }
}

impl SweepTask for PresenceService {
    fn name(&self) -> &'static str {
        "presence"
    }

    fn sweep(&self) -> usize {
        self.purge()
    }
}
