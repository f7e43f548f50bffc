//! Ephemeral, role-tagged sessions with a fixed lifetime.
//!
//! Expired entries are invisible to every read even before the sweeper
//! physically removes them.

use campus_core::clock::Clock;
use campus_core::contact::{ContactSealer, SealedContact};
use campus_core::error::{PresenceError, PresenceResult};
use campus_core::event_bus::{make_event, AuditEventType, EventSink};
use campus_core::types::{Role, SessionId};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub role: Role,
    pub emergency_contact: Option<SealedContact>,
    pub campus_verified: bool,
    pub created_at: DateTime<Utc>,
    pub active_until: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.active_until
    }

    pub fn has_emergency_contact(&self) -> bool {
        self.emergency_contact.is_some()
    }
}

pub struct SessionStore {
    sessions: DashMap<SessionId, Session>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    sealer: Arc<ContactSealer>,
    event_sink: Arc<dyn EventSink>,
}

impl SessionStore {
    pub fn new(ttl_secs: u64, clock: Arc<dyn Clock>, sealer: Arc<ContactSealer>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
            clock,
            sealer,
            event_sink: campus_core::event_bus::noop_sink(),
        }
    }

    /// Attach an event sink for audit events.
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn create(&self, role: Role, emergency_contact: Option<&str>) -> PresenceResult<Session> {
        let emergency_contact = emergency_contact
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| self.sealer.seal(c))
            .transpose()?;

        let now = self.clock.now();
        let session = Session {
            session_id: SessionId::new(),
            role,
            emergency_contact,
            campus_verified: false,
            created_at: now,
            active_until: now + self.ttl,
            last_seen: now,
        };
        self.sessions.insert(session.session_id, session.clone());

        info!(
            peer = %session.session_id.public_alias(),
            role = role.display_name(),
            has_contact = session.has_emergency_contact(),
            "Session created"
        );
        metrics::counter!("sessions.created", "role" => role.display_name()).increment(1);
        self.event_sink.emit(make_event(
            AuditEventType::SessionCreated,
            session.session_id.public_alias(),
            Some(role.display_name().to_string()),
        ));

        Ok(session)
    }

    pub fn get(&self, session_id: &SessionId) -> PresenceResult<Session> {
        let now = self.clock.now();
        self.sessions
            .get(session_id)
            .filter(|s| s.is_active_at(now))
            .map(|s| s.clone())
            .ok_or(PresenceError::SessionInvalid)
    }

    /// Apply `f` to a live session under its entry lock.
    fn update<F>(&self, session_id: &SessionId, f: F) -> PresenceResult<Session>
    where
        F: FnOnce(&mut Session, DateTime<Utc>),
    {
        let now = self.clock.now();
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .filter(|s| s.is_active_at(now))
            .ok_or(PresenceError::SessionInvalid)?;
        f(entry.value_mut(), now);
        Ok(entry.clone())
    }

    pub fn switch_role(&self, session_id: &SessionId, role: Role) -> PresenceResult<Session> {
        self.update(session_id, |session, _| {
            if session.role != role {
                debug!(peer = %session.session_id.public_alias(), role = role.display_name(), "Role switched");
                session.role = role;
            }
        })
    }

    /// Restart the fixed lifetime window from now.
    pub fn refresh(&self, session_id: &SessionId) -> PresenceResult<Session> {
        let ttl = self.ttl;
        self.update(session_id, |session, now| {
            session.active_until = now + ttl;
        })
    }

    /// Record an accepted location. Returns true on the session's first
    /// campus-verified fix.
    pub fn mark_verified(&self, session_id: &SessionId) -> PresenceResult<bool> {
        let mut first = false;
        self.update(session_id, |session, now| {
            first = !session.campus_verified;
            session.campus_verified = true;
            session.last_seen = now;
        })?;
        Ok(first)
    }

    pub fn end(&self, session_id: &SessionId) -> PresenceResult<()> {
        let now = self.clock.now();
        self.sessions
            .remove_if(session_id, |_, s| s.is_active_at(now))
            .ok_or(PresenceError::SessionInvalid)?;

        info!(peer = %session_id.public_alias(), "Session ended");
        metrics::counter!("sessions.ended").increment(1);
        self.event_sink.emit(make_event(
            AuditEventType::SessionEnded,
            session_id.public_alias(),
            None,
        ));
        Ok(())
    }

    /// Remove sessions whose window has closed. Returns their ids so the
    /// caller can cascade.
    pub fn purge_expired(&self) -> Vec<SessionId> {
        let now = self.clock.now();
        let mut expired = Vec::new();
        self.sessions.retain(|id, s| {
            let keep = s.is_active_at(now);
            if !keep {
                expired.push(*id);
            }
            keep
        });

        for id in &expired {
            self.event_sink.emit(make_event(
                AuditEventType::SessionExpired,
                id.public_alias(),
                None,
            ));
        }
        if !expired.is_empty() {
            metrics::counter!("sessions.expired").increment(expired.len() as u64);
        }
        expired
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        let now = self.clock.now();
        self.sessions
            .iter()
            .filter(|s| s.is_active_at(now))
            .map(|s| s.value().clone())
            .collect()
    }

    /// Decrypt the session's personal emergency contact, if any.
    pub fn open_contact(&self, session: &Session) -> PresenceResult<Option<String>> {
        session
            .emergency_contact
            .as_ref()
            .map(|sealed| self.open_sealed(sealed))
            .transpose()
    }

    pub fn open_sealed(&self, sealed: &SealedContact) -> PresenceResult<String> {
        self.sealer.open(sealed)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_core::clock::ManualClock;
    use campus_core::event_bus::capture_sink;

    const FOUR_HOURS: u64 = 4 * 60 * 60;

    fn store() -> (SessionStore, Arc<ManualClock>) {
        let clock = ManualClock::starting_now();
        let store = SessionStore::new(FOUR_HOURS, clock.clone(), Arc::new(ContactSealer::random()));
        (store, clock)
    }

    #[test]
    fn test_create_and_get() {
        let (store, clock) = store();
        let session = store.create(Role::Passenger, None).unwrap();
        assert_eq!(session.active_until - session.created_at, Duration::hours(4));
        assert_eq!(session.created_at, clock.now());
        assert!(!session.campus_verified);

        let fetched = store.get(&session.session_id).unwrap();
        assert_eq!(fetched.session_id, session.session_id);
        assert_eq!(fetched.role, Role::Passenger);
    }

    #[test]
    fn test_ids_are_unique() {
        let (store, _) = store();
        let a = store.create(Role::Driver, None).unwrap();
        let b = store.create(Role::Driver, None).unwrap();
        assert_ne!(a.session_id, b.session_id);
    }

    #[test]
    fn test_expired_is_invisible_before_sweep() {
        let (store, clock) = store();
        let session = store.create(Role::Passenger, None).unwrap();

        clock.advance(Duration::hours(4) - Duration::seconds(1));
        assert!(store.get(&session.session_id).is_ok());

        // Exactly at active_until the session is gone.
        clock.advance(Duration::seconds(1));
        assert!(matches!(
            store.get(&session.session_id),
            Err(PresenceError::SessionInvalid)
        ));
        assert_eq!(store.len(), 1, "not yet physically purged");
        assert!(store.switch_role(&session.session_id, Role::Driver).is_err());
        assert!(store.refresh(&session.session_id).is_err());
        assert!(store.end(&session.session_id).is_err());
    }

    #[test]
    fn test_switch_role_is_idempotent() {
        let (store, _) = store();
        let session = store.create(Role::Passenger, None).unwrap();
        let updated = store.switch_role(&session.session_id, Role::Driver).unwrap();
        assert_eq!(updated.role, Role::Driver);
        let again = store.switch_role(&session.session_id, Role::Driver).unwrap();
        assert_eq!(again.role, Role::Driver);
        assert_eq!(again.active_until, session.active_until);
    }

    #[test]
    fn test_end_is_immediate() {
        let sink = capture_sink();
        let (store, _) = store();
        let store = store.with_event_sink(sink.clone());
        let session = store.create(Role::Driver, None).unwrap();

        store.end(&session.session_id).unwrap();
        assert!(store.get(&session.session_id).is_err());
        assert!(matches!(
            store.end(&session.session_id),
            Err(PresenceError::SessionInvalid)
        ));
        assert_eq!(sink.count_type(AuditEventType::SessionEnded), 1);
    }

    #[test]
    fn test_refresh_extends_window_but_activity_does_not() {
        let (store, clock) = store();
        let session = store.create(Role::Passenger, None).unwrap();

        clock.advance(Duration::hours(3));
        store.mark_verified(&session.session_id).unwrap();
        assert_eq!(store.get(&session.session_id).unwrap().active_until, session.active_until);

        let refreshed = store.refresh(&session.session_id).unwrap();
        assert_eq!(refreshed.active_until, clock.now() + Duration::hours(4));

        clock.advance(Duration::hours(2));
        assert!(store.get(&session.session_id).is_ok());
    }

    #[test]
    fn test_mark_verified_reports_first_time() {
        let (store, _) = store();
        let session = store.create(Role::Passenger, None).unwrap();
        assert!(store.mark_verified(&session.session_id).unwrap());
        assert!(!store.mark_verified(&session.session_id).unwrap());
        assert!(store.get(&session.session_id).unwrap().campus_verified);
    }

    #[test]
    fn test_contact_is_sealed() {
        let (store, _) = store();
        let session = store.create(Role::Passenger, Some(" 08012345678 ")).unwrap();
        assert!(session.has_emergency_contact());
        assert!(!format!("{session:?}").contains("08012345678"));
        assert_eq!(
            store.open_contact(&session).unwrap().as_deref(),
            Some("08012345678")
        );

        let blank = store.create(Role::Passenger, Some("  ")).unwrap();
        assert!(!blank.has_emergency_contact());
        assert_eq!(store.open_contact(&blank).unwrap(), None);
    }

    #[test]
    fn test_purge_expired() {
        let sink = capture_sink();
        let (store, clock) = store();
        let store = store.with_event_sink(sink.clone());
        let old = store.create(Role::Passenger, None).unwrap();
        clock.advance(Duration::hours(2));
        let young = store.create(Role::Driver, None).unwrap();
        clock.advance(Duration::hours(2));

        let expired = store.purge_expired();
        assert_eq!(expired, vec![old.session_id]);
        assert_eq!(store.len(), 1);
        assert!(store.get(&young.session_id).is_ok());
        assert_eq!(sink.count_type(AuditEventType::SessionExpired), 1);
        assert!(store.purge_expired().is_empty());
    }
}
