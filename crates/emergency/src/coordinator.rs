//! Emergency alert coordinator.
//!
//! Owns every alert record. A trigger creates the alert and returns at once;
//! the fan-out runs as a task set in the background and folds each
//! channel's terminal outcome into the alert's dispatch log and status.

use crate::alert::{in_flight, AlertAction, EmergencyAlert};
use crate::dispatch::{deliver_with_retry, RetryPolicy, Target};
use campus_channels::{EmergencyNotice, NotificationDispatcher};
use campus_core::clock::Clock;
use campus_core::config::EmergencyConfig;
use campus_core::error::{PresenceError, PresenceResult};
use campus_core::event_bus::{make_event, noop_sink, AuditEventType, EventSink};
use campus_core::types::{
    AlertId, AlertStatus, AlertType, DeliveryOutcome, DispatchChannel, DispatchLogEntry, GeoPoint,
    GeofenceReason, SessionId,
};
use campus_geofence::describe_location;
use campus_geofence::geo::coordinates_in_range;
use campus_presence::{AlertBroadcast, LiveMessage, PresenceService, SweepTask};
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub session_id: SessionId,
    pub location: GeoPoint,
    pub alert_type: AlertType,
    pub message: Option<String>,
    /// Client-generated; repeated keys within the dedup window return the
    /// existing alert.
    pub idempotency_key: String,
}

pub struct EmergencyCoordinator {
    alerts: DashMap<AlertId, EmergencyAlert>,
    idempotency: DashMap<(SessionId, String), (AlertId, DateTime<Utc>)>,
    status_watchers: DashMap<AlertId, watch::Sender<AlertStatus>>,
    presence: Arc<PresenceService>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    clock: Arc<dyn Clock>,
    config: EmergencyConfig,
    policy: RetryPolicy,
    event_sink: Arc<dyn EventSink>,
}

impl EmergencyCoordinator {
    pub fn new(
        config: EmergencyConfig,
        presence: Arc<PresenceService>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            alerts: DashMap::new(),
            idempotency: DashMap::new(),
            status_watchers: DashMap::new(),
            presence,
            dispatcher,
            clock,
            policy: RetryPolicy::from_config(&config),
            config,
            event_sink: noop_sink(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Create an alert and start its fan-out. Fails when the location is not
    /// a valid coordinate or the session is not active and campus-verified;
    /// channel failures surface later through the alert's status.
    pub fn trigger(self: &Arc<Self>, req: TriggerRequest) -> PresenceResult<EmergencyAlert> {
        if !coordinates_in_range(&req.location) {
            return Err(PresenceError::GeofenceRejected(
                GeofenceReason::InvalidCoordinates,
            ));
        }
        let session = self.presence.sessions.get(&req.session_id)?;
        if !session.campus_verified {
            warn!(peer = %req.session_id.public_alias(), "Alert from unverified session rejected");
            return Err(PresenceError::SessionInvalid);
        }

        let now = self.clock.now();
        let window = Duration::seconds(self.config.dedup_window_secs as i64);
        let key = (req.session_id, req.idempotency_key.trim().to_string());

        let alert = if key.1.is_empty() {
            self.create_alert(&req, session.emergency_contact.clone(), now)
        } else {
            match self.idempotency.entry(key) {
                Entry::Occupied(mut slot) => {
                    let (existing_id, first_seen) = *slot.get();
                    if now - first_seen < window {
                        if let Some(existing) = self.alerts.get(&existing_id) {
                            info!(alert_id = %existing_id, "Duplicate trigger, returning existing alert");
                            metrics::counter!("emergency.alerts.deduplicated").increment(1);
                            return Ok(existing.clone());
                        }
                    }
                    let alert = self.create_alert(&req, session.emergency_contact.clone(), now);
                    slot.insert((alert.alert_id, now));
                    alert
                }
                Entry::Vacant(slot) => {
                    let alert = self.create_alert(&req, session.emergency_contact.clone(), now);
                    slot.insert((alert.alert_id, now));
                    alert
                }
            }
        };

        let channels = self.configured_channels(&alert);
        self.spawn_round(alert.alert_id, channels);
        Ok(alert)
    }

    fn create_alert(
        &self,
        req: &TriggerRequest,
        contact: Option<campus_core::contact::SealedContact>,
        now: DateTime<Utc>,
    ) -> EmergencyAlert {
        let landmark = describe_location(self.presence.registry.campus(), &req.location);
        let message = req
            .message
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Emergency alert near {landmark}"));

        let mut alert = EmergencyAlert {
            alert_id: AlertId::new(),
            session_id: req.session_id,
            alert_type: req.alert_type,
            location: req.location,
            landmark,
            message,
            status: AlertStatus::Triggered,
            created_at: now,
            resolved_at: None,
            resolver_note: None,
            dispatch_log: Vec::new(),
            contact,
        };

        warn!(
            alert_id = %alert.alert_id,
            alert_type = alert.alert_type.display_name(),
            landmark = %alert.landmark,
            "Emergency alert triggered"
        );
        metrics::counter!("emergency.alerts.triggered", "type" => alert.alert_type.display_name())
            .increment(1);
        self.event_sink.emit(make_event(
            AuditEventType::AlertTriggered,
            alert.alert_id.to_string(),
            Some(alert.alert_type.display_name().to_string()),
        ));

        // Triggered -> Dispatching cannot fail for a fresh alert.
        if let Err(e) = alert.apply(AlertAction::StartDispatch) {
            error!(alert_id = %alert.alert_id, error = %e, "Unexpected state on new alert");
        }
        let (tx, _) = watch::channel(alert.status);
        self.status_watchers.insert(alert.alert_id, tx);
        self.alerts.insert(alert.alert_id, alert.clone());
        alert
    }

    /// Fixed fan-out order; channels without a recipient are not configured.
    fn configured_channels(&self, alert: &EmergencyAlert) -> Vec<DispatchChannel> {
        DispatchChannel::ORDERED
            .into_iter()
            .filter(|channel| match channel {
                DispatchChannel::CampusSecurity => !self.config.campus_security.is_empty(),
                DispatchChannel::StudentUnion => !self.config.student_union.is_empty(),
                DispatchChannel::Clinic => !self.config.clinic.is_empty(),
                DispatchChannel::PersonalContact => alert.contact.is_some(),
                DispatchChannel::NearbyBroadcast => true,
            })
            .collect()
    }

    fn target_for(&self, channel: DispatchChannel, alert: &EmergencyAlert) -> Target {
        match channel {
            DispatchChannel::CampusSecurity => Target::Recipient(self.config.campus_security.clone()),
            DispatchChannel::StudentUnion => Target::Recipient(self.config.student_union.clone()),
            DispatchChannel::Clinic => Target::Recipient(self.config.clinic.clone()),
            DispatchChannel::PersonalContact => match &alert.contact {
                Some(sealed) => match self.presence.sessions.open_sealed(sealed) {
                    Ok(contact) => Target::Recipient(contact),
                    Err(e) => Target::Unreachable(e.to_string()),
                },
                None => Target::Unreachable("no emergency contact on file".to_string()),
            },
            DispatchChannel::NearbyBroadcast => Target::Nearby,
        }
    }

    fn spawn_round(self: &Arc<Self>, alert_id: AlertId, channels: Vec<DispatchChannel>) {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_round(alert_id, channels).await });
    }

    /// One dispatch round: every channel runs independently, outcomes are
    /// folded in as they complete.
    async fn run_round(self: Arc<Self>, alert_id: AlertId, channels: Vec<DispatchChannel>) {
        let Some(alert) = self.alerts.get(&alert_id).map(|a| a.clone()) else {
            return;
        };
        let notice = EmergencyNotice {
            alert_id,
            alert_type: alert.alert_type,
            landmark: alert.landmark.clone(),
            location: alert.location,
            message: alert.message.clone(),
            triggered_at: alert.created_at,
        };

        let mut pending: HashSet<DispatchChannel> = channels.iter().copied().collect();
        let mut set = JoinSet::new();
        for channel in channels {
            let target = self.target_for(channel, &alert);
            let this = Arc::clone(&self);
            let notice = notice.clone();
            let origin = alert.session_id;
            set.spawn(async move {
                let (attempts, outcome) = match target {
                    Target::Recipient(recipient) => {
                        deliver_with_retry(
                            this.dispatcher.as_ref(),
                            this.policy,
                            channel,
                            &recipient,
                            &notice,
                        )
                        .await
                    }
                    Target::Nearby => (1, this.broadcast_nearby(&notice, origin)),
                    Target::Unreachable(reason) => (1, DeliveryOutcome::permanent(reason)),
                };
                (channel, attempts, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((channel, attempts, outcome)) => {
                    pending.remove(&channel);
                    self.record(alert_id, channel, attempts, outcome);
                }
                Err(e) => error!(alert_id = %alert_id, error = %e, "Dispatch task failed"),
            }
        }
        for channel in pending {
            self.record(alert_id, channel, 0, DeliveryOutcome::permanent("dispatch task aborted"));
        }

        self.finish_round(alert_id);
    }

    fn broadcast_nearby(&self, notice: &EmergencyNotice, origin: SessionId) -> DeliveryOutcome {
        let mut recipients = self
            .presence
            .registry
            .sessions_within(&notice.location, self.config.nearby_radius_m);
        recipients.remove(&origin);

        let payload = AlertBroadcast {
            alert_id: notice.alert_id,
            alert_type: notice.alert_type,
            approximate_location: notice.location.coarsened(),
            landmark: notice.landmark.clone(),
            triggered_at: notice.triggered_at,
        };
        let delivered = self
            .presence
            .hub
            .publish_to(&recipients, LiveMessage::Alert(payload));
        info!(
            alert_id = %notice.alert_id,
            nearby_sessions = recipients.len(),
            delivered,
            "Nearby broadcast sent"
        );
        DeliveryOutcome::Success
    }

    fn record(&self, alert_id: AlertId, channel: DispatchChannel, attempts: u32, outcome: DeliveryOutcome) {
        let result = match &outcome {
            DeliveryOutcome::Success => "success",
            DeliveryOutcome::TransientFailure { .. } => "transient_failure",
            DeliveryOutcome::PermanentFailure { .. } => "permanent_failure",
        };
        metrics::counter!(
            "emergency.dispatch.outcomes",
            "channel" => channel.display_name(),
            "result" => result
        )
        .increment(1);

        if let Some(mut alert) = self.alerts.get_mut(&alert_id) {
            alert.dispatch_log.push(DispatchLogEntry {
                channel,
                attempt_count: attempts,
                outcome,
                timestamp: self.clock.now(),
            });
        }
    }

    fn finish_round(&self, alert_id: AlertId) {
        let Some(mut alert) = self.alerts.get_mut(&alert_id) else {
            return;
        };
        let failed = alert.failed_channels();
        let all_delivered = failed.is_empty();
        match alert.apply(AlertAction::CompleteDispatch { all_delivered }) {
            Ok(status) => {
                let (event, detail) = if all_delivered {
                    (AuditEventType::AlertDispatched, None)
                } else {
                    let names: Vec<&str> = failed.iter().map(|c| c.display_name()).collect();
                    (AuditEventType::AlertPartiallyFailed, Some(names.join(",")))
                };
                info!(alert_id = %alert_id, status = %status, failed = failed.len(), "Dispatch round complete");
                self.event_sink
                    .emit(make_event(event, alert_id.to_string(), detail));
                self.notify(alert_id, status);
            }
            Err(e) => error!(alert_id = %alert_id, error = %e, "Dispatch round finished in unexpected state"),
        }
    }

    fn notify(&self, alert_id: AlertId, status: AlertStatus) {
        if let Some(tx) = self.status_watchers.get(&alert_id) {
            tx.send_replace(status);
        }
    }

    /// Close an alert. Allowed once, from `Dispatched` or `PartiallyFailed`.
    pub fn resolve(&self, alert_id: AlertId, note: Option<String>) -> PresenceResult<EmergencyAlert> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(PresenceError::AlertNotFound(alert_id))?;
        let status = alert.apply(AlertAction::Resolve)?;
        alert.resolved_at = Some(self.clock.now());
        alert.resolver_note = note.filter(|n| !n.trim().is_empty());
        let resolved = alert.clone();
        drop(alert);

        info!(alert_id = %alert_id, "Emergency alert resolved");
        metrics::counter!("emergency.alerts.resolved").increment(1);
        self.event_sink
            .emit(make_event(AuditEventType::AlertResolved, alert_id.to_string(), None));
        self.notify(alert_id, status);
        Ok(resolved)
    }

    /// Re-dispatch only the channels whose latest outcome is a failure.
    pub fn retry_failed(self: &Arc<Self>, alert_id: AlertId) -> PresenceResult<EmergencyAlert> {
        let mut alert = self
            .alerts
            .get_mut(&alert_id)
            .ok_or(PresenceError::AlertNotFound(alert_id))?;
        let channels = alert.failed_channels();
        let status = alert.apply(AlertAction::RetryFailed)?;
        let snapshot = alert.clone();
        drop(alert);

        info!(alert_id = %alert_id, channels = channels.len(), "Retrying failed channels");
        self.notify(alert_id, status);
        self.spawn_round(alert_id, channels);
        Ok(snapshot)
    }

    pub fn get(&self, alert_id: AlertId) -> PresenceResult<EmergencyAlert> {
        self.alerts
            .get(&alert_id)
            .map(|a| a.clone())
            .ok_or(PresenceError::AlertNotFound(alert_id))
    }

    /// Non-resolved alerts, oldest first.
    pub fn list_active(&self, session_id: Option<&SessionId>) -> Vec<EmergencyAlert> {
        let mut active: Vec<EmergencyAlert> = self
            .alerts
            .iter()
            .filter(|a| a.is_active())
            .filter(|a| session_id.map_or(true, |s| a.session_id == *s))
            .map(|a| a.value().clone())
            .collect();
        active.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.alert_id.cmp(&b.alert_id))
        });
        active
    }

    pub fn active_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.is_active()).count()
    }

    /// Wait until the alert's current dispatch round has finished.
    pub async fn await_settled(&self, alert_id: AlertId) -> PresenceResult<AlertStatus> {
        let mut rx = self
            .status_watchers
            .get(&alert_id)
            .map(|tx| tx.subscribe())
            .ok_or(PresenceError::AlertNotFound(alert_id))?;
        let status = rx
            .wait_for(|status| !in_flight(*status))
            .await
            .map_err(|e| PresenceError::Internal(anyhow::anyhow!("status channel closed: {e}")))?;
        Ok(*status)
    }

    /// Forget idempotency keys older than the dedup window.
    pub fn purge_idempotency_keys(&self) -> usize {
        let cutoff = self.clock.now() - Duration::seconds(self.config.dedup_window_secs as i64);
        let before = self.idempotency.len();
        self.idempotency.retain(|_, (_, first_seen)| *first_seen > cutoff);
        before.saturating_sub(self.idempotency.len())
    }
}

impl SweepTask for EmergencyCoordinator {
    fn name(&self) -> &'static str {
        "emergency_idempotency"
    }

    fn sweep(&self) -> usize {
        self.purge_idempotency_keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_channels::{ChannelRouter, EmailGateway, ScriptedDispatcher, SmsGateway};
    use campus_core::clock::ManualClock;
    use campus_core::config::AppConfig;
    use campus_core::contact::ContactSealer;
    use campus_core::event_bus::{capture_sink, CaptureSink};
    use campus_core::types::{BikeAvailability, PositionFix, Role};
    use campus_geofence::CampusBoundary;
    use std::time::Duration as StdDuration;

    const GATE: GeoPoint = GeoPoint::new(7.5227, 4.5198);

    struct Fixture {
        coordinator: Arc<EmergencyCoordinator>,
        presence: Arc<PresenceService>,
        dispatcher: Arc<ScriptedDispatcher>,
        clock: Arc<ManualClock>,
        sink: Arc<CaptureSink>,
    }

    fn fixture(dispatcher: ScriptedDispatcher) -> Fixture {
        let config = AppConfig::default();
        let clock = ManualClock::starting_now();
        let campus = Arc::new(CampusBoundary::from_config(&config.campus).unwrap());
        let sink = capture_sink();
        let presence = Arc::new(PresenceService::new(
            &config,
            campus,
            clock.clone(),
            Arc::new(ContactSealer::random()),
            sink.clone(),
        ));
        let dispatcher = Arc::new(dispatcher);
        let coordinator = Arc::new(
            EmergencyCoordinator::new(
                config.emergency.clone(),
                presence.clone(),
                dispatcher.clone(),
                clock.clone(),
            )
            .with_event_sink(sink.clone()),
        );
        Fixture {
            coordinator,
            presence,
            dispatcher,
            clock,
            sink,
        }
    }

    fn verified_session(f: &Fixture, contact: Option<&str>, at: GeoPoint) -> SessionId {
        let s = f.presence.sessions.create(Role::Passenger, contact).unwrap();
        f.presence
            .registry
            .report(
                &s.session_id,
                PositionFix {
                    point: at,
                    accuracy_meters: 10.0,
                },
                BikeAvailability::Unknown,
            )
            .unwrap();
        s.session_id
    }

    fn request(session_id: SessionId, key: &str) -> TriggerRequest {
        TriggerRequest {
            session_id,
            location: GATE,
            alert_type: AlertType::Panic,
            message: None,
            idempotency_key: key.to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_dispatches_all_channels() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, Some("08012345678"), GATE);

        let alert = f.coordinator.trigger(request(sid, "k1")).unwrap();
        assert_eq!(alert.status, AlertStatus::Dispatching);
        assert_eq!(alert.message, "Emergency alert near At Main Gate");

        let status = f.coordinator.await_settled(alert.alert_id).await.unwrap();
        assert_eq!(status, AlertStatus::Dispatched);

        let alert = f.coordinator.get(alert.alert_id).unwrap();
        let channels: HashSet<DispatchChannel> =
            alert.dispatch_log.iter().map(|e| e.channel).collect();
        assert_eq!(channels.len(), 5);
        assert_eq!(alert.dispatch_log.len(), 5);
        assert!(alert.dispatch_log.iter().all(|e| e.attempt_count == 1));

        let personal = f
            .dispatcher
            .calls()
            .into_iter()
            .find(|c| c.channel == DispatchChannel::PersonalContact)
            .unwrap();
        assert_eq!(personal.recipient, "08012345678");
        assert_eq!(f.sink.count_type(AuditEventType::AlertDispatched), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_plaintext_contact_not_retained_after_dispatch() {
        let config = AppConfig::default();
        let clock = ManualClock::starting_now();
        let campus = Arc::new(CampusBoundary::from_config(&config.campus).unwrap());
        let presence = Arc::new(PresenceService::new(
            &config,
            campus,
            clock.clone(),
            Arc::new(ContactSealer::random()),
            noop_sink(),
        ));
        let sms = Arc::new(SmsGateway::new("OAU-BIKE"));
        let email = Arc::new(EmailGateway::new("emergency@oauife.edu.ng", "OAU Campus Emergency"));
        let coordinator = Arc::new(EmergencyCoordinator::new(
            config.emergency.clone(),
            presence.clone(),
            Arc::new(ChannelRouter::new(sms.clone(), email.clone())),
            clock.clone(),
        ));

        let session = presence
            .sessions
            .create(Role::Passenger, Some("08012345678"))
            .unwrap();
        presence
            .registry
            .report(
                &session.session_id,
                PositionFix {
                    point: GATE,
                    accuracy_meters: 10.0,
                },
                BikeAvailability::Unknown,
            )
            .unwrap();
        let alert = coordinator.trigger(request(session.session_id, "k")).unwrap();
        assert_eq!(
            coordinator.await_settled(alert.alert_id).await.unwrap(),
            AlertStatus::Dispatched
        );

        presence.end_session(&session.session_id).unwrap();
        clock.advance(Duration::hours(48));
        presence.purge();

        assert_eq!(sms.list_messages(10).len(), 1);
        let held = format!(
            "{:?} {:?} {:?}",
            sms.list_messages(usize::MAX),
            email.sent(),
            coordinator.get(alert.alert_id).unwrap()
        );
        assert!(!held.contains("8012345678"), "plaintext contact retained: {held}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_location_rejected() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);
        let mut req = request(sid, "k");
        req.location = GeoPoint::new(500.0, 4.5198);

        let err = f.coordinator.trigger(req).unwrap_err();
        assert!(matches!(
            err,
            PresenceError::GeofenceRejected(GeofenceReason::InvalidCoordinates)
        ));
        assert_eq!(f.coordinator.active_count(), 0);
        assert!(f.dispatcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_contact_skips_personal_channel() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);
        let alert = f.coordinator.trigger(request(sid, "k")).unwrap();
        f.coordinator.await_settled(alert.alert_id).await.unwrap();

        let alert = f.coordinator.get(alert.alert_id).unwrap();
        assert_eq!(alert.dispatch_log.len(), 4);
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::PersonalContact), 0);
    }

    #[tokio::test]
    async fn test_unverified_session_rejected() {
        let f = fixture(ScriptedDispatcher::new());
        let s = f.presence.sessions.create(Role::Driver, None).unwrap();
        assert!(matches!(
            f.coordinator.trigger(request(s.session_id, "k")),
            Err(PresenceError::SessionInvalid)
        ));
        assert!(matches!(
            f.coordinator.trigger(request(SessionId::new(), "k")),
            Err(PresenceError::SessionInvalid)
        ));
        assert!(f.coordinator.list_active(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idempotent_trigger() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);

        let first = f.coordinator.trigger(request(sid, "same-key")).unwrap();
        let second = f.coordinator.trigger(request(sid, "same-key")).unwrap();
        assert_eq!(first.alert_id, second.alert_id);
        f.coordinator.await_settled(first.alert_id).await.unwrap();

        assert_eq!(f.coordinator.list_active(None).len(), 1);
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::CampusSecurity), 1);
        assert_eq!(f.sink.count_type(AuditEventType::AlertTriggered), 1);

        let other = f.coordinator.trigger(request(sid, "other-key")).unwrap();
        assert_ne!(other.alert_id, first.alert_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_reusable_after_window() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);

        let first = f.coordinator.trigger(request(sid, "k")).unwrap();
        f.clock.advance(Duration::minutes(11));
        let second = f.coordinator.trigger(request(sid, "k")).unwrap();
        assert_ne!(first.alert_id, second.alert_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_channel_yields_partially_failed() {
        let f = fixture(
            ScriptedDispatcher::new()
                .always(DispatchChannel::Clinic, DeliveryOutcome::transient("unreachable")),
        );
        let sid = verified_session(&f, None, GATE);
        let alert = f.coordinator.trigger(request(sid, "k")).unwrap();

        let status = f.coordinator.await_settled(alert.alert_id).await.unwrap();
        assert_eq!(status, AlertStatus::PartiallyFailed);

        let alert = f.coordinator.get(alert.alert_id).unwrap();
        let failures: Vec<&DispatchLogEntry> = alert
            .dispatch_log
            .iter()
            .filter(|e| !e.outcome.is_success())
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].channel, DispatchChannel::Clinic);
        assert_eq!(failures[0].attempt_count, 3);
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::Clinic), 3);
        assert_eq!(f.sink.count_type(AuditEventType::AlertPartiallyFailed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolve_rules() {
        let f = fixture(
            ScriptedDispatcher::new().delay(DispatchChannel::CampusSecurity, StdDuration::from_secs(1)),
        );
        let sid = verified_session(&f, None, GATE);
        let alert = f.coordinator.trigger(request(sid, "k")).unwrap();

        assert!(matches!(
            f.coordinator.resolve(alert.alert_id, None),
            Err(PresenceError::InvalidTransition {
                from: AlertStatus::Dispatching,
                ..
            })
        ));

        f.coordinator.await_settled(alert.alert_id).await.unwrap();
        let resolved = f
            .coordinator
            .resolve(alert.alert_id, Some("Handled by security".to_string()))
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert_eq!(resolved.resolver_note.as_deref(), Some("Handled by security"));

        assert!(matches!(
            f.coordinator.resolve(alert.alert_id, None),
            Err(PresenceError::InvalidTransition {
                from: AlertStatus::Resolved,
                ..
            })
        ));
        assert!(matches!(
            f.coordinator.resolve(AlertId::new(), None),
            Err(PresenceError::AlertNotFound(_))
        ));
        assert!(f.coordinator.list_active(None).is_empty());
        assert_eq!(f.sink.count_type(AuditEventType::AlertResolved), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failed_redispatches_only_failures() {
        let f = fixture(
            ScriptedDispatcher::new()
                .always(DispatchChannel::StudentUnion, DeliveryOutcome::permanent("rejected")),
        );
        let sid = verified_session(&f, None, GATE);
        let alert = f.coordinator.trigger(request(sid, "k")).unwrap();
        assert_eq!(
            f.coordinator.await_settled(alert.alert_id).await.unwrap(),
            AlertStatus::PartiallyFailed
        );
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::StudentUnion), 1);

        f.dispatcher
            .set_fallback(DispatchChannel::StudentUnion, DeliveryOutcome::Success);
        let retrying = f.coordinator.retry_failed(alert.alert_id).unwrap();
        assert_eq!(retrying.status, AlertStatus::Dispatching);
        assert_eq!(
            f.coordinator.await_settled(alert.alert_id).await.unwrap(),
            AlertStatus::Dispatched
        );

        let alert = f.coordinator.get(alert.alert_id).unwrap();
        assert_eq!(alert.dispatch_log.len(), 5);
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::CampusSecurity), 1);
        assert_eq!(f.dispatcher.calls_for(DispatchChannel::StudentUnion), 2);
        assert!(matches!(
            f.coordinator.retry_failed(alert.alert_id),
            Err(PresenceError::InvalidTransition { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nearby_broadcast_reaches_only_nearby_subscribers() {
        let f = fixture(ScriptedDispatcher::new());
        let origin = verified_session(&f, None, GATE);
        let near = verified_session(&f, None, GeoPoint::new(7.5245, 4.5203));
        let far = verified_session(&f, None, GeoPoint::new(7.5345, 4.5123));

        let mut origin_sub = f.presence.subscribe(&origin).unwrap();
        let mut near_sub = f.presence.subscribe(&near).unwrap();
        let mut far_sub = f.presence.subscribe(&far).unwrap();
        for sub in [&mut origin_sub, &mut near_sub, &mut far_sub] {
            assert!(matches!(sub.receiver.try_recv().unwrap(), LiveMessage::Snapshot(_)));
        }

        let alert = f.coordinator.trigger(request(origin, "k")).unwrap();
        f.coordinator.await_settled(alert.alert_id).await.unwrap();

        match near_sub.receiver.try_recv().unwrap() {
            LiveMessage::Alert(payload) => {
                assert_eq!(payload.alert_id, alert.alert_id);
                assert_eq!(payload.approximate_location, GeoPoint::new(7.523, 4.520));
                let json = serde_json::to_string(&payload).unwrap();
                assert!(!json.contains(&origin.to_string()));
                assert!(!json.contains(&origin.public_alias()));
            }
            other => panic!("expected alert, got {other:?}"),
        }
        assert!(far_sub.receiver.try_recv().is_err());
        assert!(origin_sub.receiver.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_alert_survives_session_end() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);
        let alert = f.coordinator.trigger(request(sid, "k")).unwrap();
        f.coordinator.await_settled(alert.alert_id).await.unwrap();

        f.presence.end_session(&sid).unwrap();
        assert_eq!(f.coordinator.list_active(Some(&sid)).len(), 1);
        assert!(f.coordinator.resolve(alert.alert_id, None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_active_filters_by_session() {
        let f = fixture(ScriptedDispatcher::new());
        let a = verified_session(&f, None, GATE);
        let b = verified_session(&f, None, GATE);
        f.coordinator.trigger(request(a, "1")).unwrap();
        f.clock.advance(Duration::seconds(1));
        f.coordinator.trigger(request(a, "2")).unwrap();
        f.coordinator.trigger(request(b, "1")).unwrap();

        let mine = f.coordinator.list_active(Some(&a));
        assert_eq!(mine.len(), 2);
        assert!(mine[0].created_at <= mine[1].created_at);
        assert_eq!(f.coordinator.list_active(None).len(), 3);
        assert_eq!(f.coordinator.active_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_idempotency_keys() {
        let f = fixture(ScriptedDispatcher::new());
        let sid = verified_session(&f, None, GATE);
        f.coordinator.trigger(request(sid, "k")).unwrap();
        assert_eq!(f.coordinator.purge_idempotency_keys(), 0);
        f.clock.advance(Duration::minutes(11));
        assert_eq!(f.coordinator.sweep(), 1);
    }
}
