//! The alert record and its state machine.

use campus_core::contact::SealedContact;
use campus_core::error::{PresenceError, PresenceResult};
use campus_core::types::{
    AlertId, AlertStatus, AlertType, DeliveryOutcome, DispatchChannel, DispatchLogEntry, GeoPoint,
    SessionId,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EmergencyAlert {
    pub alert_id: AlertId,
    /// The originating session is a bearer credential and stays server-side.
    /// Its public alias is not exposed either, so an alert cannot be joined
    /// to a peer in the live snapshot.
    #[serde(skip)]
    pub session_id: SessionId,
    pub alert_type: AlertType,
    /// Copy of the position at trigger time.
    pub location: GeoPoint,
    pub landmark: String,
    pub message: String,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolver_note: Option<String>,
    pub dispatch_log: Vec<DispatchLogEntry>,
    #[serde(skip)]
    pub(crate) contact: Option<SealedContact>,
}

impl EmergencyAlert {
    pub fn is_active(&self) -> bool {
        self.status != AlertStatus::Resolved
    }

    /// Still fanning out; resolution is not yet allowed.
    pub fn in_flight(&self) -> bool {
        in_flight(self.status)
    }

    /// Most recent outcome recorded for each channel.
    pub fn latest_outcomes(&self) -> BTreeMap<DispatchChannel, &DeliveryOutcome> {
        self.dispatch_log
            .iter()
            .map(|entry| (entry.channel, &entry.outcome))
            .collect()
    }

    /// Channels whose latest log entry is a failure, in fan-out order.
    pub fn failed_channels(&self) -> Vec<DispatchChannel> {
        self.latest_outcomes()
            .into_iter()
            .filter(|(_, outcome)| !outcome.is_success())
            .map(|(channel, _)| channel)
            .collect()
    }

    /// Apply `action`, or report why it is not allowed from the current state.
    pub fn apply(&mut self, action: AlertAction) -> PresenceResult<AlertStatus> {
        let next = next_status(self.status, action)?;
        self.status = next;
        Ok(next)
    }
}

pub fn in_flight(status: AlertStatus) -> bool {
    matches!(status, AlertStatus::Triggered | AlertStatus::Dispatching)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    StartDispatch,
    CompleteDispatch { all_delivered: bool },
    RetryFailed,
    Resolve,
}

impl AlertAction {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StartDispatch => "dispatch",
            Self::CompleteDispatch { .. } => "complete dispatch of",
            Self::RetryFailed => "retry",
            Self::Resolve => "resolve",
        }
    }
}

/// Triggered -> Dispatching -> Dispatched | PartiallyFailed -> Resolved,
/// with PartiallyFailed -> Dispatching for a targeted retry.
pub fn next_status(from: AlertStatus, action: AlertAction) -> PresenceResult<AlertStatus> {
    use AlertStatus::*;
    let next = match (from, action) {
        (Triggered, AlertAction::StartDispatch) => Dispatching,
        (Dispatching, AlertAction::CompleteDispatch { all_delivered: true }) => Dispatched,
        (Dispatching, AlertAction::CompleteDispatch { all_delivered: false }) => PartiallyFailed,
        (PartiallyFailed, AlertAction::RetryFailed) => Dispatching,
        (Dispatched | PartiallyFailed, AlertAction::Resolve) => Resolved,
        (from, action) => {
            return Err(PresenceError::InvalidTransition {
                from,
                action: action.name(),
            })
        }
    };
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn alert(status: AlertStatus) -> EmergencyAlert {
        EmergencyAlert {
            alert_id: AlertId::new(),
            session_id: SessionId::new(),
            alert_type: AlertType::Panic,
            location: GeoPoint::new(7.5227, 4.5198),
            landmark: "At Main Gate".to_string(),
            message: "Help".to_string(),
            status,
            created_at: Utc::now(),
            resolved_at: None,
            resolver_note: None,
            dispatch_log: Vec::new(),
            contact: None,
        }
    }

    fn entry(channel: DispatchChannel, outcome: DeliveryOutcome) -> DispatchLogEntry {
        DispatchLogEntry {
            channel,
            attempt_count: 1,
            outcome,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_happy_path() {
        let mut a = alert(AlertStatus::Triggered);
        assert_eq!(a.apply(AlertAction::StartDispatch).unwrap(), AlertStatus::Dispatching);
        assert_eq!(
            a.apply(AlertAction::CompleteDispatch { all_delivered: true }).unwrap(),
            AlertStatus::Dispatched
        );
        assert_eq!(a.apply(AlertAction::Resolve).unwrap(), AlertStatus::Resolved);
        assert!(!a.is_active());
    }

    #[test]
    fn test_resolve_rejected_while_in_flight() {
        for status in [AlertStatus::Triggered, AlertStatus::Dispatching] {
            let mut a = alert(status);
            let err = a.apply(AlertAction::Resolve).unwrap_err();
            assert!(matches!(
                err,
                PresenceError::InvalidTransition { from, action: "resolve" } if from == status
            ));
            assert_eq!(a.status, status, "no state change on rejection");
        }
    }

    #[test]
    fn test_resolve_only_once() {
        let mut a = alert(AlertStatus::PartiallyFailed);
        assert!(a.apply(AlertAction::Resolve).is_ok());
        assert!(a.apply(AlertAction::Resolve).is_err());
        assert!(a.apply(AlertAction::RetryFailed).is_err());
    }

    #[test]
    fn test_retry_only_from_partially_failed() {
        assert_eq!(
            next_status(AlertStatus::PartiallyFailed, AlertAction::RetryFailed).unwrap(),
            AlertStatus::Dispatching
        );
        for status in [
            AlertStatus::Triggered,
            AlertStatus::Dispatching,
            AlertStatus::Dispatched,
            AlertStatus::Resolved,
        ] {
            assert!(next_status(status, AlertAction::RetryFailed).is_err());
        }
    }

    #[test]
    fn test_failed_channels_use_latest_entry() {
        let mut a = alert(AlertStatus::PartiallyFailed);
        a.dispatch_log = vec![
            entry(DispatchChannel::Clinic, DeliveryOutcome::transient("timeout")),
            entry(DispatchChannel::CampusSecurity, DeliveryOutcome::Success),
            entry(DispatchChannel::StudentUnion, DeliveryOutcome::permanent("bad number")),
            entry(DispatchChannel::Clinic, DeliveryOutcome::Success),
        ];
        assert_eq!(a.failed_channels(), vec![DispatchChannel::StudentUnion]);
    }

    #[test]
    fn test_serialized_alert_hides_session() {
        let a = alert(AlertStatus::Dispatched);
        let json = serde_json::to_string(&a).unwrap();
        assert!(!json.contains(&a.session_id.to_string()));
        assert!(json.contains("\"status\":\"dispatched\""));
    }
}
