//! Fan-out of presence deltas and alerts to live subscribers.
//!
//! Each subscriber owns a bounded queue. A subscriber that cannot keep up
//! is dropped rather than allowed to stall publishers or other subscribers.
//! New subscribers receive a full snapshot first, then every delta published
//! after the subscription was registered, with nothing lost in between.

use crate::messages::{LiveMessage, PresenceView};
use campus_core::types::SessionId;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Anything that can produce the current active-location set.
pub trait SnapshotSource {
    fn snapshot_views(&self) -> Vec<PresenceView>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

pub struct Subscription {
    pub id: SubscriberId,
    pub session_id: SessionId,
    pub receiver: mpsc::Receiver<LiveMessage>,
}

struct Subscriber {
    session_id: SessionId,
    tx: mpsc::Sender<LiveMessage>,
    /// Deltas held back while the initial snapshot is being taken.
    pending: Option<Vec<LiveMessage>>,
}

enum Delivery {
    Queued,
    Overloaded,
    Closed,
}

impl Subscriber {
    fn deliver(&mut self, msg: LiveMessage, capacity: usize) -> Delivery {
        if let Some(pending) = self.pending.as_mut() {
            if pending.len() >= capacity {
                return Delivery::Overloaded;
            }
            pending.push(msg);
            return Delivery::Queued;
        }
        match self.tx.try_send(msg) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(_)) => Delivery::Overloaded,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

pub struct BroadcastHub {
    subscribers: Mutex<HashMap<SubscriberId, Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl BroadcastHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: queue_capacity.max(1),
        }
    }

    /// Register a subscriber and seed it with a snapshot from `source`.
    ///
    /// The snapshot is taken without holding the hub lock; deltas published
    /// meanwhile are buffered and flushed right after it.
    pub fn subscribe(&self, session_id: SessionId, source: &dyn SnapshotSource) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::channel(self.capacity);

        self.subscribers.lock().insert(
            id,
            Subscriber {
                session_id,
                tx,
                pending: Some(Vec::new()),
            },
        );

        let snapshot = source.snapshot_views();
        let peers = snapshot.len();

        let mut subscribers = self.subscribers.lock();
        // Already gone if the session was torn down while snapshotting.
        if let Some(sub) = subscribers.get_mut(&id) {
            let pending = sub.pending.take().unwrap_or_default();
            let mut healthy = sub.tx.try_send(LiveMessage::Snapshot(snapshot)).is_ok();
            for msg in pending {
                if !healthy {
                    break;
                }
                healthy = sub.tx.try_send(msg).is_ok();
            }
            if !healthy {
                subscribers.remove(&id);
                metrics::counter!("hub.subscribers.dropped", "reason" => "overloaded").increment(1);
                warn!(subscriber = %id, "Subscriber overloaded during snapshot flush, dropped");
            }
        }
        let total = subscribers.len();
        drop(subscribers);

        metrics::gauge!("hub.subscribers").set(total as f64);
        debug!(subscriber = %id, peers, "Subscriber registered");

        Subscription {
            id,
            session_id,
            receiver,
        }
    }

    /// Enqueue `msg` for every subscriber. Never blocks.
    pub fn publish(&self, msg: LiveMessage) -> usize {
        self.publish_filtered(msg, |_| true)
    }

    /// Enqueue `msg` only for subscribers bound to one of `sessions`.
    pub fn publish_to(&self, sessions: &HashSet<SessionId>, msg: LiveMessage) -> usize {
        if sessions.is_empty() {
            return 0;
        }
        self.publish_filtered(msg, |session_id| sessions.contains(session_id))
    }

    fn publish_filtered<F>(&self, msg: LiveMessage, wanted: F) -> usize
    where
        F: Fn(&SessionId) -> bool,
    {
        let kind = msg.kind();
        let capacity = self.capacity;
        let mut delivered = 0;
        let mut overloaded = 0u64;

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, sub| {
            if !wanted(&sub.session_id) {
                return true;
            }
            match sub.deliver(msg.clone(), capacity) {
                Delivery::Queued => {
                    delivered += 1;
                    true
                }
                Delivery::Overloaded => {
                    overloaded += 1;
                    warn!(subscriber = %id, kind, "Subscriber queue full, dropping subscriber");
                    false
                }
                Delivery::Closed => false,
            }
        });
        let total = subscribers.len();
        drop(subscribers);

        if overloaded > 0 {
            metrics::counter!("hub.subscribers.dropped", "reason" => "overloaded")
                .increment(overloaded);
        }
        metrics::counter!("hub.messages.published", "kind" => kind).increment(delivered as u64);
        metrics::gauge!("hub.subscribers").set(total as f64);
        delivered
    }

    /// Idempotent.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "Subscriber removed");
        }
    }

    /// Drop every subscription bound to `session_id`. Their receivers close.
    pub fn unsubscribe_session(&self, session_id: &SessionId) -> usize {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|_, sub| sub.session_id != *session_id);
        before - subscribers.len()
    }

    pub fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}
