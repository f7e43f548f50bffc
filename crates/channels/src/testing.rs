//! Scriptable dispatcher for exercising retry and partial-failure paths.

use crate::dispatcher::NotificationDispatcher;
use crate::notice::EmergencyNotice;
use async_trait::async_trait;
use campus_core::types::{DeliveryOutcome, DispatchChannel};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSend {
    pub channel: DispatchChannel,
    pub recipient: String,
    pub notice: EmergencyNotice,
}

#[derive(Default)]
struct Script {
    queued: VecDeque<DeliveryOutcome>,
    fallback: Option<DeliveryOutcome>,
    delay: Option<Duration>,
}

/// Returns queued outcomes per channel, then the channel's fallback, then
/// `Success`. Every call is recorded.
#[derive(Default)]
pub struct ScriptedDispatcher {
    scripts: Mutex<HashMap<DispatchChannel, Script>>,
    calls: Mutex<Vec<RecordedSend>>,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue outcomes for the next calls on `channel`.
    pub fn script(self, channel: DispatchChannel, outcomes: Vec<DeliveryOutcome>) -> Self {
        self.scripts
            .lock()
            .entry(channel)
            .or_default()
            .queued
            .extend(outcomes);
        self
    }

    /// Outcome for every call on `channel` once its queue is drained.
    pub fn always(self, channel: DispatchChannel, outcome: DeliveryOutcome) -> Self {
        self.scripts.lock().entry(channel).or_default().fallback = Some(outcome);
        self
    }

    /// Sleep before answering on `channel`.
    pub fn delay(self, channel: DispatchChannel, delay: Duration) -> Self {
        self.scripts.lock().entry(channel).or_default().delay = Some(delay);
        self
    }

    /// Replace the fallback at runtime, e.g. to let a retry succeed.
    pub fn set_fallback(&self, channel: DispatchChannel, outcome: DeliveryOutcome) {
        self.scripts.lock().entry(channel).or_default().fallback = Some(outcome);
    }

    pub fn calls(&self) -> Vec<RecordedSend> {
        self.calls.lock().clone()
    }

    pub fn calls_for(&self, channel: DispatchChannel) -> usize {
        self.calls.lock().iter().filter(|c| c.channel == channel).count()
    }
}

#[async_trait]
impl NotificationDispatcher for ScriptedDispatcher {
    async fn send(
        &self,
        channel: DispatchChannel,
        recipient: &str,
        notice: &EmergencyNotice,
    ) -> DeliveryOutcome {
        self.calls.lock().push(RecordedSend {
            channel,
            recipient: recipient.to_string(),
            notice: notice.clone(),
        });

        let (outcome, delay) = {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(channel).or_default();
            let outcome = script
                .queued
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(DeliveryOutcome::Success);
            (outcome, script.delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        outcome
    }
}
