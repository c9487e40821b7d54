//! In-process event bus for subscription updates.
//!
//! Front ends subscribe to follow playback without polling the workers.

use jukebox_types::{ScopeId, TrackSummary, TransportState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JukeboxEvent {
    SubscriptionCreated { scope: ScopeId, channel_id: String },
    SubscriptionClosed { scope: ScopeId },
    QueueChanged { scope: ScopeId, queued: usize },
    TrackStarted { scope: ScopeId, track: TrackSummary },
    TrackFinished { scope: ScopeId, track: TrackSummary },
    TrackFailed {
        scope: ScopeId,
        track: TrackSummary,
        error: String,
    },
    TransportChanged { scope: ScopeId, state: TransportState },
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<JukeboxEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus with a bounded broadcast channel.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JukeboxEvent> {
        self.sender.subscribe()
    }

    pub fn subscription_created(&self, scope: &ScopeId, channel_id: &str) {
        self.publish(JukeboxEvent::SubscriptionCreated {
            scope: scope.clone(),
            channel_id: channel_id.to_string(),
        });
    }

    pub fn subscription_closed(&self, scope: &ScopeId) {
        self.publish(JukeboxEvent::SubscriptionClosed {
            scope: scope.clone(),
        });
    }

    /// Notify subscribers that the queue length changed.
    pub fn queue_changed(&self, scope: &ScopeId, queued: usize) {
        self.publish(JukeboxEvent::QueueChanged {
            scope: scope.clone(),
            queued,
        });
    }

    pub fn track_started(&self, scope: &ScopeId, track: TrackSummary) {
        self.publish(JukeboxEvent::TrackStarted {
            scope: scope.clone(),
            track,
        });
    }

    pub fn track_finished(&self, scope: &ScopeId, track: TrackSummary) {
        self.publish(JukeboxEvent::TrackFinished {
            scope: scope.clone(),
            track,
        });
    }

    pub fn track_failed(&self, scope: &ScopeId, track: TrackSummary, error: String) {
        self.publish(JukeboxEvent::TrackFailed {
            scope: scope.clone(),
            track,
            error,
        });
    }

    pub fn transport_changed(&self, scope: &ScopeId, state: TransportState) {
        self.publish(JukeboxEvent::TransportChanged {
            scope: scope.clone(),
            state,
        });
    }

    fn publish(&self, event: JukeboxEvent) {
        let _ = self.sender.send(event);
    }
}
