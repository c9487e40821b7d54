use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of the scope a subscription belongs to (one per guild/server).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScopeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ScopeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Connection state of a voice transport session.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    /// Waiting for the chat gateway to hand out voice server details.
    Signalling,
    /// Voice server known, media connection being established.
    Connecting,
    /// Audio can be sent.
    Ready,
    /// Connection lost; the transport may reconnect on its own.
    Disconnected,
    /// Torn down for good.
    Destroyed,
}

impl TransportState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransportState::Destroyed)
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportState::Signalling => "signalling",
            TransportState::Connecting => "connecting",
            TransportState::Ready => "ready",
            TransportState::Disconnected => "disconnected",
            TransportState::Destroyed => "destroyed",
        };
        f.write_str(label)
    }
}

/// Player status without the attached resource.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PlayerStatusKind {
    Idle,
    Buffering,
    Playing,
    Paused,
}

/// Display-oriented view of a queued or playing track.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackSummary {
    /// Human-readable title.
    pub title: String,
    /// Canonical source URL.
    pub url: String,
    /// `true` when the track replays on completion.
    pub repeating: bool,
}

/// What the player of a subscription is doing right now.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NowPlaying {
    /// Nothing attached to the player.
    Idle,
    /// A track is attached (buffering, playing or paused).
    Active {
        status: PlayerStatusKind,
        track: TrackSummary,
    },
}

impl NowPlaying {
    pub fn track(&self) -> Option<&TrackSummary> {
        match self {
            NowPlaying::Idle => None,
            NowPlaying::Active { track, .. } => Some(track),
        }
    }
}

/// Queue listing returned to front ends.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueView {
    /// Player state at the time of the snapshot.
    pub now_playing: NowPlaying,
    /// Upcoming tracks, truncated to the requested limit.
    pub upcoming: Vec<TrackSummary>,
    /// Total number of queued tracks (before truncation).
    pub total: usize,
}
