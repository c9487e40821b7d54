//! Voice transport and player abstractions.
//!
//! The chat voice stack (gateway signalling, UDP media, Opus encoding) lives
//! behind these traits; subscriptions only react to state changes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jukebox_types::{PlayerStatusKind, ScopeId, TransportState};
use tokio::sync::{broadcast, watch};

use crate::error::{PlayerError, TransportError};
use crate::resource::AudioResource;
use crate::track::Track;

/// Voice channel inside a scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub scope: ScopeId,
    pub channel_id: String,
}

impl ChannelRef {
    pub fn new(scope: impl Into<ScopeId>, channel_id: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// Player status together with the track attached to it.
#[derive(Clone, Debug, Default)]
pub enum PlayerState {
    #[default]
    Idle,
    Buffering(Arc<Track>),
    Playing(Arc<Track>),
    Paused(Arc<Track>),
}

impl PlayerState {
    pub fn kind(&self) -> PlayerStatusKind {
        match self {
            PlayerState::Idle => PlayerStatusKind::Idle,
            PlayerState::Buffering(_) => PlayerStatusKind::Buffering,
            PlayerState::Playing(_) => PlayerStatusKind::Playing,
            PlayerState::Paused(_) => PlayerStatusKind::Paused,
        }
    }

    pub fn track(&self) -> Option<&Arc<Track>> {
        match self {
            PlayerState::Idle => None,
            PlayerState::Buffering(track)
            | PlayerState::Playing(track)
            | PlayerState::Paused(track) => Some(track),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, PlayerState::Idle)
    }
}

/// One player status change. Players may emit redundant transitions.
#[derive(Clone, Debug)]
pub struct PlayerTransition {
    pub from: PlayerState,
    pub to: PlayerState,
}

pub trait Player: Send + Sync {
    /// Attach a resource and start playing it, replacing anything attached.
    fn play(&self, resource: AudioResource) -> Result<(), PlayerError>;
    /// Detach the current resource. Returns `false` when already idle.
    fn stop(&self) -> bool;
    fn state(&self) -> PlayerState;
    fn subscribe(&self) -> broadcast::Receiver<PlayerTransition>;
}

pub trait TransportSession: Send + Sync {
    fn state(&self) -> TransportState;
    fn watch(&self) -> watch::Receiver<TransportState>;
    /// Leave the voice channel. Moves the session to `Destroyed`.
    fn destroy(&self);
}

#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, channel: &ChannelRef) -> Result<Arc<dyn TransportSession>, TransportError>;
    fn create_player(&self, session: &Arc<dyn TransportSession>) -> Arc<dyn Player>;
}

/// Wait until the session reaches `target`, bounded by `timeout`.
pub async fn wait_for_state(
    session: &dyn TransportSession,
    target: TransportState,
    timeout: Duration,
) -> Result<(), TransportError> {
    let mut states = session.watch();
    let reached = tokio::time::timeout(
        timeout,
        states.wait_for(|state| *state == target || state.is_terminal()),
    )
    .await
    .map_err(|_| TransportError::Timeout(timeout))?;
    match reached {
        Ok(state) if *state == target => Ok(()),
        _ => Err(TransportError::Destroyed),
    }
}
