//! Local voice backend.
//!
//! Sessions are always ready; the player pipes each resource into a sink
//! process (`ffplay` by default) on the host machine.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use jukebox_types::TransportState;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use crate::config::SinkSettings;
use crate::error::{PlayerError, TransportError};
use crate::resource::AudioResource;
use crate::track::Track;
use crate::voice::{ChannelRef, Player, PlayerState, PlayerTransition, TransportSession, VoiceGateway};

const PIPE_CHUNK_BYTES: usize = 16 * 1024;

pub struct LocalGateway {
    sink: SinkSettings,
}

impl LocalGateway {
    pub fn new(sink: SinkSettings) -> Self {
        Self { sink }
    }
}

#[async_trait]
impl VoiceGateway for LocalGateway {
    async fn join(&self, channel: &ChannelRef) -> Result<Arc<dyn TransportSession>, TransportError> {
        tracing::info!(
            scope = %channel.scope,
            channel = %channel.channel_id,
            sink = %self.sink.program,
            "opening local session"
        );
        let session: Arc<dyn TransportSession> = Arc::new(LocalSession::new());
        Ok(session)
    }

    fn create_player(&self, _session: &Arc<dyn TransportSession>) -> Arc<dyn Player> {
        Arc::new(ProcessPlayer::new(self.sink.clone()))
    }
}

pub struct LocalSession {
    state: watch::Sender<TransportState>,
}

impl LocalSession {
    pub fn new() -> Self {
        let (state, _) = watch::channel(TransportState::Ready);
        Self { state }
    }
}

impl Default for LocalSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportSession for LocalSession {
    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn watch(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    fn destroy(&self) {
        self.state.send_replace(TransportState::Destroyed);
    }
}

struct Slot {
    /// Bumped on every play/stop; pumps only report for their own generation.
    generation: u64,
    state: PlayerState,
    cancel: Option<CancellationToken>,
}

struct Shared {
    slot: Mutex<Slot>,
    events: broadcast::Sender<PlayerTransition>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn transition_locked(&self, slot: &mut Slot, to: PlayerState) {
        let from = std::mem::replace(&mut slot.state, to.clone());
        let _ = self.events.send(PlayerTransition { from, to });
    }

    /// Move to `to` unless a newer play/stop has superseded `generation`.
    fn transition(&self, generation: u64, to: PlayerState) -> bool {
        let mut slot = self.lock();
        if slot.generation != generation {
            return false;
        }
        if to.is_idle() {
            slot.cancel = None;
        }
        self.transition_locked(&mut slot, to);
        true
    }
}

/// Plays resources by streaming them into a sink process's stdin.
pub struct ProcessPlayer {
    sink: SinkSettings,
    shared: Arc<Shared>,
}

impl ProcessPlayer {
    pub fn new(sink: SinkSettings) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            sink,
            shared: Arc::new(Shared {
                slot: Mutex::new(Slot {
                    generation: 0,
                    state: PlayerState::Idle,
                    cancel: None,
                }),
                events,
            }),
        }
    }

    fn spawn_sink(&self) -> Result<(Child, ChildStdin), PlayerError> {
        let mut child = Command::new(&self.sink.program)
            .args(&self.sink.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| PlayerError::Output(format!("spawn {}: {err}", self.sink.program)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PlayerError::Output("sink stdin unavailable".to_string()))?;
        Ok((child, stdin))
    }
}

impl Player for ProcessPlayer {
    fn play(&self, resource: AudioResource) -> Result<(), PlayerError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| PlayerError::Offline)?;
        let (child, stdin) = self.spawn_sink()?;
        let track = Arc::clone(resource.track());
        let cancel = CancellationToken::new();

        let generation = {
            let mut slot = self.shared.lock();
            if let Some(previous) = slot.cancel.replace(cancel.clone()) {
                previous.cancel();
            }
            slot.generation += 1;
            self.shared
                .transition_locked(&mut slot, PlayerState::Buffering(Arc::clone(&track)));
            slot.generation
        };
        tracing::debug!(
            title = %track.title(),
            format = %resource.format(),
            sink = %self.sink.program,
            "sink started"
        );

        let shared = Arc::clone(&self.shared);
        runtime.spawn(run_sink(shared, generation, track, resource, child, stdin, cancel));
        Ok(())
    }

    fn stop(&self) -> bool {
        let mut slot = self.shared.lock();
        if slot.state.is_idle() {
            return false;
        }
        slot.generation += 1;
        if let Some(cancel) = slot.cancel.take() {
            cancel.cancel();
        }
        self.shared.transition_locked(&mut slot, PlayerState::Idle);
        true
    }

    fn state(&self) -> PlayerState {
        self.shared.lock().state.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerTransition> {
        self.shared.events.subscribe()
    }
}

async fn run_sink(
    shared: Arc<Shared>,
    generation: u64,
    track: Arc<Track>,
    mut resource: AudioResource,
    mut child: Child,
    stdin: ChildStdin,
    cancel: CancellationToken,
) {
    let outcome = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        result = pump(&shared, generation, &track, &mut resource, stdin, &mut child) => Some(result),
    };
    match outcome {
        None => {
            let _ = child.start_kill();
            tracing::debug!(title = %track.title(), "sink stopped");
        }
        Some(Ok(())) => {
            tracing::debug!(title = %track.title(), "sink drained");
        }
        Some(Err(err)) => {
            let _ = child.start_kill();
            tracing::warn!(title = %track.title(), error = %err, "local playback error");
        }
    }
    drop(resource);
    let _ = child.wait().await;
    shared.transition(generation, PlayerState::Idle);
}

async fn pump(
    shared: &Shared,
    generation: u64,
    track: &Arc<Track>,
    resource: &mut AudioResource,
    mut stdin: ChildStdin,
    child: &mut Child,
) -> std::io::Result<()> {
    let mut buf = vec![0u8; PIPE_CHUNK_BYTES];
    let mut started = false;
    loop {
        let n = resource.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        stdin.write_all(&buf[..n]).await?;
        if !started {
            started = true;
            shared.transition(generation, PlayerState::Playing(Arc::clone(track)));
        }
    }
    stdin.shutdown().await?;
    drop(stdin);
    let status = child.wait().await?;
    if !status.success() {
        tracing::debug!(title = %track.title(), status = %status, "sink exited with failure");
    }
    Ok(())
}
