//! Fakes for the external collaborators, shared by unit tests.

use std::collections::HashMap;
use std::io::{self, Cursor};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use jukebox_types::TransportState;
use tokio::io::DuplexStream;
use tokio::sync::{broadcast, watch};

use crate::error::{CatalogError, MaterializeError, PlayerError, ResolutionError, TransportError};
use crate::media::{
    FetchProcess, MediaFetcher, MediaStream, MetadataLookup, ProcessControl, ResolvedMedia,
};
use crate::resource::{AudioResource, Container, StreamFormat};
use crate::track::{Track, TrackHooks};
use crate::voice::{ChannelRef, Player, PlayerState, PlayerTransition, TransportSession, VoiceGateway};
use crate::youtube::{PlaylistItem, PlaylistSource, SearchProvider};

pub(crate) type Log = Arc<Mutex<Vec<String>>>;

pub(crate) fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub(crate) fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

fn push(log: &Log, entry: impl Into<String>) {
    log.lock().unwrap().push(entry.into());
}

/// Hooks that append `start:<name>`, `finish:<name>` and `error:<name>`.
pub(crate) fn recording_hooks(log: &Log, name: &str) -> TrackHooks {
    let (start, finish, error) = (log.clone(), log.clone(), log.clone());
    let (n1, n2, n3) = (name.to_string(), name.to_string(), name.to_string());
    TrackHooks::new()
        .on_start(move || push(&start, format!("start:{n1}")))
        .on_finish(move || push(&finish, format!("finish:{n2}")))
        .on_error(move |_| push(&error, format!("error:{n3}")))
}

pub(crate) fn media_url(name: &str) -> String {
    format!("https://media.test/{name}")
}

/// Track named `name` with silent hooks.
pub(crate) fn track(name: &str) -> Track {
    Track::new(media_url(name), name, TrackHooks::new())
}

pub(crate) fn recorded_track(log: &Log, name: &str) -> Track {
    Track::new(media_url(name), name, recording_hooks(log, name))
}

/// Canonical 16-bit mono PCM WAV of `samples` silent frames.
pub(crate) fn wav_bytes(samples: usize) -> Vec<u8> {
    let data_len = (samples * 2) as u32;
    let mut out = Vec::with_capacity(44 + samples * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&48_000u32.to_le_bytes());
    out.extend_from_slice(&96_000u32.to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(44 + samples * 2, 0);
    out
}

struct NullControl;

impl ProcessControl for NullControl {
    fn kill(&mut self) {}

    fn exit_code(&mut self) -> Option<i32> {
        Some(0)
    }
}

/// Resource bound to `track` over an in-memory WAV stream.
pub(crate) fn resource_for(track: &Arc<Track>) -> AudioResource {
    AudioResource::new(
        Arc::clone(track),
        StreamFormat {
            container: Container::Wav,
            codec: Some("pcm_s16le"),
        },
        Box::pin(Cursor::new(wav_bytes(16))),
        Box::new(NullControl),
    )
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub(crate) async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[derive(Clone, Copy, Debug)]
pub(crate) enum FetchBehavior {
    Healthy,
    SpawnFails,
    Garbage,
    Empty,
    /// Never produces a byte until killed.
    Hang,
}

#[derive(Clone, Default)]
pub(crate) struct FakeFetcher {
    behaviors: Arc<Mutex<HashMap<String, FetchBehavior>>>,
    spawned: Log,
    killed: Log,
}

struct FakeControl {
    url: String,
    killed: Log,
    writer: Option<DuplexStream>,
}

impl ProcessControl for FakeControl {
    fn kill(&mut self) {
        self.writer = None;
        push(&self.killed, self.url.clone());
    }

    fn exit_code(&mut self) -> Option<i32> {
        None
    }
}

impl FakeFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn set(&self, url: &str, behavior: FetchBehavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(url.to_string(), behavior);
    }

    pub(crate) fn spawned(&self) -> Vec<String> {
        entries(&self.spawned)
    }

    pub(crate) fn killed(&self) -> Vec<String> {
        entries(&self.killed)
    }
}

impl MediaFetcher for FakeFetcher {
    fn spawn(&self, url: &str) -> Result<FetchProcess, MaterializeError> {
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(FetchBehavior::Healthy);
        if let FetchBehavior::SpawnFails = behavior {
            return Err(MaterializeError::Spawn(io::Error::new(
                io::ErrorKind::NotFound,
                "no such program",
            )));
        }
        push(&self.spawned, url);
        let mut control = FakeControl {
            url: url.to_string(),
            killed: self.killed.clone(),
            writer: None,
        };
        let stdout: MediaStream = match behavior {
            FetchBehavior::Healthy => Box::pin(Cursor::new(wav_bytes(4096))),
            FetchBehavior::Garbage => Box::pin(Cursor::new(b"<html>not audio</html>".to_vec())),
            FetchBehavior::Empty => Box::pin(Cursor::new(Vec::new())),
            FetchBehavior::Hang => {
                let (writer, reader) = tokio::io::duplex(64);
                control.writer = Some(writer);
                Box::pin(reader)
            }
            FetchBehavior::SpawnFails => unreachable!("handled above"),
        };
        Ok(FetchProcess::new(stdout, Box::new(control)))
    }
}

#[derive(Default)]
pub(crate) struct FakeLookup {
    known: HashMap<String, ResolvedMedia>,
}

impl FakeLookup {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, url: &str, canonical_url: &str, title: &str) -> Self {
        self.known.insert(
            url.to_string(),
            ResolvedMedia {
                canonical_url: canonical_url.to_string(),
                title: title.to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl MetadataLookup for FakeLookup {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolutionError> {
        self.known
            .get(url)
            .cloned()
            .ok_or_else(|| ResolutionError::Lookup {
                url: url.to_string(),
                reason: "video unavailable".to_string(),
            })
    }
}

#[derive(Default)]
pub(crate) struct FakeCatalog {
    playlists: HashMap<String, Vec<PlaylistItem>>,
    results: HashMap<String, String>,
    page_sizes: Mutex<Vec<u32>>,
}

impl FakeCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_playlist(mut self, id: &str, items: Vec<PlaylistItem>) -> Self {
        self.playlists.insert(id.to_string(), items);
        self
    }

    pub(crate) fn with_result(mut self, query: &str, url: &str) -> Self {
        self.results.insert(query.to_string(), url.to_string());
        self
    }

    pub(crate) fn requested_page_sizes(&self) -> Vec<u32> {
        self.page_sizes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlaylistSource for FakeCatalog {
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_size: u32,
    ) -> Result<Vec<PlaylistItem>, CatalogError> {
        self.page_sizes.lock().unwrap().push(page_size);
        self.playlists
            .get(playlist_id)
            .map(|items| items.iter().take(page_size as usize).cloned().collect())
            .ok_or_else(|| CatalogError::Api {
                status: 404,
                message: "playlist not found".to_string(),
            })
    }
}

#[async_trait]
impl SearchProvider for FakeCatalog {
    async fn search_first(&self, query: &str) -> Result<Option<String>, CatalogError> {
        Ok(self.results.get(query).cloned())
    }
}

pub(crate) struct FakeSession {
    state: watch::Sender<TransportState>,
    destroyed: AtomicUsize,
}

impl FakeSession {
    pub(crate) fn new(initial: TransportState) -> Arc<Self> {
        let (state, _) = watch::channel(initial);
        Arc::new(Self {
            state,
            destroyed: AtomicUsize::new(0),
        })
    }

    pub(crate) fn set(&self, state: TransportState) {
        self.state.send_replace(state);
    }

    pub(crate) fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }
}

impl TransportSession for FakeSession {
    fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    fn watch(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    fn destroy(&self) {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(TransportState::Destroyed);
    }
}

/// Player that "plays" instantly: `play` emits Buffering then Playing, and
/// tests end the track with [`FakePlayer::finish`].
pub(crate) struct FakePlayer {
    state: Mutex<PlayerState>,
    attached: Mutex<Option<AudioResource>>,
    events: broadcast::Sender<PlayerTransition>,
    plays: Log,
    reject: AtomicBool,
}

impl FakePlayer {
    pub(crate) fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            state: Mutex::new(PlayerState::Idle),
            attached: Mutex::new(None),
            events,
            plays: new_log(),
            reject: AtomicBool::new(false),
        })
    }

    pub(crate) fn plays(&self) -> Vec<String> {
        entries(&self.plays)
    }

    pub(crate) fn reject_next(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub(crate) fn emit(&self, to: PlayerState) {
        let from = std::mem::replace(&mut *self.state.lock().unwrap(), to.clone());
        let _ = self.events.send(PlayerTransition { from, to });
    }

    /// The attached resource played to its end.
    pub(crate) fn finish(&self) {
        if self.state.lock().unwrap().is_idle() {
            return;
        }
        self.attached.lock().unwrap().take();
        self.emit(PlayerState::Idle);
    }

    /// Re-announce the current state, as real players occasionally do.
    pub(crate) fn replay_current_state(&self) {
        let current = self.state.lock().unwrap().clone();
        self.emit(current);
    }
}

impl Player for FakePlayer {
    fn play(&self, resource: AudioResource) -> Result<(), PlayerError> {
        if self.reject.swap(false, Ordering::SeqCst) {
            return Err(PlayerError::Output("device busy".to_string()));
        }
        let track = Arc::clone(resource.track());
        *self.attached.lock().unwrap() = Some(resource);
        self.emit(PlayerState::Buffering(Arc::clone(&track)));
        self.emit(PlayerState::Playing(Arc::clone(&track)));
        push(&self.plays, track.title());
        Ok(())
    }

    fn stop(&self) -> bool {
        if self.state.lock().unwrap().is_idle() {
            return false;
        }
        self.attached.lock().unwrap().take();
        self.emit(PlayerState::Idle);
        true
    }

    fn state(&self) -> PlayerState {
        self.state.lock().unwrap().clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerTransition> {
        self.events.subscribe()
    }
}

pub(crate) struct FakeGateway {
    initial: TransportState,
    fail: bool,
    sessions: Mutex<Vec<Arc<FakeSession>>>,
    players: Mutex<Vec<Arc<FakePlayer>>>,
}

impl FakeGateway {
    pub(crate) fn new(initial: TransportState) -> Arc<Self> {
        Arc::new(Self {
            initial,
            fail: false,
            sessions: Mutex::new(Vec::new()),
            players: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn failing() -> Arc<Self> {
        Arc::new(Self {
            initial: TransportState::Signalling,
            fail: true,
            sessions: Mutex::new(Vec::new()),
            players: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn joins(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub(crate) fn session(&self, index: usize) -> Arc<FakeSession> {
        Arc::clone(&self.sessions.lock().unwrap()[index])
    }

    pub(crate) fn player(&self, index: usize) -> Arc<FakePlayer> {
        Arc::clone(&self.players.lock().unwrap()[index])
    }
}

#[async_trait]
impl VoiceGateway for FakeGateway {
    async fn join(&self, channel: &ChannelRef) -> Result<Arc<dyn TransportSession>, TransportError> {
        if self.fail {
            return Err(TransportError::Join(format!(
                "missing permissions for {}",
                channel.channel_id
            )));
        }
        let session = FakeSession::new(self.initial);
        self.sessions.lock().unwrap().push(Arc::clone(&session));
        let session: Arc<dyn TransportSession> = session;
        Ok(session)
    }

    fn create_player(&self, _session: &Arc<dyn TransportSession>) -> Arc<dyn Player> {
        let player = FakePlayer::new();
        self.players.lock().unwrap().push(Arc::clone(&player));
        player
    }
}
