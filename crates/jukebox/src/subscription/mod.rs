//! Per-scope playback worker.
//!
//! Every mutation of a subscription (user commands, player and transport
//! notifications, materialization results) goes through one tokio task, so
//! the queue and the current track are never touched concurrently.

mod machine;

use std::sync::Arc;
use std::time::Duration;

use jukebox_types::{NowPlaying, QueueView, ScopeId, TrackSummary, TransportState};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{SubscriptionError, TransportError};
use crate::events::EventBus;
use crate::media::MediaFetcher;
use crate::registry::RegistryLink;
use crate::track::Track;
use crate::voice::{ChannelRef, Player, PlayerState, TransportSession, wait_for_state};

use machine::{Effect, Input, Machine};

const REQUEST_BUFFER: usize = 64;

enum Request {
    Enqueue {
        tracks: Vec<Arc<Track>>,
        reply: oneshot::Sender<usize>,
    },
    Skip {
        reply: oneshot::Sender<Option<TrackSummary>>,
    },
    SetRepeat {
        repeating: bool,
        reply: oneshot::Sender<Option<TrackSummary>>,
    },
    Shuffle {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        limit: usize,
        reply: oneshot::Sender<Vec<TrackSummary>>,
    },
    QueueView {
        limit: usize,
        reply: oneshot::Sender<QueueView>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a running subscription.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    channel: ChannelRef,
    tx: mpsc::Sender<Request>,
    session: Arc<dyn TransportSession>,
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn scope(&self) -> &ScopeId {
        &self.channel.scope
    }

    pub fn channel(&self) -> &ChannelRef {
        &self.channel
    }

    /// `true` once the worker has shut down.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub fn transport_state(&self) -> TransportState {
        self.session.state()
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request,
    ) -> Result<T, SubscriptionError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| SubscriptionError::Closed)?;
        response.await.map_err(|_| SubscriptionError::Closed)
    }

    /// Append a track; starts playback when nothing is playing. Returns the
    /// queue length afterwards.
    pub async fn enqueue(&self, track: Track) -> Result<usize, SubscriptionError> {
        self.enqueue_many(vec![track]).await
    }

    pub async fn enqueue_many(&self, tracks: Vec<Track>) -> Result<usize, SubscriptionError> {
        let tracks: Vec<Arc<Track>> = tracks.into_iter().map(Arc::new).collect();
        self.request(|reply| Request::Enqueue { tracks, reply })
            .await
    }

    /// Skip the current track. Returns what was skipped, if anything.
    pub async fn skip(&self) -> Result<Option<TrackSummary>, SubscriptionError> {
        self.request(|reply| Request::Skip { reply }).await
    }

    /// Set the repeat flag of the current track, if there is one.
    pub async fn set_repeating(
        &self,
        repeating: bool,
    ) -> Result<Option<TrackSummary>, SubscriptionError> {
        self.request(|reply| Request::SetRepeat { repeating, reply })
            .await
    }

    /// Shuffle the pending tracks. Returns how many were shuffled.
    pub async fn shuffle(&self) -> Result<usize, SubscriptionError> {
        self.request(|reply| Request::Shuffle { reply }).await
    }

    pub async fn snapshot(&self, limit: usize) -> Result<Vec<TrackSummary>, SubscriptionError> {
        self.request(|reply| Request::Snapshot { limit, reply })
            .await
    }

    /// Track attached to the player right now.
    pub async fn current_track_summary(&self) -> Result<Option<TrackSummary>, SubscriptionError> {
        let view = self.queue_view(0).await?;
        Ok(view.now_playing.track().cloned())
    }

    pub async fn queue_view(&self, limit: usize) -> Result<QueueView, SubscriptionError> {
        self.request(|reply| Request::QueueView { limit, reply })
            .await
    }

    /// Stop playback, drop the queue without callbacks and leave the channel.
    pub async fn leave(&self) -> Result<(), SubscriptionError> {
        self.request(|reply| Request::Leave { reply }).await
    }

    pub async fn wait_ready(&self, timeout: Duration) -> Result<(), TransportError> {
        wait_for_state(self.session.as_ref(), TransportState::Ready, timeout).await
    }
}

/// Collaborators shared by every subscription.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub(crate) fetcher: Arc<dyn MediaFetcher>,
    pub(crate) events: EventBus,
    pub(crate) registry: RegistryLink,
}

/// Start the worker for an already-ready session.
pub(crate) fn spawn(
    channel: ChannelRef,
    session: Arc<dyn TransportSession>,
    player: Arc<dyn Player>,
    deps: WorkerDeps,
) -> SubscriptionHandle {
    let id = Uuid::new_v4();
    let (tx, requests) = mpsc::channel(REQUEST_BUFFER);
    let (internal_tx, internal) = mpsc::unbounded_channel();
    let player_events = player.subscribe();
    let transport = session.watch();
    let worker = Worker {
        id,
        scope: channel.scope.clone(),
        machine: Machine::new(),
        session: Arc::clone(&session),
        player,
        deps,
        internal_tx,
        cancel: None,
    };
    tracing::info!(
        scope = %channel.scope,
        channel = %channel.channel_id,
        subscription = %id,
        "subscription started"
    );
    tokio::spawn(worker.run(requests, internal, player_events, transport));
    SubscriptionHandle {
        id,
        channel,
        tx,
        session,
    }
}

struct Worker {
    id: Uuid,
    scope: ScopeId,
    machine: Machine,
    session: Arc<dyn TransportSession>,
    player: Arc<dyn Player>,
    deps: WorkerDeps,
    internal_tx: mpsc::UnboundedSender<Input>,
    cancel: Option<CancellationToken>,
}

impl Worker {
    async fn run(
        mut self,
        mut requests: mpsc::Receiver<Request>,
        mut internal: mpsc::UnboundedReceiver<Input>,
        mut player_events: tokio::sync::broadcast::Receiver<crate::voice::PlayerTransition>,
        mut transport: tokio::sync::watch::Receiver<TransportState>,
    ) {
        loop {
            let stop = tokio::select! {
                request = requests.recv() => match request {
                    Some(request) => self.on_request(request),
                    None => self.step(Input::Leave),
                },
                event = player_events.recv() => match event {
                    Ok(transition) => self.step(Input::Player(transition)),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(scope = %self.scope, skipped, "player events lagged");
                        self.resync_player()
                    }
                    Err(RecvError::Closed) => self.step(Input::Leave),
                },
                changed = transport.changed() => {
                    let state = match changed {
                        Ok(()) => *transport.borrow_and_update(),
                        Err(_) => TransportState::Destroyed,
                    };
                    self.on_transport(state)
                },
                Some(input) = internal.recv() => self.step(input),
            };
            if stop {
                break;
            }
        }
        tracing::info!(scope = %self.scope, subscription = %self.id, "subscription stopped");
    }

    fn on_request(&mut self, request: Request) -> bool {
        match request {
            Request::Enqueue { tracks, reply } => {
                for track in &tracks {
                    tracing::info!(scope = %self.scope, title = %track.title(), url = %track.url(), "track enqueued");
                }
                let stop = self.step(Input::Enqueue(tracks));
                let _ = reply.send(self.machine.queue().len());
                stop
            }
            Request::Skip { reply } => {
                let skipped = self.machine.current_summary();
                let stop = self.step(Input::Skip);
                if let Some(track) = &skipped {
                    tracing::info!(scope = %self.scope, title = %track.title, "track skipped");
                }
                let _ = reply.send(skipped);
                stop
            }
            Request::SetRepeat { repeating, reply } => {
                let stop = self.step(Input::SetRepeat(repeating));
                let _ = reply.send(self.machine.current_summary());
                stop
            }
            Request::Shuffle { reply } => {
                let stop = self.step(Input::Shuffle);
                let _ = reply.send(self.machine.queue().len());
                stop
            }
            Request::Snapshot { limit, reply } => {
                let _ = reply.send(self.machine.queue().snapshot(limit));
                false
            }
            Request::QueueView { limit, reply } => {
                let _ = reply.send(self.queue_view(limit));
                false
            }
            Request::Leave { reply } => {
                let stop = self.step(Input::Leave);
                let _ = reply.send(());
                stop
            }
        }
    }

    fn on_transport(&mut self, state: TransportState) -> bool {
        tracing::info!(scope = %self.scope, state = %state, "transport state changed");
        self.deps.events.transport_changed(&self.scope, state);
        self.step(Input::Transport(state))
    }

    /// Missed transitions may have included the end of the current track;
    /// the player's own state decides.
    fn resync_player(&mut self) -> bool {
        if !self.player.state().is_idle() {
            return false;
        }
        self.step(Input::PlayerIdle)
    }

    fn queue_view(&self, limit: usize) -> QueueView {
        let now_playing = match self.player.state() {
            PlayerState::Idle => NowPlaying::Idle,
            state => match state.track() {
                Some(track) => NowPlaying::Active {
                    status: state.kind(),
                    track: track.summary(),
                },
                None => NowPlaying::Idle,
            },
        };
        QueueView {
            now_playing,
            upcoming: self.machine.queue().snapshot(limit),
            total: self.machine.queue().len(),
        }
    }

    /// Feed one input through the machine and perform its effects. Returns
    /// `true` when the subscription is torn down.
    fn step(&mut self, input: Input) -> bool {
        let mut stop = false;
        for effect in self.machine.handle(input) {
            stop |= self.apply(effect);
        }
        stop
    }

    fn apply(&mut self, effect: Effect) -> bool {
        match effect {
            Effect::Materialize { track, attempt } => {
                tracing::debug!(scope = %self.scope, title = %track.title(), attempt, "materializing track");
                let token = CancellationToken::new();
                if let Some(previous) = self.cancel.replace(token.clone()) {
                    previous.cancel();
                }
                let fetcher = Arc::clone(&self.deps.fetcher);
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    let result = track.materialize(fetcher.as_ref(), &token).await;
                    let _ = tx.send(Input::Materialized { attempt, result });
                });
            }
            Effect::CancelMaterialize => {
                if let Some(token) = self.cancel.take() {
                    token.cancel();
                }
            }
            Effect::Play(resource) => {
                self.cancel = None;
                let track = Arc::clone(resource.track());
                tracing::info!(
                    scope = %self.scope,
                    title = %track.title(),
                    format = %resource.format(),
                    "handing track to player"
                );
                if let Err(error) = self.player.play(resource) {
                    let _ = self.internal_tx.send(Input::PlayRejected { track, error });
                }
            }
            Effect::StopPlayer => {
                if !self.player.stop() {
                    tracing::debug!(scope = %self.scope, "player already idle");
                    // No idle transition will follow.
                    let _ = self.internal_tx.send(Input::PlayerIdle);
                }
            }
            Effect::Started(track) => {
                if track.fire_start() {
                    tracing::info!(scope = %self.scope, title = %track.title(), "track started");
                    self.deps.events.track_started(&self.scope, track.summary());
                }
            }
            Effect::Finished(track) => {
                if track.fire_finish() {
                    tracing::info!(scope = %self.scope, title = %track.title(), "track finished");
                    self.deps.events.track_finished(&self.scope, track.summary());
                }
            }
            Effect::Failed(track, err) => {
                tracing::warn!(scope = %self.scope, title = %track.title(), error = %err, "track failed");
                track.fire_error(&err);
                self.deps
                    .events
                    .track_failed(&self.scope, track.summary(), err.to_string());
            }
            Effect::QueueChanged(queued) => {
                self.deps.events.queue_changed(&self.scope, queued);
            }
            Effect::Teardown => {
                self.session.destroy();
                self.deps.registry.release(&self.scope, self.id);
                self.deps.events.subscription_closed(&self.scope);
                return true;
            }
        }
        false
    }
}
