//! Lazy queue entries and their one-shot lifecycle hooks.
//!
//! A [`Track`] holds only metadata until the subscription asks for it to be
//! materialized; the media-fetch process starts at that point, not at enqueue
//! time.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use jukebox_types::TrackSummary;
use tokio_util::sync::CancellationToken;

use crate::error::{MaterializeError, ResolutionError};
use crate::media::{MediaFetcher, MetadataLookup, abort_fetch};
use crate::resource::{self, AudioResource};
use crate::youtube::{PlaylistItem, watch_url};

pub type StartHook = Box<dyn FnOnce() + Send>;
pub type FinishHook = Box<dyn FnOnce() + Send>;
pub type ErrorHook = Box<dyn FnOnce(&MaterializeError) + Send>;

/// Callbacks supplied by whoever requested a track. Missing hooks are silent.
#[derive(Default)]
pub struct TrackHooks {
    on_start: Option<StartHook>,
    on_finish: Option<FinishHook>,
    on_error: Option<ErrorHook>,
}

impl TrackHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_start(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(hook));
        self
    }

    pub fn on_finish(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_finish = Some(Box::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl FnOnce(&MaterializeError) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    pub(crate) fn with_error_hook(mut self, hook: Option<ErrorHook>) -> Self {
        self.on_error = hook;
        self
    }
}

enum HookState<F> {
    Pending(F),
    Fired,
}

/// A callback that can run at most once.
struct OnceHook<F>(Mutex<HookState<F>>);

impl<F> OnceHook<F> {
    fn new(hook: F) -> Self {
        Self(Mutex::new(HookState::Pending(hook)))
    }

    fn take(&self) -> Option<F> {
        let mut state = self.0.lock().unwrap_or_else(|err| err.into_inner());
        match std::mem::replace(&mut *state, HookState::Fired) {
            HookState::Pending(hook) => Some(hook),
            HookState::Fired => None,
        }
    }
}

pub struct Track {
    url: String,
    title: String,
    repeating: AtomicBool,
    on_start: OnceHook<StartHook>,
    on_finish: OnceHook<FinishHook>,
    on_error: OnceHook<ErrorHook>,
}

impl fmt::Debug for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Track")
            .field("url", &self.url)
            .field("title", &self.title)
            .field("repeating", &self.is_repeating())
            .finish_non_exhaustive()
    }
}

impl Track {
    pub(crate) fn new(url: impl Into<String>, title: impl Into<String>, hooks: TrackHooks) -> Self {
        let TrackHooks {
            on_start,
            on_finish,
            on_error,
        } = hooks;
        Self {
            url: url.into(),
            title: title.into(),
            repeating: AtomicBool::new(false),
            on_start: OnceHook::new(on_start.unwrap_or_else(|| Box::new(|| {}))),
            on_finish: OnceHook::new(on_finish.unwrap_or_else(|| Box::new(|| {}))),
            on_error: OnceHook::new(on_error.unwrap_or_else(|| Box::new(|_| {}))),
        }
    }

    /// Resolve a link through the metadata lookup and build a track for it.
    pub async fn from_url(
        lookup: &dyn MetadataLookup,
        url: &str,
        hooks: TrackHooks,
    ) -> Result<Self, ResolutionError> {
        let media = lookup.resolve(url).await?;
        tracing::debug!(url, canonical = %media.canonical_url, title = %media.title, "track resolved");
        Ok(Self::new(media.canonical_url, media.title, hooks))
    }

    /// Build a track from a playlist listing entry without any lookup.
    ///
    /// Returns `None` for deleted or private entries.
    pub fn from_playlist_item(item: &PlaylistItem, on_error: Option<ErrorHook>) -> Option<Self> {
        if !item.is_playable() {
            tracing::debug!(title = %item.title, "skipping unavailable playlist item");
            return None;
        }
        Some(Self::new(
            watch_url(&item.video_id),
            item.title.clone(),
            TrackHooks::new().with_error_hook(on_error),
        ))
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn is_repeating(&self) -> bool {
        self.repeating.load(Ordering::SeqCst)
    }

    pub fn set_repeating(&self, repeating: bool) {
        self.repeating.store(repeating, Ordering::SeqCst);
    }

    /// `**title** - <url>` as shown in chat replies.
    pub fn link(&self) -> String {
        format!("**{}** - <{}>", self.title, self.url)
    }

    pub fn summary(&self) -> TrackSummary {
        TrackSummary {
            title: self.title.clone(),
            url: self.url.clone(),
            repeating: self.is_repeating(),
        }
    }

    /// Run the start hook unless the track is repeating or it already ran.
    pub(crate) fn fire_start(&self) -> bool {
        if self.is_repeating() {
            return false;
        }
        match self.on_start.take() {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    /// Run the finish hook unless the track is repeating or it already ran.
    pub(crate) fn fire_finish(&self) -> bool {
        if self.is_repeating() {
            return false;
        }
        match self.on_finish.take() {
            Some(hook) => {
                hook();
                true
            }
            None => false,
        }
    }

    pub(crate) fn fire_error(&self, err: &MaterializeError) -> bool {
        match self.on_error.take() {
            Some(hook) => {
                hook(err);
                true
            }
            None => false,
        }
    }

    /// Start the media fetch and wait for its stream head to be probed.
    ///
    /// On any failure, including cancellation, the fetch process is killed and
    /// drained before returning.
    pub async fn materialize(
        self: Arc<Self>,
        fetcher: &dyn MediaFetcher,
        cancel: &CancellationToken,
    ) -> Result<AudioResource, MaterializeError> {
        if cancel.is_cancelled() {
            return Err(MaterializeError::Cancelled);
        }
        let (mut stdout, control) = fetcher.spawn(&self.url)?.into_parts();
        let probed = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(MaterializeError::Cancelled),
            probed = resource::probe(&mut stdout) => probed,
        };
        match probed {
            Ok((format, head)) => {
                tracing::debug!(url = %self.url, format = %format, "media stream probed");
                let stream = resource::replay_head(head, stdout);
                Ok(AudioResource::new(self, format, stream, control))
            }
            Err(err) => {
                abort_fetch(stdout, control);
                Err(err)
            }
        }
    }
}
