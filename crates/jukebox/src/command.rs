//! Chat command boundary.
//!
//! A command is parsed once into [`Command`] and then dispatched against the
//! registry; replies go back through the front end's [`Replier`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use jukebox_types::{QueueView, ScopeId};

use crate::config::CommandSettings;
use crate::error::{MaterializeError, TransportError};
use crate::media::{MetadataLookup, validate_media_url};
use crate::playlist::{self, ItemErrorObserver};
use crate::registry::SubscriptionRegistry;
use crate::subscription::SubscriptionHandle;
use crate::track::{Track, TrackHooks};
use crate::voice::ChannelRef;
use crate::youtube::{PlaylistSource, SearchProvider, playlist_id};

const NOT_PLAYING: &str = "Not playing in this server!";
const NOTHING_PLAYING: &str = "Nothing is currently playing!";
const PLAY_FAILED: &str = "Failed to play track, please try again later!";
const JOIN_FAILED: &str = "Failed to join voice channel, please try again later!";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlayQuery {
    Link(String),
    Search(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Play(PlayQuery),
    Skip,
    Repeat(bool),
    Shuffle,
    Queue,
    NowPlaying,
    Leave,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ParseCommandError {
    Empty,
    MissingArgument(&'static str),
    Unknown(String),
}

impl fmt::Display for ParseCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseCommandError::Empty => f.write_str("empty command"),
            ParseCommandError::MissingArgument(command) => {
                write!(f, "`{command}` needs a link or search keywords")
            }
            ParseCommandError::Unknown(command) => write!(f, "unknown command `{command}`"),
        }
    }
}

impl std::error::Error for ParseCommandError {}

impl FromStr for Command {
    type Err = ParseCommandError;

    /// Console syntax: `play <link|keywords>`, `search <keywords>`, `skip`,
    /// `repeat [on|off]`, `shuffle`, `queue`, `np`, `leave`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        let (name, rest) = match input.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (input, ""),
        };
        match name.to_ascii_lowercase().as_str() {
            "" => Err(ParseCommandError::Empty),
            "play" | "p" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument("play"));
                }
                if validate_media_url(rest).is_ok() {
                    Ok(Command::Play(PlayQuery::Link(rest.to_string())))
                } else {
                    Ok(Command::Play(PlayQuery::Search(rest.to_string())))
                }
            }
            "search" => {
                if rest.is_empty() {
                    return Err(ParseCommandError::MissingArgument("search"));
                }
                Ok(Command::Play(PlayQuery::Search(rest.to_string())))
            }
            "skip" | "next" => Ok(Command::Skip),
            "repeat" | "loop" => match rest.to_ascii_lowercase().as_str() {
                "" | "on" | "song" => Ok(Command::Repeat(true)),
                "off" => Ok(Command::Repeat(false)),
                other => Err(ParseCommandError::Unknown(format!("repeat {other}"))),
            },
            "shuffle" => Ok(Command::Shuffle),
            "queue" | "q" => Ok(Command::Queue),
            "np" | "nowplaying" | "now-playing" => Ok(Command::NowPlaying),
            "leave" | "stop" => Ok(Command::Leave),
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub content: String,
    /// Only visible to the user who issued the command.
    pub ephemeral: bool,
}

impl Reply {
    pub fn public(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: false,
        }
    }

    pub fn ephemeral(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ephemeral: true,
        }
    }
}

/// Delivers replies for one command invocation. Track hooks hold on to it,
/// so follow-ups can arrive long after dispatch returned.
pub trait Replier: Send + Sync {
    fn reply(&self, reply: Reply);
}

/// Where a command came from.
#[derive(Clone)]
pub struct Invocation {
    pub scope: ScopeId,
    /// Voice channel the caller is currently in, if any.
    pub voice_channel: Option<ChannelRef>,
    pub replier: Arc<dyn Replier>,
}

impl Invocation {
    fn reply(&self, content: impl Into<String>) {
        self.replier.reply(Reply::public(content));
    }
}

pub struct Dispatcher {
    registry: SubscriptionRegistry,
    lookup: Arc<dyn MetadataLookup>,
    playlists: Arc<dyn PlaylistSource>,
    search: Arc<dyn SearchProvider>,
    settings: CommandSettings,
}

impl Dispatcher {
    pub fn new(
        registry: SubscriptionRegistry,
        lookup: Arc<dyn MetadataLookup>,
        playlists: Arc<dyn PlaylistSource>,
        search: Arc<dyn SearchProvider>,
        settings: CommandSettings,
    ) -> Self {
        Self {
            registry,
            lookup,
            playlists,
            search,
            settings,
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, command: Command, invocation: &Invocation) {
        tracing::debug!(scope = %invocation.scope, command = ?command, "dispatching command");
        if let Command::Play(query) = command {
            self.play(query, invocation).await;
            return;
        }
        let Some(subscription) = self.registry.get(&invocation.scope) else {
            invocation.reply(NOT_PLAYING);
            return;
        };
        let content = match command {
            Command::Play(_) => return,
            Command::Skip => subscription.skip().await.map(|_| "Skipped song!".to_string()),
            Command::Repeat(repeating) => {
                subscription
                    .set_repeating(repeating)
                    .await
                    .map(|current| match (current, repeating) {
                        (None, _) => NOTHING_PLAYING.to_string(),
                        (Some(_), true) => "Repeating current song!".to_string(),
                        (Some(_), false) => "Stopped repeating current song!".to_string(),
                    })
            }
            Command::Shuffle => subscription
                .shuffle()
                .await
                .map(|_| "Shuffled playlist!".to_string()),
            Command::Queue => subscription
                .queue_view(self.settings.queue_display_limit)
                .await
                .map(|view| render_queue(&view)),
            Command::NowPlaying => subscription.queue_view(0).await.map(|view| now_playing(&view)),
            Command::Leave => {
                self.registry.leave(&invocation.scope).await;
                invocation.replier.reply(Reply::ephemeral("Left channel!"));
                return;
            }
        };
        match content {
            Ok(content) => invocation.reply(content),
            Err(err) => {
                tracing::debug!(scope = %invocation.scope, error = %err, "subscription went away");
                invocation.reply(NOT_PLAYING);
            }
        }
    }

    async fn play(&self, query: PlayQuery, invocation: &Invocation) {
        let channel = match self.registry.get(&invocation.scope) {
            Some(existing) => existing.channel().clone(),
            None => match &invocation.voice_channel {
                Some(channel) => channel.clone(),
                None => {
                    invocation.reply("Join a voice channel first!");
                    return;
                }
            },
        };
        let subscription = match self.registry.join(&channel).await {
            Ok(subscription) => subscription,
            Err(TransportError::Timeout(timeout)) => {
                tracing::warn!(scope = %channel.scope, timeout = ?timeout, "voice channel not ready");
                invocation.reply(format!(
                    "Failed to join voice channel within {} seconds, please try again later!",
                    timeout.as_secs()
                ));
                return;
            }
            Err(err) => {
                tracing::warn!(scope = %channel.scope, error = %err, "voice channel join failed");
                invocation.reply(JOIN_FAILED);
                return;
            }
        };

        let url = match query {
            PlayQuery::Link(url) => url,
            PlayQuery::Search(keywords) => match self.search.search_first(&keywords).await {
                Ok(Some(url)) => url,
                Ok(None) => {
                    invocation.reply(format!("No results for {keywords}"));
                    return;
                }
                Err(err) => {
                    tracing::warn!(keywords = %keywords, error = %err, "search failed");
                    invocation.reply(PLAY_FAILED);
                    return;
                }
            },
        };

        match playlist_id(&url) {
            Some(id) => self.enqueue_playlist(&id, &subscription, invocation).await,
            None => self.enqueue_track(&url, &subscription, invocation).await,
        }
    }

    async fn enqueue_playlist(
        &self,
        id: &str,
        subscription: &SubscriptionHandle,
        invocation: &Invocation,
    ) {
        let scope = invocation.scope.clone();
        let observer: ItemErrorObserver = Arc::new(move |title: &str, err: &MaterializeError| {
            tracing::warn!(scope = %scope, title, error = %err, "playlist item failed");
        });
        let tracks = match playlist::expand(
            self.playlists.as_ref(),
            id,
            self.settings.playlist_page_size,
            Some(observer),
        )
        .await
        {
            Ok(tracks) => tracks,
            Err(err) => {
                tracing::warn!(playlist_id = id, error = %err, "playlist listing failed");
                invocation.reply(PLAY_FAILED);
                return;
            }
        };
        let count = tracks.len();
        match subscription.enqueue_many(tracks).await {
            Ok(_) => invocation.reply(format!("Enqueued playlist with {count} tracks!")),
            Err(_) => invocation.reply(NOT_PLAYING),
        }
    }

    async fn enqueue_track(
        &self,
        url: &str,
        subscription: &SubscriptionHandle,
        invocation: &Invocation,
    ) {
        let hooks = follow_up_hooks(&invocation.replier);
        let track = match Track::from_url(self.lookup.as_ref(), url, hooks).await {
            Ok(track) => track,
            Err(err) => {
                tracing::warn!(url, error = %err, "track resolution failed");
                invocation.reply(PLAY_FAILED);
                return;
            }
        };
        let link = track.link();
        match subscription.enqueue(track).await {
            Ok(_) => invocation.reply(format!("Enqueued {link}")),
            Err(_) => invocation.reply(NOT_PLAYING),
        }
    }
}

/// Hooks that report lifecycle events back to the requester as ephemeral
/// follow-ups.
fn follow_up_hooks(replier: &Arc<dyn Replier>) -> TrackHooks {
    let (start, finish, error) = (replier.clone(), replier.clone(), replier.clone());
    TrackHooks::new()
        .on_start(move || start.reply(Reply::ephemeral("Now playing!")))
        .on_finish(move || finish.reply(Reply::ephemeral("Now finished!")))
        .on_error(move |err| error.reply(Reply::ephemeral(format!("Error: {err}"))))
}

fn now_playing(view: &QueueView) -> String {
    match view.now_playing.track() {
        Some(track) => format!("Playing **{}** - <{}>", track.title, track.url),
        None => NOTHING_PLAYING.to_string(),
    }
}

fn render_queue(view: &QueueView) -> String {
    let upcoming: Vec<String> = view
        .upcoming
        .iter()
        .enumerate()
        .map(|(index, track)| format!("{}) {}", index + 1, track.title))
        .collect();
    format!("{}\n\n{}", now_playing(view), upcoming.join("\n"))
}
