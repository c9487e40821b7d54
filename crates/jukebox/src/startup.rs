//! Console front end wiring.
//!
//! Builds the registry and dispatcher from config, then feeds stdin lines to
//! the dispatcher as commands for a single scope.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use jukebox_types::ScopeId;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::command::{Command, Dispatcher, Invocation, Reply, Replier};
use crate::config::{self, JukeboxConfig};
use crate::events::EventBus;
use crate::local::LocalGateway;
use crate::media::YtDlp;
use crate::registry::SubscriptionRegistry;
use crate::voice::ChannelRef;
use crate::youtube::YouTubeClient;

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "jukebox", version = VERSION)]
pub struct Args {
    /// Optional config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Scope (server) id commands are issued from
    #[arg(long, default_value = "local")]
    pub scope: String,

    /// Voice channel the console user is "in"
    #[arg(long, default_value = "console")]
    pub channel: String,

    /// Print subscription events as JSON lines
    #[arg(long)]
    pub events: bool,

    /// YouTube Data API key (overrides the config file)
    #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
    pub youtube_api_key: Option<String>,
}

/// Prints replies to stdout. Ephemeral replies are marked since there is
/// only one console user.
struct ConsoleReplier;

impl Replier for ConsoleReplier {
    fn reply(&self, reply: Reply) {
        if reply.ephemeral {
            println!("(only you) {}", reply.content);
        } else {
            println!("{}", reply.content);
        }
    }
}

/// Build the dispatcher and run the console loop until EOF or Ctrl-C.
pub async fn run(args: Args) -> Result<()> {
    let cfg = load_config(args.config.as_ref())?;
    let youtube = config::youtube_from_config(&cfg, args.youtube_api_key.clone());
    let fetch = config::fetch_from_config(&cfg)?;
    let sink = config::sink_from_config(&cfg);
    let commands = config::commands_from_config(&cfg)?;
    tracing::info!(
        version = VERSION,
        fetcher = %fetch.program,
        sink = %sink.program,
        api_key = youtube.api_key.is_some(),
        "starting jukebox"
    );
    if youtube.api_key.is_none() {
        tracing::warn!("no YouTube API key configured; search and playlists are unavailable");
    }

    let events = EventBus::new();
    let ytdlp = Arc::new(YtDlp::new(&fetch));
    let catalog = Arc::new(YouTubeClient::new(&youtube));
    let registry = SubscriptionRegistry::new(
        Arc::new(LocalGateway::new(sink)),
        ytdlp.clone(),
        events.clone(),
    )
    .with_ready_timeout(commands.ready_timeout);
    let dispatcher = Dispatcher::new(registry.clone(), ytdlp, catalog.clone(), catalog, commands);

    if args.events {
        spawn_event_printer(events.subscribe());
    }

    let shutdown = CancellationToken::new();
    setup_shutdown(shutdown.clone())?;

    let invocation = Invocation {
        scope: ScopeId::new(args.scope.clone()),
        voice_channel: Some(ChannelRef::new(args.scope, args.channel)),
        replier: Arc::new(ConsoleReplier),
    };
    let result = console_loop(&dispatcher, &invocation, &shutdown).await;

    registry.shutdown().await;
    // Give workers a moment to kill their sink processes.
    tokio::time::sleep(Duration::from_millis(100)).await;
    tracing::info!("jukebox stopped");
    result
}

async fn console_loop(
    dispatcher: &Dispatcher,
    invocation: &Invocation,
    shutdown: &CancellationToken,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line.context("read command from stdin")?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => dispatcher.dispatch(command, invocation).await,
            Err(err) => eprintln!("{err}"),
        }
    }
    Ok(())
}

fn spawn_event_printer(mut rx: broadcast::Receiver<crate::events::JukeboxEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => println!("{json}"),
                    Err(err) => tracing::warn!(error = %err, "event serialization failed"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event printer lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn load_config(path: Option<&PathBuf>) -> Result<JukeboxConfig> {
    match path {
        Some(path) => JukeboxConfig::load(path),
        None => {
            let auto_path = std::env::current_exe()
                .ok()
                .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
            match auto_path {
                Some(path) if path.exists() => JukeboxConfig::load(&path),
                _ => {
                    tracing::info!("no config file found; using defaults");
                    Ok(JukeboxConfig::default())
                }
            }
        }
    }
}

fn setup_shutdown(shutdown: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        tracing::info!("interrupt received; leaving channels");
        shutdown.cancel();
    })
    .context("install Ctrl-C handler")
}
