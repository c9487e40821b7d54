//! Configuration loading and parsing.
//!
//! Every section is optional; the `*_from_config` resolvers fill in defaults.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::playlist::PLAYLIST_PAGE_SIZE;

pub const DEFAULT_YOUTUBE_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
pub const DEFAULT_FETCH_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_FETCH_FORMAT: &str = "bestaudio[ext=webm][acodec=opus][asr=48000]/bestaudio";
pub const DEFAULT_RATE_LIMIT: &str = "100K";
pub const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_QUEUE_DISPLAY_LIMIT: usize = 10;
pub const DEFAULT_SINK_PROGRAM: &str = "ffplay";
pub const DEFAULT_SINK_ARGS: &[&str] = &["-nodisp", "-autoexit", "-loglevel", "error", "-i", "-"];

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
pub struct JukeboxConfig {
    pub youtube: Option<YoutubeConfig>,
    pub fetch: Option<FetchConfig>,
    pub sink: Option<SinkConfig>,
    pub voice: Option<VoiceConfig>,
    pub commands: Option<CommandsConfig>,
}

/// YouTube Data API access.
#[derive(Debug, Default, Deserialize)]
pub struct YoutubeConfig {
    /// API key (`--youtube-api-key` / `YOUTUBE_API_KEY` take precedence).
    pub api_key: Option<String>,
    /// Override for the API root (defaults to the public v3 endpoint).
    pub base_url: Option<String>,
}

/// Media fetch tool settings.
#[derive(Debug, Default, Deserialize)]
pub struct FetchConfig {
    pub program: Option<String>,
    /// Format selector handed to the fetch tool.
    pub format: Option<String>,
    /// Download throughput cap, e.g. `100K`.
    pub rate_limit: Option<String>,
    pub lookup_timeout_ms: Option<u64>,
}

/// Local audio sink used by the console front end.
#[derive(Debug, Default, Deserialize)]
pub struct SinkConfig {
    pub program: Option<String>,
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VoiceConfig {
    /// How long to wait for a joined session to become ready.
    pub ready_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommandsConfig {
    /// Upcoming entries listed by the queue command.
    pub queue_display_limit: Option<usize>,
    pub playlist_page_size: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YoutubeSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub program: String,
    pub format: String,
    pub rate_limit: String,
    pub lookup_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkSettings {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSettings {
    pub queue_display_limit: usize,
    pub playlist_page_size: u32,
    pub ready_timeout: Duration,
}

impl Default for CommandSettings {
    fn default() -> Self {
        Self {
            queue_display_limit: DEFAULT_QUEUE_DISPLAY_LIMIT,
            playlist_page_size: PLAYLIST_PAGE_SIZE,
            ready_timeout: Duration::from_millis(DEFAULT_READY_TIMEOUT_MS),
        }
    }
}

impl JukeboxConfig {
    /// Load configuration from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<JukeboxConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Resolve YouTube API settings; an explicit key overrides the file.
pub fn youtube_from_config(cfg: &JukeboxConfig, api_key: Option<String>) -> YoutubeSettings {
    let section = cfg.youtube.as_ref();
    YoutubeSettings {
        api_key: non_empty(api_key.as_deref())
            .or_else(|| non_empty(section.and_then(|s| s.api_key.as_deref()))),
        base_url: non_empty(section.and_then(|s| s.base_url.as_deref()))
            .unwrap_or_else(|| DEFAULT_YOUTUBE_API_BASE.to_string()),
    }
}

pub fn fetch_from_config(cfg: &JukeboxConfig) -> Result<FetchSettings> {
    let section = cfg.fetch.as_ref();
    let rate_limit = non_empty(section.and_then(|s| s.rate_limit.as_deref()))
        .unwrap_or_else(|| DEFAULT_RATE_LIMIT.to_string());
    validate_rate_limit(&rate_limit)?;
    let lookup_timeout_ms = section
        .and_then(|s| s.lookup_timeout_ms)
        .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_MS);
    if lookup_timeout_ms == 0 {
        anyhow::bail!("fetch.lookup_timeout_ms must be positive");
    }
    Ok(FetchSettings {
        program: non_empty(section.and_then(|s| s.program.as_deref()))
            .unwrap_or_else(|| DEFAULT_FETCH_PROGRAM.to_string()),
        format: non_empty(section.and_then(|s| s.format.as_deref()))
            .unwrap_or_else(|| DEFAULT_FETCH_FORMAT.to_string()),
        rate_limit,
        lookup_timeout: Duration::from_millis(lookup_timeout_ms),
    })
}

/// Rate limits are a number with an optional K/M/G suffix.
fn validate_rate_limit(value: &str) -> Result<()> {
    let digits = value.trim_end_matches(['K', 'M', 'G', 'k', 'm', 'g']);
    let parsed: f64 = digits
        .parse()
        .with_context(|| format!("parse fetch.rate_limit {value:?}"))?;
    if parsed <= 0.0 {
        anyhow::bail!("fetch.rate_limit must be positive, got {value:?}");
    }
    Ok(())
}

pub fn sink_from_config(cfg: &JukeboxConfig) -> SinkSettings {
    let section = cfg.sink.as_ref();
    match non_empty(section.and_then(|s| s.program.as_deref())) {
        Some(program) => SinkSettings {
            program,
            args: section.and_then(|s| s.args.clone()).unwrap_or_default(),
        },
        None => SinkSettings {
            program: DEFAULT_SINK_PROGRAM.to_string(),
            args: DEFAULT_SINK_ARGS.iter().map(|arg| arg.to_string()).collect(),
        },
    }
}

pub fn commands_from_config(cfg: &JukeboxConfig) -> Result<CommandSettings> {
    let defaults = CommandSettings::default();
    let commands = cfg.commands.as_ref();
    let playlist_page_size = commands
        .and_then(|c| c.playlist_page_size)
        .unwrap_or(defaults.playlist_page_size);
    if !(1..=PLAYLIST_PAGE_SIZE).contains(&playlist_page_size) {
        anyhow::bail!("commands.playlist_page_size must be within 1..={PLAYLIST_PAGE_SIZE}");
    }
    let ready_timeout = cfg
        .voice
        .as_ref()
        .and_then(|v| v.ready_timeout_ms)
        .map(Duration::from_millis)
        .unwrap_or(defaults.ready_timeout);
    Ok(CommandSettings {
        queue_display_limit: commands
            .and_then(|c| c.queue_display_limit)
            .unwrap_or(defaults.queue_display_limit),
        playlist_page_size,
        ready_timeout,
    })
}
