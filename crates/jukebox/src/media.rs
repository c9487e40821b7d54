//! External media tooling: metadata lookup and the media-fetch process.
//!
//! Both are backed by `yt-dlp` in production; the traits keep the subscription
//! logic independent of the tool.

use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

use crate::config::FetchSettings;
use crate::error::{MaterializeError, ResolutionError};

/// Byte stream emitted by a media-fetch process.
pub type MediaStream = Pin<Box<dyn AsyncRead + Send>>;

/// Title and canonical URL returned by a metadata lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub canonical_url: String,
    pub title: String,
}

#[async_trait]
pub trait MetadataLookup: Send + Sync {
    /// Resolve a user-supplied link into its canonical URL and title.
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolutionError>;
}

/// Control side of a spawned media-fetch process.
pub trait ProcessControl: Send {
    /// Ask the process to terminate. Safe to call more than once.
    fn kill(&mut self);
    /// Exit code if the process already finished.
    fn exit_code(&mut self) -> Option<i32>;
}

impl ProcessControl for Child {
    fn kill(&mut self) {
        if let Err(err) = self.start_kill() {
            tracing::debug!(error = %err, "media fetch already exited");
        }
    }

    fn exit_code(&mut self) -> Option<i32> {
        self.try_wait().ok().flatten().and_then(|status| status.code())
    }
}

/// A running media-fetch process: its stdout plus a kill switch.
pub struct FetchProcess {
    stdout: MediaStream,
    control: Box<dyn ProcessControl>,
}

impl FetchProcess {
    pub fn new(stdout: MediaStream, control: Box<dyn ProcessControl>) -> Self {
        Self { stdout, control }
    }

    pub fn into_parts(self) -> (MediaStream, Box<dyn ProcessControl>) {
        (self.stdout, self.control)
    }
}

pub trait MediaFetcher: Send + Sync {
    /// Start fetching best-available audio for `url`, throughput capped.
    fn spawn(&self, url: &str) -> Result<FetchProcess, MaterializeError>;
}

/// Kill a fetch process and drain whatever is left in its pipe so the child
/// never blocks on a full stdout.
pub(crate) fn abort_fetch(mut stdout: MediaStream, mut control: Box<dyn ProcessControl>) {
    control.kill();
    tokio::spawn(async move {
        let drained = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
        tracing::debug!(
            drained_bytes = ?drained.ok(),
            exit_code = ?control.exit_code(),
            "aborted media fetch drained"
        );
    });
}

/// Reject anything that is not an absolute http(s) URL before spawning tools.
pub(crate) fn validate_media_url(url: &str) -> Result<reqwest::Url, ResolutionError> {
    let parsed =
        reqwest::Url::parse(url.trim()).map_err(|_| ResolutionError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(ResolutionError::InvalidUrl(url.to_string())),
    }
}

/// `yt-dlp` backed lookup and fetcher.
#[derive(Clone, Debug)]
pub struct YtDlp {
    program: String,
    format: String,
    rate_limit: String,
    lookup_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct VideoInfo {
    title: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
}

impl YtDlp {
    pub fn new(settings: &FetchSettings) -> Self {
        Self {
            program: settings.program.clone(),
            format: settings.format.clone(),
            rate_limit: settings.rate_limit.clone(),
            lookup_timeout: settings.lookup_timeout,
        }
    }
}

#[async_trait]
impl MetadataLookup for YtDlp {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia, ResolutionError> {
        let parsed = validate_media_url(url)?;
        let output = Command::new(&self.program)
            .args(["--dump-single-json", "--no-playlist", "--skip-download", "--no-warnings"])
            .arg(parsed.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.lookup_timeout, output)
            .await
            .map_err(|_| ResolutionError::TimedOut {
                url: url.to_string(),
                timeout: self.lookup_timeout,
            })??;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("lookup exited with an error")
                .trim()
                .to_string();
            return Err(ResolutionError::Lookup {
                url: url.to_string(),
                reason,
            });
        }
        parse_video_info(url, &output.stdout)
    }
}

impl MediaFetcher for YtDlp {
    fn spawn(&self, url: &str) -> Result<FetchProcess, MaterializeError> {
        let mut child = Command::new(&self.program)
            .args(["-o", "-", "-q", "--no-playlist"])
            .args(["-f", self.format.as_str()])
            .args(["-r", self.rate_limit.as_str()])
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(MaterializeError::Spawn)?;
        let Some(stdout) = child.stdout.take() else {
            return Err(MaterializeError::Spawn(std::io::Error::other(
                "media fetch has no stdout",
            )));
        };
        tracing::debug!(url, pid = ?child.id(), rate_limit = %self.rate_limit, "media fetch spawned");
        Ok(FetchProcess::new(Box::pin(stdout), Box::new(child)))
    }
}

/// Parse `yt-dlp --dump-single-json` output.
pub(crate) fn parse_video_info(url: &str, raw: &[u8]) -> Result<ResolvedMedia, ResolutionError> {
    let info: VideoInfo = serde_json::from_slice(raw)?;
    let title = info
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| ResolutionError::Lookup {
            url: url.to_string(),
            reason: "no title in metadata".to_string(),
        })?;
    let canonical_url = info
        .webpage_url
        .or(info.original_url)
        .unwrap_or_else(|| url.to_string());
    Ok(ResolvedMedia {
        canonical_url,
        title,
    })
}
