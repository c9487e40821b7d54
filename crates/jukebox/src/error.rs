//! Error taxonomy for resolution, materialization, transport and catalog calls.

use std::time::Duration;

use thiserror::Error;

/// Metadata lookup for a user-supplied link failed; no track was produced.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("unsupported or malformed url: {0}")]
    InvalidUrl(String),
    #[error("metadata lookup failed for {url}: {reason}")]
    Lookup { url: String, reason: String },
    #[error("metadata lookup for {url} timed out after {timeout:?}")]
    TimedOut { url: String, timeout: Duration },
    #[error("failed to run metadata lookup: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed metadata: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Turning a track into a playable resource failed.
///
/// Reported through the track's error hook; the subscription moves on to the
/// next queued track.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("failed to spawn media fetch: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to read media stream: {0}")]
    Read(#[source] std::io::Error),
    #[error("media stream ended before any audio arrived")]
    EmptyStream,
    #[error("unrecognized media stream: {0}")]
    Probe(String),
    #[error("materialization cancelled")]
    Cancelled,
    #[error("player rejected resource: {0}")]
    Rejected(#[from] PlayerError),
}

/// Player refused a resource.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("player is shut down")]
    Offline,
    #[error("failed to start output: {0}")]
    Output(String),
}

/// Voice transport failures surfaced to the requester.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to join voice channel: {0}")]
    Join(String),
    #[error("voice connection not ready within {0:?}")]
    Timeout(Duration),
    #[error("voice connection destroyed")]
    Destroyed,
}

/// Listing/search API failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("youtube api key is not configured")]
    MissingApiKey,
    #[error("youtube request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("youtube api returned {status}: {message}")]
    Api { status: u16, message: String },
}

/// The subscription worker is gone (left or torn down).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("subscription closed")]
    Closed,
}
