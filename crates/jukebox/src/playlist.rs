//! Expansion of a playlist listing into queueable tracks.

use std::sync::Arc;

use crate::error::{CatalogError, MaterializeError};
use crate::track::{ErrorHook, Track};
use crate::youtube::PlaylistSource;

/// Items fetched per expansion; only the first page is used.
pub const PLAYLIST_PAGE_SIZE: u32 = 100;

/// Observer for per-item materialization failures, told the item title.
pub type ItemErrorObserver = Arc<dyn Fn(&str, &MaterializeError) + Send + Sync>;

/// Fetch one page of the playlist and turn every playable entry into a
/// [`Track`], keeping listing order.
///
/// Per-item start/finish hooks are left silent; callers report the batch.
pub async fn expand(
    source: &dyn PlaylistSource,
    playlist_id: &str,
    page_size: u32,
    on_error: Option<ItemErrorObserver>,
) -> Result<Vec<Track>, CatalogError> {
    let items = source.list_playlist_items(playlist_id, page_size).await?;
    let listed = items.len();
    let tracks: Vec<Track> = items
        .iter()
        .filter_map(|item| {
            let hook = on_error.as_ref().map(|observer| {
                let observer = Arc::clone(observer);
                let title = item.title.clone();
                Box::new(move |err: &MaterializeError| observer(&title, err)) as ErrorHook
            });
            Track::from_playlist_item(item, hook)
        })
        .collect();
    tracing::info!(
        playlist_id,
        listed,
        playable = tracks.len(),
        "playlist expanded"
    );
    Ok(tracks)
}
