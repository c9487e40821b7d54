//! YouTube Data API v3 client for playlist listings and keyword search.

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::YoutubeSettings;
use crate::error::CatalogError;

const UNAVAILABLE_TITLES: &[&str] = &["Deleted video", "Private video"];

/// One entry of a playlist listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlaylistItem {
    pub title: String,
    pub video_id: String,
    /// Set when the listing marks the entry as no longer available.
    pub removed: bool,
}

impl PlaylistItem {
    pub fn is_playable(&self) -> bool {
        !self.removed
            && !self.video_id.trim().is_empty()
            && !UNAVAILABLE_TITLES.contains(&self.title.as_str())
    }
}

#[async_trait]
pub trait PlaylistSource: Send + Sync {
    /// First page of a playlist, in listing order.
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_size: u32,
    ) -> Result<Vec<PlaylistItem>, CatalogError>;
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Watch URL of the first video matching `query`, if any.
    async fn search_first(&self, query: &str) -> Result<Option<String>, CatalogError>;
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

/// Playlist id carried by a resolved link (`list` query parameter).
pub fn playlist_id(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(key, _)| key == "list")
        .map(|(_, value)| value.trim().to_string())
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItemResource>,
}

#[derive(Debug, Deserialize)]
struct PlaylistItemResource {
    snippet: Option<PlaylistItemSnippet>,
    status: Option<PlaylistItemStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemSnippet {
    #[serde(default)]
    title: String,
    resource_id: Option<ResourceId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistItemStatus {
    privacy_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchResult>,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    id: ResourceId,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl From<PlaylistItemResource> for PlaylistItem {
    fn from(resource: PlaylistItemResource) -> Self {
        let private = resource
            .status
            .and_then(|status| status.privacy_status)
            .is_some_and(|privacy| privacy == "private" || privacy == "privacyStatusUnspecified");
        let (title, video_id) = match resource.snippet {
            Some(snippet) => (
                snippet.title,
                snippet
                    .resource_id
                    .and_then(|id| id.video_id)
                    .unwrap_or_default(),
            ),
            None => (String::new(), String::new()),
        };
        PlaylistItem {
            title,
            video_id,
            removed: private,
        }
    }
}

/// Thin client over the Data API v3 REST endpoints.
#[derive(Clone, Debug)]
pub struct YouTubeClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl YouTubeClient {
    pub fn new(settings: &YoutubeSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
        }
    }

    fn api_key(&self) -> Result<&str, CatalogError> {
        self.api_key.as_deref().ok_or(CatalogError::MissingApiKey)
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, CatalogError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key()?)])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CatalogError::Api {
                status: status.as_u16(),
                message: api_error_message(&body),
            });
        }
        Ok(response.json::<T>().await?)
    }
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

#[async_trait]
impl PlaylistSource for YouTubeClient {
    async fn list_playlist_items(
        &self,
        playlist_id: &str,
        page_size: u32,
    ) -> Result<Vec<PlaylistItem>, CatalogError> {
        let page_size = page_size.to_string();
        let response: PlaylistItemsResponse = self
            .get(
                "playlistItems",
                &[
                    ("part", "snippet,status"),
                    ("maxResults", page_size.as_str()),
                    ("playlistId", playlist_id),
                ],
            )
            .await?;
        tracing::debug!(playlist_id, items = response.items.len(), "playlist page fetched");
        Ok(response.items.into_iter().map(PlaylistItem::from).collect())
    }
}

#[async_trait]
impl SearchProvider for YouTubeClient {
    async fn search_first(&self, query: &str) -> Result<Option<String>, CatalogError> {
        let response: SearchResponse = self
            .get(
                "search",
                &[
                    ("part", "snippet"),
                    ("maxResults", "1"),
                    ("type", "video"),
                    ("q", query),
                ],
            )
            .await?;
        Ok(response
            .items
            .into_iter()
            .find_map(|item| item.id.video_id)
            .map(|id| watch_url(&id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playlist_id_reads_list_parameter() {
        assert_eq!(
            playlist_id("https://www.youtube.com/watch?v=abc&list=PL123"),
            Some("PL123".to_string())
        );
        assert_eq!(
            playlist_id("https://www.youtube.com/playlist?list=PL456"),
            Some("PL456".to_string())
        );
        assert_eq!(playlist_id("https://www.youtube.com/watch?v=abc"), None);
        assert_eq!(playlist_id("https://www.youtube.com/watch?list="), None);
        assert_eq!(playlist_id("not a url"), None);
    }

    #[test]
    fn playlist_items_parse_from_listing_payload() {
        let raw = r#"{
            "nextPageToken": "CAUQAA",
            "items": [
                {"snippet": {"title": "First", "resourceId": {"kind": "youtube#video", "videoId": "aaa"}},
                 "status": {"privacyStatus": "public"}},
                {"snippet": {"title": "Private video", "resourceId": {"videoId": "bbb"}},
                 "status": {"privacyStatus": "private"}},
                {"snippet": {"title": "No id"}}
            ]
        }"#;
        let response: PlaylistItemsResponse = serde_json::from_str(raw).unwrap();
        let items: Vec<PlaylistItem> = response.items.into_iter().map(PlaylistItem::from).collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].video_id, "aaa");
        assert!(items[0].is_playable());
        assert!(items[1].removed);
        assert!(!items[1].is_playable());
        assert!(!items[2].is_playable());
    }

    #[test]
    fn unavailable_titles_are_not_playable() {
        let item = PlaylistItem {
            title: "Deleted video".to_string(),
            video_id: "ccc".to_string(),
            removed: false,
        };
        assert!(!item.is_playable());
    }

    #[test]
    fn search_response_yields_first_video() {
        let raw = r#"{"items": [{"id": {"kind": "youtube#video", "videoId": "xyz"}}]}"#;
        let response: SearchResponse = serde_json::from_str(raw).unwrap();
        let first = response.items.into_iter().find_map(|item| item.id.video_id);
        assert_eq!(first.as_deref(), Some("xyz"));
        assert_eq!(watch_url("xyz"), "https://www.youtube.com/watch?v=xyz");
    }

    #[test]
    fn api_error_message_prefers_structured_body() {
        let body = r#"{"error": {"code": 403, "message": "quota exceeded"}}"#;
        assert_eq!(api_error_message(body), "quota exceeded");
        assert_eq!(api_error_message(" bad gateway "), "bad gateway");
    }

    #[tokio::test]
    async fn missing_api_key_is_reported_before_any_request() {
        let client = YouTubeClient::new(&YoutubeSettings {
            api_key: None,
            base_url: "http://127.0.0.1:9".to_string(),
        });
        let result = client.search_first("anything").await;
        assert!(matches!(result, Err(CatalogError::MissingApiKey)));
    }
}
