#![forbid(unsafe_code)]

//! Remote side of a harvest: the `ChannelApi` contract the harvester depends
//! on, the Data API v3 wire types it returns, and a blocking `ureq` client
//! implementing it.

use std::time::Duration;

use serde::de::{self, DeserializeOwned};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::config::ApiTuning;

/// Error `reason` code the API attaches to a 403 when a video has comments
/// turned off.
pub const COMMENTS_DISABLED_REASON: &str = "commentsDisabled";

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("HTTP {status} ({reason}): {message}")]
    Http {
        status: u16,
        reason: String,
        message: String,
    },
    #[error("comments are disabled for video {video_id}")]
    CommentsDisabled { video_id: String },
    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Everything the harvester needs from the remote platform. Lookups return
/// `Ok(None)` when the identifier does not resolve.
pub trait ChannelApi {
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelResource>, ApiError>;

    fn playlists_page(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistResource>, ApiError>;

    fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistItemResource>, ApiError>;

    fn video(&self, video_id: &str) -> Result<Option<VideoResource>, ApiError>;

    /// Fails with [`ApiError::CommentsDisabled`] when the video refuses
    /// comment listings.
    fn comment_threads_page(
        &self,
        video_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<CommentThreadResource>, ApiError>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

impl<T> From<ListResponse<T>> for Page<T> {
    fn from(response: ListResponse<T>) -> Self {
        Page {
            items: response.items,
            next_page_token: response.next_page_token,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelResource {
    pub id: String,
    pub snippet: ChannelSnippet,
    pub statistics: ChannelStatistics,
    pub content_details: ChannelContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ChannelSnippet {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelStatistics {
    #[serde(deserialize_with = "de_count")]
    pub subscriber_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub view_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub video_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChannelContentDetails {
    pub related_playlists: RelatedPlaylists,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RelatedPlaylists {
    pub uploads: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistResource {
    pub id: String,
    pub snippet: PlaylistSnippet,
    pub content_details: PlaylistContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistSnippet {
    pub title: String,
    pub channel_id: String,
    pub channel_title: String,
    pub published_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistContentDetails {
    #[serde(deserialize_with = "de_count")]
    pub item_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlaylistItemResource {
    pub snippet: PlaylistItemSnippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaylistItemSnippet {
    pub resource_id: ResourceId,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceId {
    pub video_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoResource {
    pub id: String,
    pub snippet: VideoSnippet,
    pub statistics: VideoStatistics,
    pub content_details: VideoContentDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoSnippet {
    pub channel_id: String,
    pub channel_title: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub published_at: String,
    pub thumbnails: Thumbnails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thumbnails {
    pub high: Option<Thumbnail>,
    pub medium: Option<Thumbnail>,
    #[serde(rename = "default")]
    pub fallback: Option<Thumbnail>,
}

impl Thumbnails {
    /// Prefers the `high` rendition, falling back to smaller ones.
    pub fn best_url(&self) -> Option<&str> {
        self.high
            .as_ref()
            .or(self.medium.as_ref())
            .or(self.fallback.as_ref())
            .map(|thumbnail| thumbnail.url.as_str())
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Thumbnail {
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoStatistics {
    #[serde(deserialize_with = "de_count")]
    pub view_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub like_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub dislike_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub favorite_count: Option<u64>,
    #[serde(deserialize_with = "de_count")]
    pub comment_count: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct VideoContentDetails {
    pub duration: Option<String>,
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CommentThreadResource {
    pub id: String,
    pub snippet: CommentThreadSnippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommentThreadSnippet {
    pub top_level_comment: TopLevelComment,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TopLevelComment {
    pub snippet: CommentSnippet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommentSnippet {
    pub author_display_name: String,
    pub published_at: String,
    pub text_display: String,
    #[serde(deserialize_with = "de_count")]
    pub like_count: Option<u64>,
    pub viewer_rating: Option<String>,
    pub updated_at: String,
}

/// Statistics arrive as decimal strings (`"1234"`), some counters as plain
/// numbers. Accept both.
fn de_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawCount {
        Number(u64),
        Text(String),
    }

    match Option::<RawCount>::deserialize(deserializer)? {
        None => Ok(None),
        Some(RawCount::Number(value)) => Ok(Some(value)),
        Some(RawCount::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid count `{text}`"))),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    message: String,
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorDetail {
    reason: String,
}

/// Turns a non-2xx response into an [`ApiError::Http`] carrying the first
/// structured `reason` code of the error body.
pub fn classify_status(status: u16, body: &str) -> ApiError {
    let body = serde_json::from_str::<ErrorEnvelope>(body)
        .unwrap_or_default()
        .error;
    let reason = body
        .errors
        .into_iter()
        .map(|detail| detail.reason)
        .find(|reason| !reason.is_empty())
        .unwrap_or_else(|| "unknown".to_owned());
    ApiError::Http {
        status,
        reason,
        message: body.message,
    }
}

/// YouTube Data API v3 client authenticated with an API key.
pub struct YouTubeClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
}

impl YouTubeClient {
    pub fn new(api_key: impl Into<String>, tuning: &ApiTuning) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(tuning.timeout_secs.max(1)))
            .user_agent(concat!("yt-harvest/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            base_url: tuning.api_base_url.trim_end_matches('/').to_owned(),
            api_key: api_key.into(),
        }
    }

    fn get<T: DeserializeOwned>(
        &self,
        resource: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = format!("{}/{resource}", self.base_url);
        let mut request = self.agent.get(&url).query("key", &self.api_key);
        for (name, value) in query {
            request = request.query(name, value);
        }

        match request.call() {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|err| ApiError::Transport(format!("reading {resource}: {err}")))?;
                serde_json::from_str(&body)
                    .map_err(|err| ApiError::Decode(format!("{resource}: {err}")))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(classify_status(status, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(ApiError::Transport(transport.to_string())),
        }
    }

    fn list_page<T: DeserializeOwned>(
        &self,
        resource: &str,
        base_query: &[(&str, &str)],
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<T>, ApiError> {
        let max_results = max_results.to_string();
        let mut query = base_query.to_vec();
        query.push(("maxResults", max_results.as_str()));
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }
        self.get::<ListResponse<T>>(resource, &query).map(Page::from)
    }
}

impl ChannelApi for YouTubeClient {
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelResource>, ApiError> {
        let response: ListResponse<ChannelResource> = self.get(
            "channels",
            &[("part", "snippet,statistics,contentDetails"), ("id", channel_id)],
        )?;
        Ok(response.items.into_iter().next())
    }

    fn playlists_page(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistResource>, ApiError> {
        self.list_page(
            "playlists",
            &[("part", "snippet,contentDetails"), ("channelId", channel_id)],
            page_token,
            max_results,
        )
    }

    fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistItemResource>, ApiError> {
        self.list_page(
            "playlistItems",
            &[("part", "snippet"), ("playlistId", playlist_id)],
            page_token,
            max_results,
        )
    }

    fn video(&self, video_id: &str) -> Result<Option<VideoResource>, ApiError> {
        let response: ListResponse<VideoResource> = self.get(
            "videos",
            &[("part", "snippet,statistics,contentDetails"), ("id", video_id)],
        )?;
        Ok(response.items.into_iter().next())
    }

    fn comment_threads_page(
        &self,
        video_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<CommentThreadResource>, ApiError> {
        self.list_page(
            "commentThreads",
            &[("part", "snippet"), ("videoId", video_id)],
            page_token,
            max_results,
        )
        .map_err(|err| match err {
            ApiError::Http { ref reason, .. } if reason == COMMENTS_DISABLED_REASON => {
                ApiError::CommentsDisabled {
                    video_id: video_id.to_owned(),
                }
            }
            other => other,
        })
    }
}
