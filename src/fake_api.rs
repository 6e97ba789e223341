//! Scripted in-memory `ChannelApi` for harvester and pipeline tests.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::api::{
    ApiError, ChannelApi, ChannelResource, CommentThreadResource, Page,
    PlaylistItemResource, PlaylistResource, VideoResource,
};

/// Page tokens are `p<offset>`; a stuck playlist always answers `stuck`.
#[derive(Default)]
pub struct FakeApi {
    channels: HashMap<String, Value>,
    playlists: HashMap<String, Vec<Value>>,
    playlist_items: HashMap<String, Vec<Value>>,
    videos: HashMap<String, Value>,
    comments: HashMap<String, Vec<Value>>,
    comments_disabled: HashSet<String>,
    failing_comments: HashSet<String>,
    stuck_playlists: HashSet<String>,
    failing_playlists: bool,
    requests: Mutex<Vec<String>>,
}

impl FakeApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, channel_id: &str, name: &str, uploads: Option<&str>) -> Self {
        let mut channel = json!({
            "id": channel_id,
            "snippet": {"title": name, "description": format!("{name} channel")},
            "statistics": {"subscriberCount": "1500", "viewCount": "250000", "videoCount": "2"},
        });
        if let Some(uploads) = uploads {
            channel["contentDetails"] = json!({"relatedPlaylists": {"uploads": uploads}});
        }
        self.channels.insert(channel_id.to_owned(), channel);
        self
    }

    pub fn with_playlist(mut self, channel_id: &str, playlist_id: &str, title: &str, item_count: u64) -> Self {
        let channel_name = self
            .channels
            .get(channel_id)
            .and_then(|channel| channel["snippet"]["title"].as_str())
            .unwrap_or("unknown")
            .to_owned();
        self.playlists.entry(channel_id.to_owned()).or_default().push(json!({
            "id": playlist_id,
            "snippet": {
                "title": title,
                "channelId": channel_id,
                "channelTitle": channel_name,
                "publishedAt": "2021-11-02T08:30:00Z",
            },
            "contentDetails": {"itemCount": item_count},
        }));
        self
    }

    pub fn with_playlist_items(mut self, playlist_id: &str, video_ids: &[&str]) -> Self {
        let items = self.playlist_items.entry(playlist_id.to_owned()).or_default();
        items.extend(
            video_ids
                .iter()
                .map(|id| json!({"snippet": {"resourceId": {"kind": "youtube#video", "videoId": id}}})),
        );
        self
    }

    pub fn with_video(self, channel_id: &str, video_id: &str, title: &str) -> Self {
        let video = json!({
            "id": video_id,
            "snippet": {
                "channelId": channel_id,
                "channelTitle": "Rust Talks",
                "title": title,
                "description": format!("{title} description"),
                "tags": ["rust", "talk"],
                "publishedAt": "2022-06-15T18:00:00.000Z",
                "thumbnails": {"high": {"url": format!("https://i.ytimg.com/vi/{video_id}/hq.jpg")}},
            },
            "statistics": {
                "viewCount": "1000",
                "likeCount": "40",
                "favoriteCount": "0",
                "commentCount": "3",
            },
            "contentDetails": {"duration": "PT4M13S", "caption": "false"},
        });
        self.with_video_json(video_id, video)
    }

    pub fn with_video_json(mut self, video_id: &str, video: Value) -> Self {
        self.videos.insert(video_id.to_owned(), video);
        self
    }

    pub fn with_comments(mut self, video_id: &str, count: usize) -> Self {
        let threads = self.comments.entry(video_id.to_owned()).or_default();
        for n in 0..count {
            threads.push(json!({
                "id": format!("{video_id}-c{n}"),
                "snippet": {"topLevelComment": {"snippet": {
                    "authorDisplayName": format!("viewer {n}"),
                    "publishedAt": "2023-05-01T12:00:00Z",
                    "updatedAt": "2023-05-01T12:00:00.250Z",
                    "textDisplay": format!("comment {n}"),
                    "likeCount": n,
                }}},
            }));
        }
        self
    }

    pub fn with_comments_disabled(mut self, video_id: &str) -> Self {
        self.comments_disabled.insert(video_id.to_owned());
        self
    }

    pub fn with_failing_comments(mut self, video_id: &str) -> Self {
        self.failing_comments.insert(video_id.to_owned());
        self
    }

    pub fn with_failing_playlists(mut self) -> Self {
        self.failing_playlists = true;
        self
    }

    pub fn with_stuck_cursor(mut self, playlist_id: &str) -> Self {
        self.stuck_playlists.insert(playlist_id.to_owned());
        self
    }

    /// Requests whose endpoint name starts with `prefix`.
    pub fn request_count(&self, prefix: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.starts_with(prefix))
            .count()
    }

    fn record(&self, endpoint: &str, target: &str, token: Option<&str>) {
        self.requests
            .lock()
            .push(format!("{endpoint} {target} {}", token.unwrap_or("-")));
    }
}

fn decode<T: DeserializeOwned>(value: &Value) -> Result<T, ApiError> {
    serde_json::from_value(value.clone()).map_err(|err| ApiError::Decode(err.to_string()))
}

fn slice_page<T: DeserializeOwned>(
    items: Option<&Vec<Value>>,
    token: Option<&str>,
    max_results: u32,
) -> Result<Page<T>, ApiError> {
    let items = items.map(Vec::as_slice).unwrap_or_default();
    let start = match token {
        None => 0,
        Some(token) => token
            .strip_prefix('p')
            .and_then(|offset| offset.parse::<usize>().ok())
            .ok_or_else(|| ApiError::Http {
                status: 400,
                reason: "invalidPageToken".to_owned(),
                message: format!("unknown page token {token}"),
            })?,
    };
    let end = (start + max_results as usize).min(items.len());
    let page = items
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .map(decode)
        .collect::<Result<Vec<T>, _>>()?;
    Ok(Page {
        items: page,
        next_page_token: (end < items.len()).then(|| format!("p{end}")),
    })
}

impl ChannelApi for FakeApi {
    fn channel(&self, channel_id: &str) -> Result<Option<ChannelResource>, ApiError> {
        self.record("channels", channel_id, None);
        self.channels.get(channel_id).map(decode).transpose()
    }

    fn playlists_page(
        &self,
        channel_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistResource>, ApiError> {
        self.record("playlists", channel_id, page_token);
        if self.failing_playlists {
            return Err(ApiError::Transport("connection reset by peer".to_owned()));
        }
        slice_page(self.playlists.get(channel_id), page_token, max_results)
    }

    fn playlist_items_page(
        &self,
        playlist_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<PlaylistItemResource>, ApiError> {
        self.record("playlistItems", playlist_id, page_token);
        if self.stuck_playlists.contains(playlist_id) {
            let mut page = slice_page(self.playlist_items.get(playlist_id), None, max_results)?;
            page.next_page_token = Some("stuck".to_owned());
            return Ok(page);
        }
        slice_page(self.playlist_items.get(playlist_id), page_token, max_results)
    }

    fn video(&self, video_id: &str) -> Result<Option<VideoResource>, ApiError> {
        self.record("videos", video_id, None);
        self.videos.get(video_id).map(decode).transpose()
    }

    fn comment_threads_page(
        &self,
        video_id: &str,
        page_token: Option<&str>,
        max_results: u32,
    ) -> Result<Page<CommentThreadResource>, ApiError> {
        self.record("commentThreads", video_id, page_token);
        if self.comments_disabled.contains(video_id) {
            return Err(ApiError::CommentsDisabled {
                video_id: video_id.to_owned(),
            });
        }
        if self.failing_comments.contains(video_id) {
            return Err(ApiError::Http {
                status: 500,
                reason: "backendError".to_owned(),
                message: "backend error".to_owned(),
            });
        }
        slice_page(self.comments.get(video_id), page_token, max_results)
    }
}
