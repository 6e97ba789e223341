#![forbid(unsafe_code)]

//! Collects the four entity collections for one channel from a
//! [`ChannelApi`], following continuation cursors to the end of every listing.

use std::collections::HashSet;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::{
    ApiError, ChannelApi, ChannelResource, CommentThreadResource, Page, PlaylistResource,
    VideoResource,
};
use crate::model::{ChannelRecord, CommentRecord, PlaylistRecord, VideoRecord};
use crate::normalize::{parse_duration, parse_timestamp};

/// Remote listing a request belongs to, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Entity {
    Channel,
    Playlists,
    PlaylistItems,
    Videos,
    Comments,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Channel => "channel",
            Entity::Playlists => "playlists",
            Entity::PlaylistItems => "playlist items",
            Entity::Videos => "videos",
            Entity::Comments => "comments",
        })
    }
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error("channel {0} does not exist")]
    ChannelNotFound(String),
    #[error("{entity} request failed: {source}")]
    Api { entity: Entity, source: ApiError },
    #[error("{entity} listing repeated continuation cursor `{cursor}`")]
    RepeatedCursor { entity: Entity, cursor: String },
}

/// `maxResults` sent with each paginated listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizes {
    pub playlists: u32,
    pub playlist_items: u32,
    pub comments: u32,
}

impl Default for PageSizes {
    fn default() -> Self {
        Self {
            playlists: 50,
            playlist_items: 50,
            comments: 25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "kebab-case")]
pub enum SkipReason {
    CommentsDisabled,
    Failed(String),
}

/// A video whose comments were left out of the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedVideo {
    pub video_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CommentHarvest {
    pub comments: Vec<CommentRecord>,
    pub skipped: Vec<SkippedVideo>,
}

pub struct Harvester<A> {
    api: A,
    page_sizes: PageSizes,
}

impl<A: ChannelApi> Harvester<A> {
    pub fn new(api: A, page_sizes: PageSizes) -> Self {
        Self { api, page_sizes }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn fetch_channel(&self, channel_id: &str) -> Result<ChannelRecord, HarvestError> {
        let resource = self.lookup_channel(channel_id)?;
        let record = channel_record(resource);
        info!(
            channel_id,
            name = %record.name,
            videos = record.video_count,
            "resolved channel"
        );
        Ok(record)
    }

    pub fn fetch_playlists(&self, channel_id: &str) -> Result<Vec<PlaylistRecord>, HarvestError> {
        let size = self.page_sizes.playlists;
        let resources = paginate(Entity::Playlists, |token| {
            self.api.playlists_page(channel_id, token, size)
        })?;
        let playlists: Vec<PlaylistRecord> = resources.into_iter().map(playlist_record).collect();
        info!(channel_id, count = playlists.len(), "harvested playlists");
        Ok(playlists)
    }

    /// Resolves the channel's uploads playlist and lists its members.
    pub fn fetch_upload_video_ids(&self, channel_id: &str) -> Result<Vec<String>, HarvestError> {
        let channel = channel_record(self.lookup_channel(channel_id)?);
        self.fetch_channel_uploads(&channel)
    }

    /// Lists the uploads playlist of an already resolved channel. A channel
    /// without an uploads playlist has no videos.
    pub fn fetch_channel_uploads(&self, channel: &ChannelRecord) -> Result<Vec<String>, HarvestError> {
        match channel.uploads_playlist_id.as_deref() {
            Some(uploads) => self.fetch_playlist_video_ids(uploads),
            None => {
                warn!(channel_id = %channel.channel_id, "channel has no uploads playlist");
                Ok(Vec::new())
            }
        }
    }

    /// Video ids referenced by a playlist, in listing order, first occurrence
    /// kept.
    pub fn fetch_playlist_video_ids(&self, playlist_id: &str) -> Result<Vec<String>, HarvestError> {
        let size = self.page_sizes.playlist_items;
        let items = paginate(Entity::PlaylistItems, |token| {
            self.api.playlist_items_page(playlist_id, token, size)
        })?;

        let mut seen = HashSet::new();
        let ids: Vec<String> = items
            .into_iter()
            .filter_map(|item| item.snippet.resource_id.video_id)
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        debug!(playlist_id, count = ids.len(), "listed playlist members");
        Ok(ids)
    }

    /// Looks up each id in turn. Ids that no longer resolve (deleted or
    /// private uploads) are skipped; a failed request aborts the batch.
    pub fn fetch_videos(&self, video_ids: &[String]) -> Result<Vec<VideoRecord>, HarvestError> {
        let mut videos = Vec::with_capacity(video_ids.len());
        for video_id in video_ids {
            let resource = self
                .api
                .video(video_id)
                .map_err(|source| HarvestError::Api {
                    entity: Entity::Videos,
                    source,
                })?;
            match resource {
                Some(resource) => videos.push(video_record(video_id, resource)),
                None => warn!(video_id = %video_id, "video no longer resolves; skipping"),
            }
        }
        info!(requested = video_ids.len(), count = videos.len(), "harvested videos");
        Ok(videos)
    }

    /// Never fails as a whole: a video whose comment listing cannot be read is
    /// recorded in [`CommentHarvest::skipped`] and the remaining videos are
    /// still harvested.
    pub fn fetch_comments(&self, video_ids: &[String]) -> CommentHarvest {
        let size = self.page_sizes.comments;
        let mut harvest = CommentHarvest::default();

        for video_id in video_ids {
            let threads = paginate(Entity::Comments, |token| {
                self.api.comment_threads_page(video_id, token, size)
            });
            match threads {
                Ok(threads) => {
                    debug!(video_id = %video_id, count = threads.len(), "harvested comments");
                    harvest
                        .comments
                        .extend(threads.into_iter().map(|thread| comment_record(video_id, thread)));
                }
                Err(HarvestError::Api {
                    source: ApiError::CommentsDisabled { .. },
                    ..
                }) => {
                    warn!(video_id = %video_id, "comments disabled; skipping video");
                    harvest.skipped.push(SkippedVideo {
                        video_id: video_id.clone(),
                        reason: SkipReason::CommentsDisabled,
                    });
                }
                Err(err) => {
                    error!(video_id = %video_id, error = %err, "comment harvest failed; skipping video");
                    harvest.skipped.push(SkippedVideo {
                        video_id: video_id.clone(),
                        reason: SkipReason::Failed(err.to_string()),
                    });
                }
            }
        }

        info!(
            videos = video_ids.len(),
            comments = harvest.comments.len(),
            skipped = harvest.skipped.len(),
            "harvested comments"
        );
        harvest
    }

    fn lookup_channel(&self, channel_id: &str) -> Result<ChannelResource, HarvestError> {
        self.api
            .channel(channel_id)
            .map_err(|source| HarvestError::Api {
                entity: Entity::Channel,
                source,
            })?
            .ok_or_else(|| HarvestError::ChannelNotFound(channel_id.to_owned()))
    }
}

/// Requests pages until the listing stops handing out a cursor. An empty
/// cursor counts as the end; a cursor seen before is an error.
fn paginate<T, F>(entity: Entity, mut fetch_page: F) -> Result<Vec<T>, HarvestError>
where
    F: FnMut(Option<&str>) -> Result<Page<T>, ApiError>,
{
    let mut items = Vec::new();
    let mut seen = HashSet::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = fetch_page(cursor.as_deref()).map_err(|source| HarvestError::Api { entity, source })?;
        items.extend(page.items);

        let Some(next) = page.next_page_token.filter(|token| !token.is_empty()) else {
            return Ok(items);
        };
        if !seen.insert(next.clone()) {
            return Err(HarvestError::RepeatedCursor {
                entity,
                cursor: next,
            });
        }
        cursor = Some(next);
    }
}

fn channel_record(resource: ChannelResource) -> ChannelRecord {
    let stats = resource.statistics;
    ChannelRecord {
        channel_id: resource.id,
        name: resource.snippet.title,
        subscriber_count: stats.subscriber_count.unwrap_or(0),
        view_count: stats.view_count.unwrap_or(0),
        video_count: stats.video_count.unwrap_or(0),
        description: resource.snippet.description,
        uploads_playlist_id: resource
            .content_details
            .related_playlists
            .uploads
            .filter(|id| !id.is_empty()),
    }
}

fn playlist_record(resource: PlaylistResource) -> PlaylistRecord {
    let published_at = parse_timestamp(&resource.snippet.published_at);
    if published_at.is_degraded() {
        warn!(playlist_id = %resource.id, raw = %resource.snippet.published_at, "unparseable playlist timestamp");
    }
    PlaylistRecord {
        playlist_id: resource.id,
        title: resource.snippet.title,
        channel_id: resource.snippet.channel_id,
        channel_name: resource.snippet.channel_title,
        published_at,
        item_count: resource.content_details.item_count.unwrap_or(0),
    }
}

fn video_record(requested_id: &str, resource: VideoResource) -> VideoRecord {
    let snippet = resource.snippet;
    let stats = resource.statistics;
    let details = resource.content_details;

    let video_id = if resource.id.is_empty() {
        requested_id.to_owned()
    } else {
        resource.id
    };

    let published_at = parse_timestamp(&snippet.published_at);
    if published_at.is_degraded() {
        warn!(video_id = %video_id, raw = %snippet.published_at, "unparseable video timestamp");
    }

    let duration = details.duration.as_deref().and_then(|raw| match parse_duration(raw) {
        Ok(duration) => Some(duration),
        Err(err) => {
            warn!(video_id = %video_id, error = %err, "dropping unparseable duration");
            None
        }
    });

    VideoRecord {
        thumbnail_url: snippet.thumbnails.best_url().map(str::to_owned),
        video_id,
        channel_id: snippet.channel_id,
        channel_name: snippet.channel_title,
        title: snippet.title,
        description: snippet.description,
        tags: snippet.tags,
        published_at,
        view_count: stats.view_count.unwrap_or(0),
        like_count: stats.like_count,
        dislike_count: stats.dislike_count.unwrap_or(0),
        favorite_count: stats.favorite_count.unwrap_or(0),
        comment_count: stats.comment_count.unwrap_or(0),
        duration,
        caption_status: details.caption,
    }
}

fn comment_record(video_id: &str, thread: CommentThreadResource) -> CommentRecord {
    let comment = thread.snippet.top_level_comment.snippet;
    let published_at = parse_timestamp(&comment.published_at);
    let updated_at = parse_timestamp(&comment.updated_at);
    if published_at.is_degraded() || updated_at.is_degraded() {
        warn!(comment_id = %thread.id, "unparseable comment timestamp");
    }
    CommentRecord {
        comment_id: thread.id,
        video_id: video_id.to_owned(),
        author: comment.author_display_name,
        published_at,
        text: comment.text_display,
        like_count: comment.like_count.unwrap_or(0),
        viewer_rating: comment.viewer_rating.unwrap_or_else(|| "none".to_owned()),
        updated_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_api::FakeApi;
    use crate::normalize::Normalized;

    fn small_pages() -> PageSizes {
        PageSizes {
            playlists: 2,
            playlist_items: 2,
            comments: 2,
        }
    }

    #[test]
    fn channel_lookup_maps_profile_and_statistics() {
        let api = FakeApi::new().with_channel("UC123", "Rust Talks", Some("UU123"));
        let harvester = Harvester::new(api, PageSizes::default());

        let channel = harvester.fetch_channel("UC123").unwrap();
        assert_eq!(channel.channel_id, "UC123");
        assert_eq!(channel.name, "Rust Talks");
        assert_eq!(channel.subscriber_count, 1500);
        assert_eq!(channel.uploads_playlist_id.as_deref(), Some("UU123"));
    }

    #[test]
    fn unknown_channel_is_fatal() {
        let harvester = Harvester::new(FakeApi::new(), PageSizes::default());
        let err = harvester.fetch_channel("UCnope").unwrap_err();
        assert!(matches!(err, HarvestError::ChannelNotFound(ref id) if id == "UCnope"));
        assert!(matches!(
            harvester.fetch_upload_video_ids("UCnope"),
            Err(HarvestError::ChannelNotFound(_))
        ));
    }

    #[test]
    fn playlists_follow_every_cursor() {
        let mut api = FakeApi::new().with_channel("UC123", "Rust Talks", Some("UU123"));
        for n in 0..5 {
            api = api.with_playlist("UC123", &format!("PL{n}"), &format!("List {n}"), n);
        }
        let harvester = Harvester::new(api, small_pages());

        let playlists = harvester.fetch_playlists("UC123").unwrap();
        let ids: Vec<&str> = playlists.iter().map(|p| p.playlist_id.as_str()).collect();
        assert_eq!(ids, ["PL0", "PL1", "PL2", "PL3", "PL4"]);
        assert_eq!(playlists[3].item_count, 3);
        assert_eq!(harvester.api().request_count("playlists"), 3);
        assert!(matches!(playlists[0].published_at, Normalized::Canonical(_)));
    }

    #[test]
    fn upload_ids_come_from_uploads_playlist() {
        let api = FakeApi::new()
            .with_channel("UC123", "Rust Talks", Some("UU123"))
            .with_playlist_items("UU123", &["a", "b", "c", "b", "d"]);
        let harvester = Harvester::new(api, small_pages());

        let ids = harvester.fetch_upload_video_ids("UC123").unwrap();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[test]
    fn resolved_channel_uploads_skip_a_second_lookup() {
        let api = FakeApi::new()
            .with_channel("UC123", "Rust Talks", Some("UU123"))
            .with_playlist_items("UU123", &["a", "b"]);
        let harvester = Harvester::new(api, small_pages());

        let channel = harvester.fetch_channel("UC123").unwrap();
        let ids = harvester.fetch_channel_uploads(&channel).unwrap();
        assert_eq!(ids, ["a", "b"]);
        assert_eq!(harvester.api().request_count("channels"), 1);
    }

    #[test]
    fn channel_without_uploads_has_no_videos() {
        let api = FakeApi::new().with_channel("UC123", "Rust Talks", None);
        let harvester = Harvester::new(api, small_pages());
        assert!(harvester.fetch_upload_video_ids("UC123").unwrap().is_empty());
    }

    #[test]
    fn repeated_cursor_is_an_error() {
        let api = FakeApi::new()
            .with_channel("UC123", "Rust Talks", Some("UU123"))
            .with_playlist_items("UU123", &["a", "b", "c"])
            .with_stuck_cursor("UU123");
        let harvester = Harvester::new(api, small_pages());

        match harvester.fetch_upload_video_ids("UC123") {
            Err(HarvestError::RepeatedCursor { entity, cursor }) => {
                assert_eq!(entity, Entity::PlaylistItems);
                assert_eq!(cursor, "stuck");
            }
            other => panic!("expected repeated cursor, got {other:?}"),
        }
    }

    #[test]
    fn missing_statistics_fall_back_to_defaults() {
        let api = FakeApi::new().with_video_json(
            "hidden",
            serde_json::json!({
                "id": "hidden",
                "snippet": {
                    "channelId": "UC123",
                    "channelTitle": "Rust Talks",
                    "title": "Likes hidden",
                    "publishedAt": "2022-03-01T10:00:00Z"
                },
                "statistics": {"viewCount": "77"},
                "contentDetails": {"duration": "P1DT2H"}
            }),
        );
        let harvester = Harvester::new(api, PageSizes::default());

        let videos = harvester.fetch_videos(&["hidden".to_owned()]).unwrap();
        let video = &videos[0];
        assert_eq!(video.view_count, 77);
        assert_eq!(video.like_count, None);
        assert_eq!(video.dislike_count, 0);
        assert_eq!(video.comment_count, 0);
        assert_eq!(video.duration, None);
        assert!(video.tags.is_empty());
    }

    #[test]
    fn vanished_videos_are_skipped() {
        let api = FakeApi::new().with_video("UC123", "v1", "First");
        let harvester = Harvester::new(api, PageSizes::default());

        let videos = harvester
            .fetch_videos(&["v1".to_owned(), "gone".to_owned()])
            .unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].video_id, "v1");
        assert_eq!(videos[0].duration.as_deref(), Some("00:04:13"));
        assert_eq!(videos[0].tags, ["rust", "talk"]);
    }

    #[test]
    fn comments_disabled_only_skips_that_video() {
        let api = FakeApi::new()
            .with_comments("open-1", 3)
            .with_comments("open-2", 5)
            .with_comments_disabled("closed");
        let harvester = Harvester::new(api, small_pages());
        let ids: Vec<String> = ["open-1", "closed", "open-2"].map(str::to_owned).to_vec();

        let harvest = harvester.fetch_comments(&ids);
        assert_eq!(harvest.comments.len(), 8);
        assert!(harvest.comments.iter().all(|c| c.video_id != "closed"));
        assert_eq!(
            harvest.skipped,
            [SkippedVideo {
                video_id: "closed".to_owned(),
                reason: SkipReason::CommentsDisabled,
            }]
        );
    }

    #[test]
    fn other_comment_failures_are_isolated_too() {
        let api = FakeApi::new()
            .with_comments("ok", 1)
            .with_failing_comments("flaky");
        let harvester = Harvester::new(api, small_pages());
        let ids = vec!["flaky".to_owned(), "ok".to_owned()];

        let harvest = harvester.fetch_comments(&ids);
        assert_eq!(harvest.comments.len(), 1);
        assert_eq!(harvest.skipped.len(), 1);
        assert_eq!(harvest.skipped[0].video_id, "flaky");
        assert!(matches!(harvest.skipped[0].reason, SkipReason::Failed(_)));
    }

    #[test]
    fn comment_defaults_and_ownership() {
        let api = FakeApi::new().with_comments("v1", 1);
        let harvester = Harvester::new(api, PageSizes::default());

        let harvest = harvester.fetch_comments(&["v1".to_owned()]);
        let comment = &harvest.comments[0];
        assert_eq!(comment.video_id, "v1");
        assert_eq!(comment.viewer_rating, "none");
        assert_eq!(
            comment.published_at.to_storage().as_deref(),
            Some("2023-05-01 12:00:00")
        );
    }

    #[test]
    fn playlist_transport_failure_is_attributed() {
        let api = FakeApi::new()
            .with_channel("UC123", "Rust Talks", Some("UU123"))
            .with_failing_playlists();
        let harvester = Harvester::new(api, PageSizes::default());

        match harvester.fetch_playlists("UC123") {
            Err(HarvestError::Api { entity, source }) => {
                assert_eq!(entity, Entity::Playlists);
                assert!(matches!(source, ApiError::Transport(_)));
            }
            other => panic!("expected api failure, got {other:?}"),
        }
    }
}
