#![forbid(unsafe_code)]

//! In-memory rows produced by the harvester and written by the store.
//!
//! Field names follow the remote API; column names live in `store`.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::normalize::Normalized;

/// Channel profile plus statistics. Exactly one per harvest run.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub name: String,
    pub subscriber_count: u64,
    pub view_count: u64,
    pub video_count: u64,
    pub description: String,
    /// Platform-managed playlist holding every public upload.
    pub uploads_playlist_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistRecord {
    pub playlist_id: String,
    pub title: String,
    pub channel_id: String,
    pub channel_name: String,
    pub published_at: Normalized<NaiveDateTime>,
    pub item_count: u64,
}

/// Video metadata. Counters the platform may hide fall back to defaults:
/// `like_count` stays unknown, dislikes and comments count as zero.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoRecord {
    pub video_id: String,
    pub channel_id: String,
    pub channel_name: String,
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub published_at: Normalized<NaiveDateTime>,
    pub view_count: u64,
    pub like_count: Option<u64>,
    pub dislike_count: u64,
    pub favorite_count: u64,
    pub comment_count: u64,
    /// `HH:MM:SS`, or `None` when the API value could not be parsed.
    pub duration: Option<String>,
    pub thumbnail_url: Option<String>,
    pub caption_status: Option<String>,
}

/// Top-level comment of a thread.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentRecord {
    pub comment_id: String,
    pub video_id: String,
    pub author: String,
    pub published_at: Normalized<NaiveDateTime>,
    pub text: String,
    pub like_count: u64,
    pub viewer_rating: String,
    pub updated_at: Normalized<NaiveDateTime>,
}

/// Row counts per entity type, harvested or stored.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EntityCounts {
    pub channels: usize,
    pub playlists: usize,
    pub videos: usize,
    pub comments: usize,
}
