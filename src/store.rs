#![forbid(unsafe_code)]

//! SQLite persistence for harvested channels.
//!
//! Four tables linked by foreign keys: `CommentInfo -> VideoInfo -> ChannelInfo`
//! and `PlaylistDetails -> ChannelInfo`. Writes are upserts keyed on the
//! remote identifiers; a channel is removed child tables first.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use libsql::params::IntoParams;
use libsql::{Builder, Connection, params};
use tracing::debug;

use crate::model::{ChannelRecord, CommentRecord, EntityCounts, PlaylistRecord, VideoRecord};
use crate::normalize::join_tags;
use crate::report::{ChannelSnapshot, QueryResult, ReportQuery, SqlValue};

async fn configure_connection(conn: &Connection) -> Result<()> {
    // journal_mode answers with a row, which execute_batch refuses.
    conn.query("PRAGMA journal_mode=WAL", params![])
        .await
        .context("enabling WAL journal")?;
    conn.execute_batch(
        r#"
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS ChannelInfo (
            channel_Id TEXT PRIMARY KEY,
            channel_Name TEXT NOT NULL,
            subscription_count INTEGER NOT NULL DEFAULT 0,
            channel_views INTEGER NOT NULL DEFAULT 0,
            Total_videos INTEGER NOT NULL DEFAULT 0,
            channel_description TEXT NOT NULL DEFAULT '',
            playlist_id TEXT
        );

        CREATE TABLE IF NOT EXISTS PlaylistDetails (
            Playlist_Id TEXT PRIMARY KEY,
            Title TEXT NOT NULL DEFAULT '',
            Channel_Id TEXT NOT NULL REFERENCES ChannelInfo(channel_Id),
            Channel_Name TEXT NOT NULL DEFAULT '',
            PublishedAt TEXT,
            Video_count INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS VideoInfo (
            video_id TEXT PRIMARY KEY,
            channel_Name TEXT NOT NULL DEFAULT '',
            channel_Id TEXT NOT NULL REFERENCES ChannelInfo(channel_Id),
            title TEXT NOT NULL DEFAULT '',
            video_description TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            published_At TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER,
            dislike_count INTEGER NOT NULL DEFAULT 0,
            favorite_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            duration TEXT,
            thumbnail TEXT,
            caption_status TEXT
        );

        CREATE TABLE IF NOT EXISTS CommentInfo (
            comment_id TEXT PRIMARY KEY,
            video_id TEXT NOT NULL REFERENCES VideoInfo(video_id),
            author TEXT NOT NULL DEFAULT '',
            comment_published_at TEXT,
            comment_text TEXT NOT NULL DEFAULT '',
            like_count INTEGER NOT NULL DEFAULT 0,
            viewer_rating TEXT NOT NULL DEFAULT 'none',
            comment_updated_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_playlists_channel ON PlaylistDetails(Channel_Id);
        CREATE INDEX IF NOT EXISTS idx_videos_channel ON VideoInfo(channel_Id);
        CREATE INDEX IF NOT EXISTS idx_comments_video ON CommentInfo(video_id);
        "#,
    )
    .await?;
    Ok(())
}

/// SQLite stores signed 64-bit integers.
fn sql_count(value: u64) -> Result<i64> {
    i64::try_from(value).with_context(|| format!("count {value} exceeds the SQLite integer range"))
}

/// One connection to the harvest database. Dropping the store closes it.
pub struct HarvestStore {
    conn: Connection,
}

impl fmt::Debug for HarvestStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestStore").finish_non_exhaustive()
    }
}

impl HarvestStore {
    /// Opens (and if necessary creates) the database file and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening harvest DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await.context("creating harvest schema")?;
        Ok(Self { conn })
    }

    /// Deletes every row belonging to `channel_id` in one transaction,
    /// comments first so no foreign key is ever left dangling.
    pub async fn clear_channel(&self, channel_id: &str) -> Result<()> {
        let tx = self.conn.transaction().await?;
        let comments = tx
            .execute(
                r#"
                DELETE FROM CommentInfo
                WHERE video_id IN (SELECT video_id FROM VideoInfo WHERE channel_Id = ?1)
                "#,
                params![channel_id],
            )
            .await
            .context("deleting comments")?;
        let videos = tx
            .execute("DELETE FROM VideoInfo WHERE channel_Id = ?1", params![channel_id])
            .await
            .context("deleting videos")?;
        let playlists = tx
            .execute("DELETE FROM PlaylistDetails WHERE Channel_Id = ?1", params![channel_id])
            .await
            .context("deleting playlists")?;
        tx.execute("DELETE FROM ChannelInfo WHERE channel_Id = ?1", params![channel_id])
            .await
            .context("deleting channel")?;
        tx.commit().await?;

        debug!(channel_id, comments, videos, playlists, "cleared channel");
        Ok(())
    }

    pub async fn upsert_channel(&self, channel: &ChannelRecord) -> Result<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO ChannelInfo (
                    channel_Id, channel_Name, subscription_count, channel_views,
                    Total_videos, channel_description, playlist_id
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(channel_Id) DO UPDATE SET
                    channel_Name = excluded.channel_Name,
                    subscription_count = excluded.subscription_count,
                    channel_views = excluded.channel_views,
                    Total_videos = excluded.Total_videos,
                    channel_description = excluded.channel_description,
                    playlist_id = excluded.playlist_id
                "#,
                params![
                    channel.channel_id.as_str(),
                    channel.name.as_str(),
                    sql_count(channel.subscriber_count)?,
                    sql_count(channel.view_count)?,
                    sql_count(channel.video_count)?,
                    channel.description.as_str(),
                    channel.uploads_playlist_id.as_deref(),
                ],
            )
            .await
            .with_context(|| format!("upserting channel {}", channel.channel_id))?;
        Ok(())
    }

    /// Writes the whole batch or nothing.
    pub async fn upsert_playlists(&self, playlists: &[PlaylistRecord]) -> Result<()> {
        let tx = self.conn.transaction().await?;
        for playlist in playlists {
            tx.execute(
                r#"
                INSERT INTO PlaylistDetails (
                    Playlist_Id, Title, Channel_Id, Channel_Name, PublishedAt, Video_count
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(Playlist_Id) DO UPDATE SET
                    Title = excluded.Title,
                    Channel_Id = excluded.Channel_Id,
                    Channel_Name = excluded.Channel_Name,
                    PublishedAt = excluded.PublishedAt,
                    Video_count = excluded.Video_count
                "#,
                params![
                    playlist.playlist_id.as_str(),
                    playlist.title.as_str(),
                    playlist.channel_id.as_str(),
                    playlist.channel_name.as_str(),
                    playlist.published_at.to_storage(),
                    sql_count(playlist.item_count)?,
                ],
            )
            .await
            .with_context(|| format!("upserting playlist {}", playlist.playlist_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Writes the whole batch or nothing.
    pub async fn upsert_videos(&self, videos: &[VideoRecord]) -> Result<()> {
        let tx = self.conn.transaction().await?;
        for video in videos {
            let like_count = video.like_count.map(sql_count).transpose()?;
            tx.execute(
                r#"
                INSERT INTO VideoInfo (
                    video_id, channel_Name, channel_Id, title, video_description, tags,
                    published_At, view_count, like_count, dislike_count, favorite_count,
                    comment_count, duration, thumbnail, caption_status
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(video_id) DO UPDATE SET
                    channel_Name = excluded.channel_Name,
                    channel_Id = excluded.channel_Id,
                    title = excluded.title,
                    video_description = excluded.video_description,
                    tags = excluded.tags,
                    published_At = excluded.published_At,
                    view_count = excluded.view_count,
                    like_count = excluded.like_count,
                    dislike_count = excluded.dislike_count,
                    favorite_count = excluded.favorite_count,
                    comment_count = excluded.comment_count,
                    duration = excluded.duration,
                    thumbnail = excluded.thumbnail,
                    caption_status = excluded.caption_status
                "#,
                params![
                    video.video_id.as_str(),
                    video.channel_name.as_str(),
                    video.channel_id.as_str(),
                    video.title.as_str(),
                    video.description.as_str(),
                    join_tags(&video.tags),
                    video.published_at.to_storage(),
                    sql_count(video.view_count)?,
                    like_count,
                    sql_count(video.dislike_count)?,
                    sql_count(video.favorite_count)?,
                    sql_count(video.comment_count)?,
                    video.duration.as_deref(),
                    video.thumbnail_url.as_deref(),
                    video.caption_status.as_deref(),
                ],
            )
            .await
            .with_context(|| format!("upserting video {}", video.video_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Writes the whole batch or nothing.
    pub async fn upsert_comments(&self, comments: &[CommentRecord]) -> Result<()> {
        let tx = self.conn.transaction().await?;
        for comment in comments {
            tx.execute(
                r#"
                INSERT INTO CommentInfo (
                    comment_id, video_id, author, comment_published_at, comment_text,
                    like_count, viewer_rating, comment_updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                ON CONFLICT(comment_id) DO UPDATE SET
                    video_id = excluded.video_id,
                    author = excluded.author,
                    comment_published_at = excluded.comment_published_at,
                    comment_text = excluded.comment_text,
                    like_count = excluded.like_count,
                    viewer_rating = excluded.viewer_rating,
                    comment_updated_at = excluded.comment_updated_at
                "#,
                params![
                    comment.comment_id.as_str(),
                    comment.video_id.as_str(),
                    comment.author.as_str(),
                    comment.published_at.to_storage(),
                    comment.text.as_str(),
                    sql_count(comment.like_count)?,
                    comment.viewer_rating.as_str(),
                    comment.updated_at.to_storage(),
                ],
            )
            .await
            .with_context(|| format!("upserting comment {}", comment.comment_id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn channel_exists(&self, channel_id: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM ChannelInfo WHERE channel_Id = ?1",
                params![channel_id],
            )
            .await?;
        let count: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };
        Ok(count > 0)
    }

    /// Every stored channel id, ordered by channel name.
    pub async fn channel_ids(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT channel_Id FROM ChannelInfo ORDER BY channel_Name, channel_Id",
                params![],
            )
            .await?;
        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get(0)?);
        }
        Ok(ids)
    }

    pub async fn stored_counts(&self, channel_id: &str) -> Result<EntityCounts> {
        let mut rows = self
            .conn
            .query(
                r#"
                SELECT
                    (SELECT COUNT(*) FROM ChannelInfo WHERE channel_Id = ?1),
                    (SELECT COUNT(*) FROM PlaylistDetails WHERE Channel_Id = ?1),
                    (SELECT COUNT(*) FROM VideoInfo WHERE channel_Id = ?1),
                    (SELECT COUNT(*) FROM CommentInfo WHERE video_id IN
                        (SELECT video_id FROM VideoInfo WHERE channel_Id = ?1))
                "#,
                params![channel_id],
            )
            .await?;
        let row = rows.next().await?.context("count query returned no row")?;
        let count = |index: i32| -> Result<usize> {
            let value: i64 = row.get(index)?;
            usize::try_from(value).context("negative row count")
        };
        Ok(EntityCounts {
            channels: count(0)?,
            playlists: count(1)?,
            videos: count(2)?,
            comments: count(3)?,
        })
    }

    /// Runs arbitrary SQL text and returns its column-named row set.
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        self.collect(sql, params![]).await
    }

    pub async fn run_report(&self, report: ReportQuery) -> Result<QueryResult> {
        self.query(report.sql())
            .await
            .with_context(|| format!("running report {report}"))
    }

    pub async fn channel_snapshot(&self, channel_id: &str) -> Result<ChannelSnapshot> {
        Ok(ChannelSnapshot {
            channel: self
                .collect("SELECT * FROM ChannelInfo WHERE channel_Id = ?1", params![channel_id])
                .await?,
            playlists: self
                .collect(
                    "SELECT * FROM PlaylistDetails WHERE Channel_Id = ?1 ORDER BY PublishedAt",
                    params![channel_id],
                )
                .await?,
            videos: self
                .collect(
                    "SELECT * FROM VideoInfo WHERE channel_Id = ?1 ORDER BY published_At",
                    params![channel_id],
                )
                .await?,
            comments: self
                .collect(
                    r#"
                    SELECT * FROM CommentInfo
                    WHERE video_id IN (SELECT video_id FROM VideoInfo WHERE channel_Id = ?1)
                    ORDER BY video_id, comment_published_at
                    "#,
                    params![channel_id],
                )
                .await?,
        })
    }

    /// Row set behind the per-channel bar chart.
    pub async fn channel_aggregates(&self) -> Result<QueryResult> {
        self.query(
            r#"
            SELECT channel_Name, Total_videos, channel_views, subscription_count
            FROM ChannelInfo
            ORDER BY channel_Name
            "#,
        )
        .await
    }

    /// Row set behind the per-video bar chart of one channel.
    pub async fn video_aggregates(&self, channel_id: &str) -> Result<QueryResult> {
        self.collect(
            r#"
            SELECT video_id, view_count, like_count, comment_count
            FROM VideoInfo
            WHERE channel_Id = ?1
            ORDER BY published_At
            "#,
            params![channel_id],
        )
        .await
    }

    async fn collect(&self, sql: &str, params: impl IntoParams) -> Result<QueryResult> {
        let mut rows = self
            .conn
            .query(sql, params)
            .await
            .with_context(|| format!("running query: {}", sql.trim()))?;

        let column_count = rows.column_count();
        let columns = (0..column_count)
            .map(|index| rows.column_name(index).unwrap_or_default().to_string())
            .collect();

        let mut result = QueryResult {
            columns,
            rows: Vec::new(),
        };
        while let Some(row) = rows.next().await? {
            let cells = (0..column_count)
                .map(|index| row.get_value(index).map(SqlValue::from))
                .collect::<Result<Vec<_>, _>>()?;
            result.rows.push(cells);
        }
        debug!(rows = result.len(), "query finished");
        Ok(result)
    }
}
