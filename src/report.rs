#![forbid(unsafe_code)]

//! Read-side row sets: ad-hoc query results, the fixed reporting queries and
//! the per-channel snapshot shown after a run.

use std::fmt;

use serde::Serialize;

const MAX_CELL_WIDTH: usize = 40;

/// A single cell, typed the way SQLite returned it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl From<libsql::Value> for SqlValue {
    fn from(value: libsql::Value) -> Self {
        match value {
            libsql::Value::Null => SqlValue::Null,
            libsql::Value::Integer(value) => SqlValue::Integer(value),
            libsql::Value::Real(value) => SqlValue::Real(value),
            libsql::Value::Text(value) => SqlValue::Text(value),
            libsql::Value::Blob(value) => SqlValue::Blob(value),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(value) => write!(f, "{value}"),
            SqlValue::Real(value) => write!(f, "{value}"),
            SqlValue::Text(value) => f.write_str(value),
            SqlValue::Blob(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Column-named row set. No matching rows is an empty result, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    /// Cell of `row` under the column called `column`.
    pub fn value(&self, row: usize, column: &str) -> Option<&SqlValue> {
        let index = self.column_index(column)?;
        self.rows.get(row)?.get(index)
    }

    /// Plain-text table with one header line and a dashed rule. Long cells
    /// are cut and line breaks flattened so every row stays on one line.
    pub fn render_table(&self) -> String {
        let cells: Vec<Vec<String>> = self
            .rows
            .iter()
            .map(|row| row.iter().map(display_cell).collect())
            .collect();

        let mut widths: Vec<usize> = self
            .columns
            .iter()
            .map(|column| column.chars().count())
            .collect();
        for row in &cells {
            for (index, cell) in row.iter().enumerate() {
                if let Some(width) = widths.get_mut(index) {
                    *width = (*width).max(cell.chars().count());
                }
            }
        }

        let mut out = String::new();
        push_line(&mut out, self.columns.iter().map(String::as_str), &widths);
        let rule: Vec<String> = widths.iter().map(|width| "-".repeat(*width)).collect();
        push_line(&mut out, rule.iter().map(String::as_str), &widths);
        for row in &cells {
            push_line(&mut out, row.iter().map(String::as_str), &widths);
        }
        out
    }
}

fn display_cell(value: &SqlValue) -> String {
    let flat: String = value
        .to_string()
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    if flat.chars().count() <= MAX_CELL_WIDTH {
        return flat;
    }
    let mut cut: String = flat.chars().take(MAX_CELL_WIDTH - 3).collect();
    cut.push_str("...");
    cut
}

fn push_line<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line: Vec<String> = cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .collect();
    out.push_str(line.join(" | ").trim_end());
    out.push('\n');
}

/// Everything stored for one channel, as returned after a successful run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub channel: QueryResult,
    pub playlists: QueryResult,
    pub videos: QueryResult,
    pub comments: QueryResult,
}

/// The fixed dashboard reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportQuery {
    AllVideos,
    ChannelsByVideoCount,
    TopViewed,
    MostCommented,
    MostLiked,
    LikesAndDislikes,
    ViewsPerChannel,
    PublishedIn2022,
    AverageDuration,
    CommentCounts,
}

impl ReportQuery {
    pub const ALL: [ReportQuery; 10] = [
        ReportQuery::AllVideos,
        ReportQuery::ChannelsByVideoCount,
        ReportQuery::TopViewed,
        ReportQuery::MostCommented,
        ReportQuery::MostLiked,
        ReportQuery::LikesAndDislikes,
        ReportQuery::ViewsPerChannel,
        ReportQuery::PublishedIn2022,
        ReportQuery::AverageDuration,
        ReportQuery::CommentCounts,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|query| query.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            ReportQuery::AllVideos => "all-videos",
            ReportQuery::ChannelsByVideoCount => "channels-by-video-count",
            ReportQuery::TopViewed => "top-viewed",
            ReportQuery::MostCommented => "most-commented",
            ReportQuery::MostLiked => "most-liked",
            ReportQuery::LikesAndDislikes => "likes-and-dislikes",
            ReportQuery::ViewsPerChannel => "views-per-channel",
            ReportQuery::PublishedIn2022 => "published-in-2022",
            ReportQuery::AverageDuration => "average-duration",
            ReportQuery::CommentCounts => "comment-counts",
        }
    }

    pub fn title(self) -> &'static str {
        match self {
            ReportQuery::AllVideos => "All details of all videos",
            ReportQuery::ChannelsByVideoCount => "Channels with most videos",
            ReportQuery::TopViewed => "Top 10 most viewed videos",
            ReportQuery::MostCommented => "Videos with most comments",
            ReportQuery::MostLiked => "Videos with highest likes",
            ReportQuery::LikesAndDislikes => "Total likes and dislikes for each video",
            ReportQuery::ViewsPerChannel => "Total views for each channel",
            ReportQuery::PublishedIn2022 => "Channels with videos published in 2022",
            ReportQuery::AverageDuration => "Average video duration per channel",
            ReportQuery::CommentCounts => "Comment count of each video",
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            ReportQuery::AllVideos => "SELECT * FROM VideoInfo ORDER BY channel_Name, published_At",
            ReportQuery::ChannelsByVideoCount => {
                r#"
                SELECT ChannelInfo.*, COUNT(VideoInfo.video_id) AS video_count
                FROM ChannelInfo
                JOIN VideoInfo ON ChannelInfo.channel_Id = VideoInfo.channel_Id
                GROUP BY ChannelInfo.channel_Id
                ORDER BY video_count DESC
                "#
            }
            ReportQuery::TopViewed => "SELECT * FROM VideoInfo ORDER BY view_count DESC LIMIT 10",
            ReportQuery::MostCommented => "SELECT * FROM VideoInfo ORDER BY comment_count DESC",
            ReportQuery::MostLiked => {
                "SELECT * FROM VideoInfo WHERE like_count IS NOT NULL ORDER BY like_count DESC"
            }
            ReportQuery::LikesAndDislikes => {
                r#"
                SELECT *, COALESCE(like_count, 0) + dislike_count AS total_likes_dislikes
                FROM VideoInfo
                ORDER BY total_likes_dislikes DESC
                "#
            }
            ReportQuery::ViewsPerChannel => {
                r#"
                SELECT ChannelInfo.*, SUM(VideoInfo.view_count) AS total_views
                FROM ChannelInfo
                JOIN VideoInfo ON ChannelInfo.channel_Id = VideoInfo.channel_Id
                GROUP BY ChannelInfo.channel_Id
                ORDER BY total_views DESC
                "#
            }
            ReportQuery::PublishedIn2022 => {
                r#"
                SELECT DISTINCT channel_Name, published_At
                FROM VideoInfo
                WHERE strftime('%Y', published_At) = '2022'
                ORDER BY published_At
                "#
            }
            // Hours are unbounded, so minutes and seconds are read from the end.
            ReportQuery::AverageDuration => {
                r#"
                SELECT channel_Name,
                       printf('%02d:%02d:%02d',
                              avg_seconds / 3600,
                              (avg_seconds % 3600) / 60,
                              avg_seconds % 60) AS average_duration
                FROM (
                    SELECT channel_Name,
                           CAST(ROUND(AVG(
                               CAST(substr(duration, 1, length(duration) - 6) AS INTEGER) * 3600
                             + CAST(substr(duration, -5, 2) AS INTEGER) * 60
                             + CAST(substr(duration, -2) AS INTEGER)
                           )) AS INTEGER) AS avg_seconds
                    FROM VideoInfo
                    WHERE duration IS NOT NULL
                    GROUP BY channel_Name
                )
                ORDER BY channel_Name
                "#
            }
            ReportQuery::CommentCounts => {
                r#"
                SELECT video_id, channel_Name, comment_count
                FROM VideoInfo
                ORDER BY comment_count DESC
                "#
            }
        }
    }
}

impl fmt::Display for ReportQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
