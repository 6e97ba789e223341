#![forbid(unsafe_code)]

//! Harvests a YouTube channel's profile, playlists, videos and comments and
//! keeps a normalized copy of them in SQLite.

pub mod api;
pub mod config;
pub mod harvest;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod report;
pub mod store;

#[cfg(test)]
mod fake_api;

pub use api::{ChannelApi, YouTubeClient};
pub use harvest::Harvester;
pub use pipeline::{Pipeline, RunReport, RunStep};
pub use store::HarvestStore;
