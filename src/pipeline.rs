#![forbid(unsafe_code)]

//! Runs one channel through clear, harvest and persist, reporting where a run
//! stopped and why.

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::api::ChannelApi;
use crate::harvest::{HarvestError, Harvester, SkippedVideo};
use crate::model::EntityCounts;
use crate::report::ChannelSnapshot;
use crate::store::HarvestStore;

/// Stages of a run, in the order they are entered. `Error` is terminal and
/// can follow any other stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStep {
    Idle,
    Clearing,
    HarvestingChannel,
    HarvestingPlaylists,
    HarvestingVideos,
    HarvestingComments,
    Persisting,
    Done,
    Error,
}

impl fmt::Display for RunStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunStep::Idle => "idle",
            RunStep::Clearing => "clearing",
            RunStep::HarvestingChannel => "harvesting channel",
            RunStep::HarvestingPlaylists => "harvesting playlists",
            RunStep::HarvestingVideos => "harvesting videos",
            RunStep::HarvestingComments => "harvesting comments",
            RunStep::Persisting => "persisting",
            RunStep::Done => "done",
            RunStep::Error => "error",
        })
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a run for channel {0} is already in progress")]
    ChannelBusy(String),
    #[error("storage error: {0:#}")]
    Store(anyhow::Error),
    #[error(transparent)]
    Harvest(#[from] HarvestError),
}

#[derive(Debug, Error)]
#[error("{step} failed: {cause}")]
pub struct StepFailure {
    pub step: RunStep,
    pub cause: PipelineError,
}

impl StepFailure {
    fn store(step: RunStep) -> impl FnOnce(anyhow::Error) -> StepFailure {
        move |err| StepFailure {
            step,
            cause: PipelineError::Store(err),
        }
    }

    fn harvest(step: RunStep) -> impl FnOnce(HarvestError) -> StepFailure {
        move |err| StepFailure {
            step,
            cause: PipelineError::Harvest(err),
        }
    }
}

/// Outcome of one run. Either `failure` is set and `final_step` is
/// [`RunStep::Error`], or the run reached [`RunStep::Done`] and carries the
/// stored snapshot unless reading it back failed.
#[derive(Debug, Serialize)]
pub struct RunReport {
    pub channel_id: String,
    pub final_step: RunStep,
    pub harvested: EntityCounts,
    /// Rows in batches that committed. Earlier batches stay committed when a
    /// later one fails.
    pub persisted: EntityCounts,
    pub skipped_comments: Vec<SkippedVideo>,
    #[serde(serialize_with = "serialize_failure")]
    pub failure: Option<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ChannelSnapshot>,
}

impl RunReport {
    fn new(channel_id: &str) -> Self {
        Self {
            channel_id: channel_id.to_owned(),
            final_step: RunStep::Idle,
            harvested: EntityCounts::default(),
            persisted: EntityCounts::default(),
            skipped_comments: Vec::new(),
            failure: None,
            snapshot: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_step == RunStep::Done
    }

    /// Step the run failed at, if it failed.
    pub fn failed_step(&self) -> Option<RunStep> {
        self.failure.as_ref().map(|failure| failure.step)
    }

    fn advance(&mut self, step: RunStep) {
        debug!(channel_id = %self.channel_id, %step, "entering step");
        self.final_step = step;
    }
}

#[derive(Serialize)]
struct FailureSummary {
    step: RunStep,
    cause: String,
}

fn serialize_failure<S: Serializer>(
    failure: &Option<StepFailure>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    failure
        .as_ref()
        .map(|failure| FailureSummary {
            step: failure.step,
            cause: failure.cause.to_string(),
        })
        .serialize(serializer)
}

/// Channel ids with a run in flight. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunLocks {
    /// `None` when another run already holds `channel_id`.
    pub fn try_acquire(&self, channel_id: &str) -> Option<RunGuard> {
        if !self.active.lock().insert(channel_id.to_owned()) {
            return None;
        }
        Some(RunGuard {
            locks: self.clone(),
            channel_id: channel_id.to_owned(),
        })
    }

    pub fn is_running(&self, channel_id: &str) -> bool {
        self.active.lock().contains(channel_id)
    }
}

/// Releases the channel when dropped.
#[derive(Debug)]
pub struct RunGuard {
    locks: RunLocks,
    channel_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.channel_id);
    }
}

pub struct Pipeline<A> {
    harvester: Harvester<A>,
    db_path: PathBuf,
    locks: RunLocks,
}

impl<A: ChannelApi> Pipeline<A> {
    pub fn new(harvester: Harvester<A>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            harvester,
            db_path: db_path.into(),
            locks: RunLocks::default(),
        }
    }

    /// Shares run locks with other pipelines writing the same database.
    pub fn with_locks(mut self, locks: RunLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn harvester(&self) -> &Harvester<A> {
        &self.harvester
    }

    pub fn locks(&self) -> &RunLocks {
        &self.locks
    }

    /// Replaces everything stored for `channel_id` with a fresh harvest.
    /// Never retries; the report names the step that failed.
    pub async fn run(&self, channel_id: &str) -> RunReport {
        let mut report = RunReport::new(channel_id);

        let Some(_guard) = self.locks.try_acquire(channel_id) else {
            warn!(channel_id, "run already in progress; refusing to start another");
            report.final_step = RunStep::Error;
            report.failure = Some(StepFailure {
                step: RunStep::Idle,
                cause: PipelineError::ChannelBusy(channel_id.to_owned()),
            });
            return report;
        };

        info!(channel_id, db = %self.db_path.display(), "starting harvest run");
        match self.execute(channel_id, &mut report).await {
            Ok(snapshot) => {
                report.advance(RunStep::Done);
                report.snapshot = snapshot;
                info!(
                    channel_id,
                    playlists = report.persisted.playlists,
                    videos = report.persisted.videos,
                    comments = report.persisted.comments,
                    skipped = report.skipped_comments.len(),
                    "harvest run complete"
                );
            }
            Err(failure) => {
                error!(channel_id, step = %failure.step, error = %failure.cause, "harvest run failed");
                report.final_step = RunStep::Error;
                report.failure = Some(failure);
            }
        }
        report
    }

    /// The store lives for this call only, so the connection is released on
    /// every exit path.
    async fn execute(
        &self,
        channel_id: &str,
        report: &mut RunReport,
    ) -> Result<Option<ChannelSnapshot>, StepFailure> {
        report.advance(RunStep::Clearing);
        let store = HarvestStore::open(&self.db_path)
            .await
            .map_err(StepFailure::store(RunStep::Clearing))?;
        store
            .clear_channel(channel_id)
            .await
            .map_err(StepFailure::store(RunStep::Clearing))?;

        report.advance(RunStep::HarvestingChannel);
        let channel = self
            .harvester
            .fetch_channel(channel_id)
            .map_err(StepFailure::harvest(RunStep::HarvestingChannel))?;
        report.harvested.channels = 1;

        report.advance(RunStep::HarvestingPlaylists);
        let playlists = self
            .harvester
            .fetch_playlists(channel_id)
            .map_err(StepFailure::harvest(RunStep::HarvestingPlaylists))?;
        report.harvested.playlists = playlists.len();

        report.advance(RunStep::HarvestingVideos);
        let video_ids = self
            .harvester
            .fetch_channel_uploads(&channel)
            .map_err(StepFailure::harvest(RunStep::HarvestingVideos))?;
        let videos = self
            .harvester
            .fetch_videos(&video_ids)
            .map_err(StepFailure::harvest(RunStep::HarvestingVideos))?;
        report.harvested.videos = videos.len();

        // Only videos that resolved get comments, so every comment has a
        // parent row.
        report.advance(RunStep::HarvestingComments);
        let resolved: Vec<String> = videos.iter().map(|video| video.video_id.clone()).collect();
        let comments = self.harvester.fetch_comments(&resolved);
        report.harvested.comments = comments.comments.len();
        report.skipped_comments = comments.skipped;

        report.advance(RunStep::Persisting);
        let persist_err = || StepFailure::store(RunStep::Persisting);
        store.upsert_channel(&channel).await.map_err(persist_err())?;
        report.persisted.channels = 1;
        store.upsert_playlists(&playlists).await.map_err(persist_err())?;
        report.persisted.playlists = playlists.len();
        store.upsert_videos(&videos).await.map_err(persist_err())?;
        report.persisted.videos = videos.len();
        store
            .upsert_comments(&comments.comments)
            .await
            .map_err(persist_err())?;
        report.persisted.comments = comments.comments.len();

        Ok(committed_snapshot(channel_id, store.channel_snapshot(channel_id).await))
    }
}

/// Every batch has committed by the time the snapshot is read, so a failed
/// read costs the snapshot and not the run.
fn committed_snapshot(
    channel_id: &str,
    snapshot: anyhow::Result<ChannelSnapshot>,
) -> Option<ChannelSnapshot> {
    match snapshot {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!(channel_id, error = %format!("{err:#}"), "could not read back stored rows");
            None
        }
    }
}
