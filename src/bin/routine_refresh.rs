#![forbid(unsafe_code)]

//! Re-harvests every channel already in the database, one after another.
//! Meant to run as a nightly job.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use yt_harvest::{
    YouTubeClient,
    config::{SettingsOverrides, resolve_settings},
    harvest::Harvester,
    pipeline::Pipeline,
    store::HarvestStore,
};

#[derive(Debug, Parser)]
#[command(name = "routine_refresh", about = "Refresh every stored channel")]
struct RefreshArgs {
    #[arg(long)]
    db: Option<PathBuf>,
    #[arg(long)]
    api_key: Option<String>,
    #[arg(long)]
    env_file: Option<PathBuf>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args = RefreshArgs::parse();
    let settings = resolve_settings(SettingsOverrides {
        api_key: args.api_key,
        db_path: args.db,
        env_path: args.env_file,
        config_path: args.config,
    })?;
    let api_key = settings.require_api_key()?;

    let channels = HarvestStore::open(&settings.db_path)
        .await
        .context("initializing harvest database")?
        .channel_ids()
        .await?;

    println!("Database: {}", settings.db_path.display());
    if channels.is_empty() {
        println!("No stored channels to refresh.");
        return Ok(());
    }
    println!("Found {} channel(s) to refresh.", channels.len());

    let client = YouTubeClient::new(api_key, &settings.tuning);
    let pipeline = Pipeline::new(
        Harvester::new(client, settings.tuning.page_sizes()),
        settings.db_path.clone(),
    );

    let mut failed = Vec::new();
    for (index, channel_id) in channels.iter().enumerate() {
        println!();
        println!("[{}/{}] Refreshing channel: {}", index + 1, channels.len(), channel_id);

        let report = pipeline.run(channel_id).await;
        match &report.failure {
            None => println!(
                "  Completed: {} video(s), {} comment(s), {} video(s) without comments",
                report.persisted.videos,
                report.persisted.comments,
                report.skipped_comments.len()
            ),
            Some(failure) => {
                eprintln!("  Warning: {channel_id}: {failure}");
                failed.push(channel_id.as_str());
            }
        }
    }

    println!();
    if !failed.is_empty() {
        bail!("{} of {} channel(s) failed: {}", failed.len(), channels.len(), failed.join(", "));
    }
    println!("All channel refreshes complete.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_default_to_settings_resolution() {
        let args = RefreshArgs::try_parse_from(["routine_refresh"]).unwrap();
        assert!(args.db.is_none());
        assert!(args.api_key.is_none());
    }

    #[test]
    fn args_accept_overrides() {
        let args = RefreshArgs::try_parse_from([
            "routine_refresh",
            "--db",
            "/srv/harvest.db",
            "--env-file",
            "/etc/harvest.env",
        ])
        .unwrap();
        assert_eq!(args.db, Some(PathBuf::from("/srv/harvest.db")));
        assert_eq!(args.env_file, Some(PathBuf::from("/etc/harvest.env")));
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(RefreshArgs::try_parse_from(["routine_refresh", "--media-root", "/x"]).is_err());
    }
}
