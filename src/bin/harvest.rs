#![forbid(unsafe_code)]

//! Command-line front end: harvest a channel, look at what is stored and run
//! the reporting queries.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;
use yt_harvest::{
    YouTubeClient,
    config::{Settings, SettingsOverrides, resolve_settings},
    harvest::Harvester,
    pipeline::{Pipeline, RunReport},
    report::{ChannelSnapshot, QueryResult, ReportQuery},
    store::HarvestStore,
};

#[derive(Debug, Parser)]
#[command(name = "harvest", version, about = "Harvest YouTube channel metadata into SQLite")]
struct Cli {
    /// SQLite database file (defaults to HARVEST_DB_PATH or harvest.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Data API key (defaults to YOUTUBE_API_KEY).
    #[arg(long, global = true)]
    api_key: Option<String>,
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,
    /// API tuning file (defaults to HARVEST_CONFIG or harvest.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Replace everything stored for a channel with a fresh harvest.
    Harvest {
        channel_id: String,
        /// Print the run report as JSON instead of tables.
        #[arg(long)]
        json: bool,
    },
    /// Print the stored rows of a channel.
    Show { channel_id: String },
    /// Exit successfully only if the channel is stored.
    Exists { channel_id: String },
    /// Run one of the fixed reports.
    Report {
        #[arg(required_unless_present = "list")]
        name: Option<String>,
        #[arg(long)]
        list: bool,
    },
    /// Run an ad-hoc SQL query.
    Query { sql: String },
    /// Create the database schema.
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let settings = resolve_settings(SettingsOverrides {
        api_key: cli.api_key,
        db_path: cli.db,
        env_path: cli.env_file,
        config_path: cli.config,
    })?;

    match cli.command {
        Command::Harvest { channel_id, json } => harvest(&settings, &channel_id, json).await,
        Command::Show { channel_id } => show(&settings, &channel_id).await,
        Command::Exists { channel_id } => exists(&settings, &channel_id).await,
        Command::Report { name, list } => report(&settings, name.as_deref(), list).await,
        Command::Query { sql } => query(&settings, &sql).await,
        Command::Init => {
            HarvestStore::open(&settings.db_path).await?;
            println!("Initialized {}", settings.db_path.display());
            Ok(())
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(settings: &Settings) -> Result<HarvestStore> {
    HarvestStore::open(&settings.db_path)
        .await
        .context("initializing harvest database")
}

async fn harvest(settings: &Settings, channel_id: &str, json: bool) -> Result<()> {
    let api_key = settings.require_api_key()?;

    // Probe on a short-lived connection; the pipeline opens its own.
    if open_store(settings).await?.channel_exists(channel_id).await? {
        warn!(channel_id, "channel already stored; its rows will be replaced");
    }

    let client = YouTubeClient::new(api_key, &settings.tuning);
    let harvester = Harvester::new(client, settings.tuning.page_sizes());
    let pipeline = Pipeline::new(harvester, settings.db_path.clone());
    let report = pipeline.run(channel_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_run(&report);
    }

    if let Some(failure) = &report.failure {
        bail!("harvest of {channel_id} failed: {failure}");
    }
    Ok(())
}

fn print_run(report: &RunReport) {
    println!("Channel: {}", report.channel_id);
    println!(
        "Harvested {} playlist(s), {} video(s), {} comment(s)",
        report.harvested.playlists, report.harvested.videos, report.harvested.comments
    );
    for skipped in &report.skipped_comments {
        println!("  Skipped comments of {}: {:?}", skipped.video_id, skipped.reason);
    }
    if let Some(snapshot) = &report.snapshot {
        println!();
        print_snapshot(snapshot);
    }
}

fn print_snapshot(snapshot: &ChannelSnapshot) {
    print_section("Channel Information", &snapshot.channel);
    print_section("Playlists", &snapshot.playlists);
    print_section("Videos", &snapshot.videos);
    print_section("Comments", &snapshot.comments);
}

fn print_section(title: &str, rows: &QueryResult) {
    println!("== {title} ({} row(s)) ==", rows.len());
    if rows.is_empty() {
        println!("(no rows)");
    } else {
        print!("{}", rows.render_table());
    }
    println!();
}

async fn show(settings: &Settings, channel_id: &str) -> Result<()> {
    let store = open_store(settings).await?;
    if !store.channel_exists(channel_id).await? {
        bail!("channel {channel_id} is not stored; harvest it first");
    }
    print_snapshot(&store.channel_snapshot(channel_id).await?);
    Ok(())
}

async fn exists(settings: &Settings, channel_id: &str) -> Result<()> {
    if open_store(settings).await?.channel_exists(channel_id).await? {
        println!("{channel_id} is stored");
        Ok(())
    } else {
        bail!("{channel_id} is not stored")
    }
}

async fn report(settings: &Settings, name: Option<&str>, list: bool) -> Result<()> {
    if list {
        for query in ReportQuery::ALL {
            println!("{:<24} {}", query.name(), query.title());
        }
        return Ok(());
    }

    let name = name.context("report name required (see --list)")?;
    let query = ReportQuery::from_name(name)
        .with_context(|| format!("unknown report `{name}` (see --list)"))?;
    let rows = open_store(settings).await?.run_report(query).await?;
    if rows.is_empty() {
        println!("No data found for this query.");
    } else {
        print_section(query.title(), &rows);
    }
    Ok(())
}

async fn query(settings: &Settings, sql: &str) -> Result<()> {
    let rows = open_store(settings).await?.query(sql).await?;
    if rows.is_empty() {
        println!("No data found for this query.");
    } else {
        print!("{}", rows.render_table());
    }
    Ok(())
}
