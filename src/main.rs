use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use serde::Serialize;
use std::path::PathBuf;

use castfeed::config::{is_valid_feed_key, Config};
use castfeed::feed::{FeedEngine, FeedError, FeedService};
use castfeed::storage::{Database, DatabaseError, EpisodeId, NewEpisode};

/// Get the config directory path (~/.config/castfeed/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("castfeed"))
}

#[derive(Parser, Debug)]
#[command(name = "castfeed", about = "Bounded podcast RSS feeds with archive and restore")]
struct Args {
    /// Config file (default: ~/.config/castfeed/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Feed key to operate on
    #[arg(long, global = true, default_value = "default")]
    feed: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Add a published episode to the feed
    Publish {
        #[arg(long)]
        title: String,
        /// Absolute URL, or a path relative to the channel site URL
        #[arg(long)]
        enclosure_url: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Duration in seconds
        #[arg(long)]
        duration: Option<u32>,
        /// RFC 3339 timestamp (default: now)
        #[arg(long, value_parser = parse_timestamp)]
        published_at: Option<DateTime<Utc>>,
        /// Upstream audio file id
        #[arg(long)]
        source_id: Option<String>,
    },
    /// Move an archived episode back into the feed
    Restore { id: EpisodeId },
    /// List live episodes, newest first
    Live,
    /// List archived episodes, most recently archived first (JSON lines)
    Archive,
    /// Live/archive counts and retention window
    Stats,
    /// Feed URL, live episode count and last update time
    Info,
    /// Render the feed document
    Render {
        /// Print the document instead of writing it to the output directory
        #[arg(long)]
        stdout: bool,
    },
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if !is_valid_feed_key(&args.feed) {
        anyhow::bail!(
            "Invalid feed key {:?}: use letters, digits, '-' and '_' only",
            args.feed
        );
    }

    let config_dir = get_config_dir()?;
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| config_dir.join("config.toml"));
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => {
            std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
            config_dir.join("castfeed.db")
        }
    };
    let db_path_str = db_path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in database path"))?;
    let db = match Database::open(db_path_str).await {
        Ok(db) => db,
        Err(DatabaseError::Locked) => {
            eprintln!("Error: The feed database is busy. Please try again.");
            std::process::exit(1);
        }
        Err(e) => return Err(anyhow::anyhow!("Failed to open database: {}", e)),
    };

    let engine = FeedEngine::new(db, config.capacity());
    let service = FeedService::new(engine, config);

    if let Err(e) = run(&service, &args.feed, args.command).await {
        match e.downcast_ref::<FeedError>() {
            Some(feed_err) => {
                eprintln!("Error ({}): {}", feed_err.http_status(), feed_err);
                std::process::exit(1);
            }
            None => return Err(e),
        }
    }
    Ok(())
}

async fn run(service: &FeedService, feed: &str, command: Command) -> Result<()> {
    match command {
        Command::Publish {
            title,
            enclosure_url,
            description,
            duration,
            published_at,
            source_id,
        } => {
            let new = NewEpisode {
                title,
                description,
                enclosure_url,
                published_at: published_at.unwrap_or_else(Utc::now),
                duration_seconds: duration,
                source_audio_file_id: source_id,
            };
            print_json(&service.publish(feed, new).await?)?;
        }
        Command::Restore { id } => {
            print_json(&service.restore(feed, id).await?)?;
        }
        Command::Live => {
            print_json(&service.engine().live_episodes(feed).await?)?;
        }
        Command::Archive => {
            let db = service.engine().database();
            let mut archived = db.archived_episodes(feed);
            while let Some(episode) = archived.try_next().await.map_err(FeedError::from)? {
                println!("{}", serde_json::to_string(&episode)?);
            }
        }
        Command::Stats => {
            print_json(&service.stats(feed).await?)?;
        }
        Command::Info => {
            print_json(&service.feed_info(feed).await?)?;
        }
        Command::Render { stdout } => {
            if stdout || service.output_path(feed).is_none() {
                let xml = service.render(feed, Utc::now(), None).await?;
                print!("{xml}");
            } else {
                print_json(&service.regenerate(feed).await?)?;
            }
        }
    }
    Ok(())
}
