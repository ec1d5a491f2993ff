//! Caller-facing operations over the engine and renderer.
//!
//! Each method corresponds to one request a route layer would expose and
//! returns a serde-serializable response body. Errors carry their HTTP
//! status equivalent via [`FeedError::http_status`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::engine::FeedEngine;
use super::error::FeedError;
use super::rss::{render_and_write, ChannelMetadata};
use crate::config::Config;
use crate::storage::{ArchivedEpisode, Episode, EpisodeId, NewEpisode};

/// `GET` feed info
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedInfo {
    pub feed_url: String,
    /// Number of episodes currently in the served feed
    pub total_episodes: usize,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Feed regeneration result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Regenerated {
    pub feed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// `POST` restore result
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub success: bool,
    pub episode: Episode,
    pub evicted: Vec<EpisodeId>,
}

/// `GET` feed statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedStats {
    pub live_count: usize,
    pub archived_count: usize,
    pub capacity: usize,
    pub total_episodes: usize,
    pub oldest_live: Option<DateTime<Utc>>,
    pub newest_live: Option<DateTime<Utc>>,
}

/// Result of a completed platform publish reaching the feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishResponse {
    pub episode: Episode,
    pub evicted: Vec<EpisodeId>,
    pub feed_url: String,
    /// False if the episode was stored but the served document could not
    /// be rewritten; the previous document is still being served.
    pub regenerated: bool,
}

/// Feed operations for every tenant in one database.
#[derive(Clone)]
pub struct FeedService {
    engine: FeedEngine,
    config: Config,
}

impl FeedService {
    pub fn new(engine: FeedEngine, config: Config) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &FeedEngine {
        &self.engine
    }

    /// Channel metadata for a feed: its `[feeds.<key>]` table, else `[channel]`.
    pub fn channel(&self, feed_key: &str) -> &ChannelMetadata {
        self.config.channel_for(feed_key)
    }

    /// Where the served document for `feed_key` is written, if anywhere.
    pub fn output_path(&self, feed_key: &str) -> Option<PathBuf> {
        self.config.feed_output_path(feed_key)
    }

    pub fn feed_url(&self, feed_key: &str) -> &str {
        self.channel(feed_key).feed_url()
    }

    pub async fn feed_info(&self, feed_key: &str) -> Result<FeedInfo, FeedError> {
        let counts = self.engine.database().feed_counts(feed_key).await?;
        Ok(FeedInfo {
            feed_url: self.feed_url(feed_key).to_string(),
            total_episodes: counts.live,
            last_updated: counts.last_updated,
        })
    }

    /// Render the current live set and replace the served document.
    pub async fn regenerate(&self, feed_key: &str) -> Result<Regenerated, FeedError> {
        let path = self.output_path(feed_key);
        self.render(feed_key, Utc::now(), path.as_deref()).await?;
        Ok(Regenerated {
            feed_url: self.feed_url(feed_key).to_string(),
            path,
        })
    }

    /// Render the current live set. Writes to `output` when given.
    ///
    /// A write holds the feed's writer lock from the read to the rename, so
    /// the last document written reflects the last committed mutation.
    pub async fn render(
        &self,
        feed_key: &str,
        generated_at: DateTime<Utc>,
        output: Option<&Path>,
    ) -> Result<String, FeedError> {
        let _guard = match output {
            Some(_) => Some(self.engine.lock_feed(feed_key).await),
            None => None,
        };
        let episodes = self.engine.live_episodes(feed_key).await?;
        render_and_write(self.channel(feed_key), &episodes, generated_at, output)
    }

    pub async fn archived(&self, feed_key: &str) -> Result<Vec<ArchivedEpisode>, FeedError> {
        Ok(self.engine.database().list_archived(feed_key).await?)
    }

    pub async fn restore(
        &self,
        feed_key: &str,
        id: EpisodeId,
    ) -> Result<RestoreResponse, FeedError> {
        let outcome = self.engine.restore_episode(feed_key, id).await?;
        self.regenerate_best_effort(feed_key).await;
        Ok(RestoreResponse {
            success: true,
            episode: outcome.episode,
            evicted: outcome.evicted.iter().map(|e| e.id).collect(),
        })
    }

    pub async fn stats(&self, feed_key: &str) -> Result<FeedStats, FeedError> {
        let counts = self.engine.database().feed_counts(feed_key).await?;
        Ok(FeedStats {
            live_count: counts.live,
            archived_count: counts.archived,
            capacity: self.engine.capacity(),
            total_episodes: counts.live + counts.archived,
            oldest_live: counts.oldest_live,
            newest_live: counts.newest_live,
        })
    }

    /// Record a completed platform publish in the feed.
    ///
    /// A failure to store the episode is returned as an error and logged:
    /// the upstream publish already succeeded, so losing it silently would
    /// leave the feed out of sync.
    pub async fn publish(
        &self,
        feed_key: &str,
        new: NewEpisode,
    ) -> Result<PublishResponse, FeedError> {
        let title = new.title.clone();
        let outcome = match self.engine.add_episode(feed_key, new).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    feed = %feed_key,
                    title = %title,
                    error = %e,
                    "Published episode could not be added to feed"
                );
                return Err(e);
            }
        };
        let regenerated = self.regenerate_best_effort(feed_key).await;

        Ok(PublishResponse {
            episode: outcome.episode,
            evicted: outcome.evicted.iter().map(|e| e.id).collect(),
            feed_url: self.feed_url(feed_key).to_string(),
            regenerated,
        })
    }

    /// Rewrite the served document after a mutation. The mutation is already
    /// committed, so a render failure is logged rather than returned.
    async fn regenerate_best_effort(&self, feed_key: &str) -> bool {
        if self.output_path(feed_key).is_none() {
            return false;
        }
        match self.regenerate(feed_key).await {
            Ok(_) => true,
            Err(e) => {
                tracing::error!(
                    feed = %feed_key,
                    error = %e,
                    "Feed document not regenerated; previous document still served"
                );
                false
            }
        }
    }
}
