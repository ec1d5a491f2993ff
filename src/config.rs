//! Configuration file parser for ~/.config/castfeed/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
//!
//! ```toml
//! database_path = "/var/lib/castfeed/feed.db"
//! max_live_episodes = 50
//! output_dir = "./public/rss"
//!
//! [channel]
//! title = "My Show"
//! site_url = "https://example.com"
//! feed_url = "https://example.com/rss/main.xml"
//!
//! # Per-feed overrides; unspecified keys fall back to [channel]
//! [feeds.bonus]
//! title = "My Show: Bonus"
//! feed_url = "https://example.com/rss/bonus.xml"
//! ```
use serde::Deserialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::feed::{ChannelMetadata, DEFAULT_MAX_LIVE_EPISODES};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file. Defaults to `feed.db` in the config directory.
    pub database_path: Option<PathBuf>,

    /// Retention window: live episodes kept per feed.
    pub max_live_episodes: usize,

    /// Directory the served `<feed_key>.xml` documents are written to.
    /// Unset means documents are only rendered on demand.
    pub output_dir: Option<PathBuf>,

    /// Channel metadata for feeds without their own table.
    pub channel: ChannelMetadata,

    /// Per-feed channel metadata keyed by feed key.
    pub feeds: HashMap<String, ChannelMetadata>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            max_live_episodes: DEFAULT_MAX_LIVE_EPISODES,
            output_dir: None,
            channel: ChannelMetadata::default(),
            feeds: HashMap::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 5] = [
        "database_path",
        "max_live_episodes",
        "output_dir",
        "channel",
        "feeds",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - `max_live_episodes = 0` → `Err(ConfigError::Invalid)`
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        let config = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            max_live_episodes = config.max_live_episodes,
            feeds = config.feeds.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let mut raw: toml::Table = content.parse()?;
        for key in raw.keys() {
            if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                tracing::warn!(key = %key, "Unknown key in config file, ignoring");
            }
        }

        // [feeds.<key>] tables inherit unspecified keys from [channel]
        if let Some(toml::Value::Table(channel)) = raw.get("channel").cloned() {
            if let Some(toml::Value::Table(feeds)) = raw.get_mut("feeds") {
                for (_, feed) in feeds.iter_mut() {
                    if let toml::Value::Table(feed) = feed {
                        for (key, value) in &channel {
                            if !feed.contains_key(key) {
                                feed.insert(key.clone(), value.clone());
                            }
                        }
                    }
                }
            }
        }

        let config: Config = toml::Value::Table(raw).try_into()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_live_episodes == 0 {
            return Err(ConfigError::Invalid(
                "max_live_episodes must be at least 1".to_string(),
            ));
        }
        if let Some(key) = self.feeds.keys().find(|k| !is_valid_feed_key(k)) {
            return Err(ConfigError::Invalid(format!(
                "feed key {key:?} may only contain letters, digits, '-' and '_'"
            )));
        }
        Ok(())
    }

    /// Retention window as a non-zero count.
    pub fn capacity(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.max_live_episodes).unwrap_or(NonZeroUsize::MIN)
    }

    /// Channel metadata for `feed_key`, falling back to `[channel]`.
    pub fn channel_for(&self, feed_key: &str) -> &ChannelMetadata {
        self.feeds.get(feed_key).unwrap_or(&self.channel)
    }

    /// `<output_dir>/<feed_key>.xml`, or `None` if no output directory is
    /// configured or the key is not safe to use as a file name.
    pub fn feed_output_path(&self, feed_key: &str) -> Option<PathBuf> {
        let dir = self.output_dir.as_ref()?;
        if !is_valid_feed_key(feed_key) {
            tracing::warn!(feed = %feed_key, "Feed key not usable as a file name, skipping write");
            return None;
        }
        Some(dir.join(format!("{feed_key}.xml")))
    }
}

/// Feed keys are used in file names: letters, digits, `-` and `_` only.
pub fn is_valid_feed_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

// ============================================================================
// Tests
// ============================================================================
