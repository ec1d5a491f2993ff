use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable episode identifier, allocated once at creation and never reused.
pub type EpisodeId = i64;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock past the busy timeout
    #[error("The feed database is locked by another process. Please try again.")]
    Locked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// The id is not present in the targeted table
    #[error("Episode {0} not found")]
    NotFound(EpisodeId),

    /// The id already exists in the targeted table
    #[error("Episode {0} already exists")]
    DuplicateKey(EpisodeId),

    /// A stored value could not be mapped back into the domain model
    #[error("Corrupt row for episode {id}: {reason}")]
    CorruptRow { id: EpisodeId, reason: String },

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Classify a sqlx error, separating lock contention from other failures
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5) / SQLITE_LOCKED (6) / SQLITE_CANTOPEN (14)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
            || error_string.contains("unable to open database file")
        {
            return DatabaseError::Locked;
        }

        DatabaseError::Other(err)
    }

    /// Map a unique-constraint violation on insert to `DuplicateKey(id)`
    pub(crate) fn on_insert(err: sqlx::Error, id: EpisodeId) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                DatabaseError::DuplicateKey(id)
            }
            _ => DatabaseError::from_sqlx(err),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Upstream "platform publish succeeded" event, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEpisode {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub enclosure_url: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub duration_seconds: Option<u32>,
    #[serde(default)]
    pub source_audio_file_id: Option<String>,
}

impl NewEpisode {
    pub(crate) fn with_id(self, id: EpisodeId) -> Episode {
        Episode {
            id,
            title: self.title,
            description: self.description,
            enclosure_url: self.enclosure_url,
            published_at: self.published_at,
            duration_seconds: self.duration_seconds,
            source_audio_file_id: self.source_audio_file_id,
        }
    }
}

/// An episode in the live set of a feed.
///
/// Never updated in place: a re-publish creates a new episode with a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: EpisodeId,
    pub title: String,
    pub description: String,
    pub enclosure_url: String,
    pub published_at: DateTime<Utc>,
    pub duration_seconds: Option<u32>,
    /// Weak reference to the originating upload record
    pub source_audio_file_id: Option<String>,
}

/// An evicted episode held in cold storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedEpisode {
    #[serde(flatten)]
    pub episode: Episode,
    pub archived_at: DateTime<Utc>,
}

// ============================================================================
// Row Types
// ============================================================================

/// Internal row shape shared by the live and archive tables.
/// `archived_at` is NULL-selected for live rows.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EpisodeRow {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub enclosure_url: String,
    pub published_at: i64,
    pub duration_seconds: Option<i64>,
    pub source_audio_file_id: Option<String>,
    pub archived_at: Option<i64>,
}

impl EpisodeRow {
    pub(crate) fn into_episode(self) -> Result<Episode, DatabaseError> {
        let id = self.id;
        let duration_seconds = self
            .duration_seconds
            .map(u32::try_from)
            .transpose()
            .map_err(|e| DatabaseError::CorruptRow {
                id,
                reason: format!("duration_seconds out of range: {e}"),
            })?;
        Ok(Episode {
            id,
            title: self.title,
            description: self.description,
            enclosure_url: self.enclosure_url,
            published_at: from_timestamp(id, self.published_at)?,
            duration_seconds,
            source_audio_file_id: self.source_audio_file_id,
        })
    }

    pub(crate) fn into_archived(mut self) -> Result<ArchivedEpisode, DatabaseError> {
        let id = self.id;
        let archived_at = self.archived_at.take().ok_or_else(|| DatabaseError::CorruptRow {
            id,
            reason: "missing archived_at".to_string(),
        })?;
        Ok(ArchivedEpisode {
            episode: self.into_episode()?,
            archived_at: from_timestamp(id, archived_at)?,
        })
    }
}

fn from_timestamp(id: EpisodeId, secs: i64) -> Result<DateTime<Utc>, DatabaseError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| DatabaseError::CorruptRow {
            id,
            reason: format!("timestamp {secs} out of range"),
        })
}
