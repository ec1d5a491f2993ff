use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{ArchivedEpisode, DatabaseError, Episode, EpisodeId, EpisodeRow};

const ARCHIVE_COLUMNS: &str = "id, title, description, enclosure_url, published_at, \
     duration_seconds, source_audio_file_id, archived_at";

// ============================================================================
// Archive Operations (transactional)
// ============================================================================

/// Move an episode into cold storage.
///
/// # Errors
///
/// `DuplicateKey` if the id is already archived. Under correct engine use
/// this cannot happen, so callers should treat it as a bug signal.
pub(crate) async fn archive(
    conn: &mut SqliteConnection,
    feed_key: &str,
    episode: &Episode,
    archived_at: DateTime<Utc>,
) -> Result<ArchivedEpisode, DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO archived_episodes
            (id, feed_key, title, description, enclosure_url, published_at,
             duration_seconds, source_audio_file_id, archived_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
    "#,
    )
    .bind(episode.id)
    .bind(feed_key)
    .bind(&episode.title)
    .bind(&episode.description)
    .bind(&episode.enclosure_url)
    .bind(episode.published_at.timestamp())
    .bind(episode.duration_seconds.map(i64::from))
    .bind(&episode.source_audio_file_id)
    .bind(archived_at.timestamp())
    .execute(&mut *conn)
    .await
    .map_err(|e| DatabaseError::on_insert(e, episode.id))?;

    Ok(ArchivedEpisode {
        episode: episode.clone(),
        archived_at,
    })
}

/// Delete an archived episode and return it.
///
/// A `DELETE ... RETURNING` is a write, so a restore that starts here takes
/// the write lock before reading anything.
pub(crate) async fn remove(
    conn: &mut SqliteConnection,
    feed_key: &str,
    id: EpisodeId,
) -> Result<ArchivedEpisode, DatabaseError> {
    let sql = format!(
        "DELETE FROM archived_episodes WHERE feed_key = ? AND id = ? RETURNING {ARCHIVE_COLUMNS}"
    );
    // `id` is UNIQUE, so at most one row comes back
    let mut rows = sqlx::query_as::<_, EpisodeRow>(&sql)
        .bind(feed_key)
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

    match rows.pop() {
        Some(row) => row.into_archived(),
        None => Err(DatabaseError::NotFound(id)),
    }
}

/// Number of archived episodes in `feed_key`.
pub(crate) async fn count_archived(
    conn: &mut SqliteConnection,
    feed_key: &str,
) -> Result<usize, DatabaseError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM archived_episodes WHERE feed_key = ?")
        .bind(feed_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    Ok(usize::try_from(row.0).unwrap_or(0))
}

impl Database {
    // ========================================================================
    // Archive Queries
    // ========================================================================

    /// Stream archived episodes of a feed, most recently archived first.
    ///
    /// Rows are fetched lazily as the stream is polled. Calling this again
    /// starts a fresh pass over the archive.
    pub fn archived_episodes<'a>(
        &'a self,
        feed_key: &'a str,
    ) -> BoxStream<'a, Result<ArchivedEpisode, DatabaseError>> {
        const SQL: &str = "SELECT id, title, description, enclosure_url, published_at, \
             duration_seconds, source_audio_file_id, archived_at \
             FROM archived_episodes WHERE feed_key = ? \
             ORDER BY archived_at DESC, seq DESC";

        sqlx::query_as::<_, EpisodeRow>(SQL)
            .bind(feed_key)
            .fetch(&self.pool)
            .map(|row| {
                row.map_err(DatabaseError::from_sqlx)
                    .and_then(EpisodeRow::into_archived)
            })
            .boxed()
    }

    /// Collect [`Database::archived_episodes`] into a `Vec`.
    pub async fn list_archived(
        &self,
        feed_key: &str,
    ) -> Result<Vec<ArchivedEpisode>, DatabaseError> {
        self.archived_episodes(feed_key).try_collect().await
    }

    /// Look up a single archived episode without removing it.
    pub async fn find_archived(
        &self,
        feed_key: &str,
        id: EpisodeId,
    ) -> Result<Option<ArchivedEpisode>, DatabaseError> {
        let sql = format!(
            "SELECT {ARCHIVE_COLUMNS} FROM archived_episodes WHERE feed_key = ? AND id = ?"
        );
        let row = sqlx::query_as::<_, EpisodeRow>(&sql)
            .bind(feed_key)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        row.map(EpisodeRow::into_archived).transpose()
    }
}
