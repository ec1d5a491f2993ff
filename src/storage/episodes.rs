use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use super::schema::Database;
use super::types::{DatabaseError, Episode, EpisodeId, EpisodeRow};

/// Column list shared by every live-episode SELECT
const LIVE_COLUMNS: &str = "id, title, description, enclosure_url, published_at, \
     duration_seconds, source_audio_file_id, NULL AS archived_at";

// ============================================================================
// Live Episode Operations (transactional)
// ============================================================================

/// Allocate a fresh episode id from the shared sequence.
///
/// This is a write, so calling it first in a transaction takes the SQLite
/// write lock up front.
pub(crate) async fn allocate_id(
    conn: &mut SqliteConnection,
    feed_key: &str,
    now: DateTime<Utc>,
) -> Result<EpisodeId, DatabaseError> {
    let row: (i64,) =
        sqlx::query_as("INSERT INTO episode_ids (feed_key, created_at) VALUES (?, ?) RETURNING id")
            .bind(feed_key)
            .bind(now.timestamp())
            .fetch_one(&mut *conn)
            .await
            .map_err(DatabaseError::from_sqlx)?;
    Ok(row.0)
}

/// Insert an episode into the live set of `feed_key`.
///
/// The row receives the next insertion sequence number, so a re-inserted
/// (restored) episode counts as the most recently inserted one.
pub(crate) async fn insert_live(
    conn: &mut SqliteConnection,
    feed_key: &str,
    episode: &Episode,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO episodes
            (id, feed_key, title, description, enclosure_url, published_at,
             duration_seconds, source_audio_file_id)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
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
    .execute(&mut *conn)
    .await
    .map_err(|e| DatabaseError::on_insert(e, episode.id))?;
    Ok(())
}

/// Delete a live episode. `NotFound` if it is not live in `feed_key`.
pub(crate) async fn delete_live(
    conn: &mut SqliteConnection,
    feed_key: &str,
    id: EpisodeId,
) -> Result<(), DatabaseError> {
    let result = sqlx::query("DELETE FROM episodes WHERE feed_key = ? AND id = ?")
        .bind(feed_key)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFound(id));
    }
    Ok(())
}

/// Number of live episodes in `feed_key`.
pub(crate) async fn count_live(
    conn: &mut SqliteConnection,
    feed_key: &str,
) -> Result<usize, DatabaseError> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM episodes WHERE feed_key = ?")
        .bind(feed_key)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    Ok(usize::try_from(row.0).unwrap_or(0))
}

/// The eviction candidate: smallest `published_at`, ties broken by earliest
/// insertion, never the `protected` episode.
pub(crate) async fn oldest_live_except(
    conn: &mut SqliteConnection,
    feed_key: &str,
    protected: EpisodeId,
) -> Result<Option<Episode>, DatabaseError> {
    let sql = format!(
        "SELECT {LIVE_COLUMNS} FROM episodes WHERE feed_key = ? AND id != ? \
         ORDER BY published_at ASC, seq ASC LIMIT 1"
    );
    let row = sqlx::query_as::<_, EpisodeRow>(&sql)
        .bind(feed_key)
        .bind(protected)
        .fetch_optional(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
    row.map(EpisodeRow::into_episode).transpose()
}

/// Record that `feed_key` was mutated at `now`.
pub(crate) async fn touch_feed(
    conn: &mut SqliteConnection,
    feed_key: &str,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    sqlx::query(
        r#"
        INSERT INTO feed_state (feed_key, last_updated) VALUES (?, ?)
        ON CONFLICT(feed_key) DO UPDATE SET last_updated = excluded.last_updated
    "#,
    )
    .bind(feed_key)
    .bind(now.timestamp())
    .execute(&mut *conn)
    .await
    .map_err(DatabaseError::from_sqlx)?;
    Ok(())
}

impl Database {
    // ========================================================================
    // Live Episode Queries
    // ========================================================================

    /// Live episodes of a feed, newest first. Equal timestamps keep insertion
    /// order (earliest inserted first).
    pub async fn live_episodes(&self, feed_key: &str) -> Result<Vec<Episode>, DatabaseError> {
        let sql = format!(
            "SELECT {LIVE_COLUMNS} FROM episodes WHERE feed_key = ? \
             ORDER BY published_at DESC, seq ASC"
        );
        let rows = sqlx::query_as::<_, EpisodeRow>(&sql)
            .bind(feed_key)
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        rows.into_iter().map(EpisodeRow::into_episode).collect()
    }

    /// Whether `id` is currently live in `feed_key`.
    pub async fn is_live(&self, feed_key: &str, id: EpisodeId) -> Result<bool, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT 1 FROM episodes WHERE feed_key = ? AND id = ?")
                .bind(feed_key)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.is_some())
    }

    /// Last mutation time of a feed, `None` if it was never mutated.
    pub async fn last_updated(
        &self,
        feed_key: &str,
    ) -> Result<Option<DateTime<Utc>>, DatabaseError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_updated FROM feed_state WHERE feed_key = ?")
                .bind(feed_key)
                .fetch_optional(&self.pool)
                .await
                .map_err(DatabaseError::from_sqlx)?;
        Ok(row.and_then(|(secs,)| DateTime::from_timestamp(secs, 0)))
    }
}
