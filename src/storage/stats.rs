use chrono::{DateTime, Utc};
use serde::Serialize;

use super::archive::count_archived;
use super::episodes::count_live;
use super::schema::Database;
use super::types::DatabaseError;

/// Counts and bounds of a feed, read from one consistent snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedCounts {
    pub live: usize,
    pub archived: usize,
    pub oldest_live: Option<DateTime<Utc>>,
    pub newest_live: Option<DateTime<Utc>>,
    /// Last mutation time, `None` if the feed was never mutated
    pub last_updated: Option<DateTime<Utc>>,
}

impl Database {
    /// Live and archive counts taken inside a single read transaction, so an
    /// in-flight eviction is never observed half-applied.
    pub async fn feed_counts(&self, feed_key: &str) -> Result<FeedCounts, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let live = count_live(&mut tx, feed_key).await?;
        let archived = count_archived(&mut tx, feed_key).await?;
        let bounds: (Option<i64>, Option<i64>) = sqlx::query_as(
            "SELECT MIN(published_at), MAX(published_at) FROM episodes WHERE feed_key = ?",
        )
        .bind(feed_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let last_updated: Option<(i64,)> =
            sqlx::query_as("SELECT last_updated FROM feed_state WHERE feed_key = ?")
                .bind(feed_key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        Ok(FeedCounts {
            live,
            archived,
            oldest_live: bounds.0.and_then(|s| DateTime::from_timestamp(s, 0)),
            newest_live: bounds.1.and_then(|s| DateTime::from_timestamp(s, 0)),
            last_updated: last_updated.and_then(|(s,)| DateTime::from_timestamp(s, 0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{archive, insert_live, touch_feed, Episode};
    use chrono::TimeZone;

    fn episode(id: i64, published: i64) -> Episode {
        Episode {
            id,
            title: format!("Episode {id}"),
            description: String::new(),
            enclosure_url: format!("https://cdn.example.com/{id}.mp3"),
            published_at: Utc.timestamp_opt(published, 0).unwrap(),
            duration_seconds: None,
            source_audio_file_id: None,
        }
    }

    #[tokio::test]
    async fn test_empty_feed_counts() {
        let db = Database::open(":memory:").await.unwrap();
        let counts = db.feed_counts("main").await.unwrap();
        assert_eq!(counts.live, 0);
        assert_eq!(counts.archived, 0);
        assert!(counts.oldest_live.is_none());
        assert!(counts.last_updated.is_none());
    }

    #[tokio::test]
    async fn test_counts_and_last_updated_from_one_snapshot() {
        let db = Database::open(":memory:").await.unwrap();
        let touched = Utc.timestamp_opt(5_000, 0).unwrap();
        {
            let mut conn = db.pool.acquire().await.unwrap();
            insert_live(&mut conn, "main", &episode(1, 100)).await.unwrap();
            insert_live(&mut conn, "main", &episode(2, 300)).await.unwrap();
            archive(&mut conn, "main", &episode(3, 50), touched).await.unwrap();
            touch_feed(&mut conn, "main", touched).await.unwrap();
            insert_live(&mut conn, "other", &episode(4, 900)).await.unwrap();
        }

        let counts = db.feed_counts("main").await.unwrap();
        assert_eq!(counts.live, 2);
        assert_eq!(counts.archived, 1);
        assert_eq!(counts.oldest_live, Some(Utc.timestamp_opt(100, 0).unwrap()));
        assert_eq!(counts.newest_live, Some(Utc.timestamp_opt(300, 0).unwrap()));
        assert_eq!(counts.last_updated, Some(touched));
        assert_eq!(counts.last_updated, db.last_updated("main").await.unwrap());
    }
}
