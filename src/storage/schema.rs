use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::DatabaseError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations
    ///
    /// `":memory:"` opens a private in-memory database held by a single pooled
    /// connection, so every query observes the same data.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseError::Locked` if the file is held by another writer
    /// past the busy timeout, `DatabaseError::Migration` if the schema could
    /// not be created, and `DatabaseError::Other` for other database errors.
    pub async fn open(path: &str) -> Result<Self, DatabaseError> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        // busy_timeout=5000: concurrent writers to different feeds wait for
        // the file lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(DatabaseError::from_sqlx)?
            .pragma("busy_timeout", "5000")
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
        pool_options = if in_memory {
            // Each in-memory connection is its own database; never recycle it.
            pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(5)
        };

        let pool = pool_options
            .connect_with(options)
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let db = Self { pool };
        db.migrate().await.map_err(|e| match DatabaseError::from_sqlx(e) {
            DatabaseError::Locked => DatabaseError::Locked,
            other => DatabaseError::Migration(other.to_string()),
        })?;
        tracing::debug!(path = %path, "Opened feed database");
        Ok(db)
    }

    /// Run database migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Id sequence shared by live and archived episodes. AUTOINCREMENT
        // guarantees ids are never reused even after rows are deleted.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episode_ids (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_key TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Live set. `seq` records insertion order into the live set and
        // breaks ties between equal published_at values.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS episodes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL UNIQUE,
                feed_key TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                enclosure_url TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                duration_seconds INTEGER,
                source_audio_file_id TEXT
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_episodes_feed_published ON episodes(feed_key, published_at, seq)",
        )
        .execute(&mut *tx)
        .await?;

        // Archive. Unbounded cold storage keyed by episode id.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS archived_episodes (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id INTEGER NOT NULL UNIQUE,
                feed_key TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                enclosure_url TEXT NOT NULL,
                published_at INTEGER NOT NULL,
                duration_seconds INTEGER,
                source_audio_file_id TEXT,
                archived_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_archived_feed_time ON archived_episodes(feed_key, archived_at DESC, seq DESC)",
        )
        .execute(&mut *tx)
        .await?;

        // Per-feed bookkeeping for the feed info view
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_state (
                feed_key TEXT PRIMARY KEY,
                last_updated INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_creates_tables() {
        let db = Database::open(":memory:").await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&db.pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();

        assert_eq!(
            names,
            vec!["archived_episodes", "episode_ids", "episodes", "feed_state"]
        );
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_file_database_persists_across_reopen() {
        let dir = std::env::temp_dir().join("castfeed_schema_test_reopen");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("feed.db");
        let _ = std::fs::remove_file(&path);
        let path_str = path.to_str().unwrap();

        {
            let db = Database::open(path_str).await.unwrap();
            sqlx::query("INSERT INTO feed_state (feed_key, last_updated) VALUES ('a', 1)")
                .execute(&db.pool)
                .await
                .unwrap();
            db.pool.close().await;
        }

        let db = Database::open(path_str).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT last_updated FROM feed_state WHERE feed_key = 'a'")
            .fetch_one(&db.pool)
            .await
            .unwrap();
        assert_eq!(row.0, 1);

        db.pool.close().await;
        std::fs::remove_dir_all(&dir).ok();
    }
}
