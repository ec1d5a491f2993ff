//! Retention policy for the live set of each feed.
//!
//! Every mutation of a feed runs under that feed's writer lock and inside a
//! single SQLite transaction: the insert (or restore), any eviction, and the
//! matching archive writes commit together or not at all. Readers outside
//! the lock only ever see committed states, so an episode is never observed
//! both live and archived, or in neither place.

use chrono::{Datelike, SubsecRound, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::error::FeedError;
use crate::config::is_valid_feed_key;
use crate::storage::{self, Database, DatabaseError, Episode, EpisodeId, NewEpisode};

/// Default retention window, matching what podcast directories expect.
pub const DEFAULT_MAX_LIVE_EPISODES: usize = 50;

/// Result of [`FeedEngine::add_episode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    /// The inserted episode with its assigned id
    pub episode: Episode,
    /// Episodes moved to the archive by this call, oldest first
    pub evicted: Vec<Episode>,
}

/// Result of [`FeedEngine::restore_episode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreOutcome {
    /// The episode now back in the live set
    pub episode: Episode,
    /// Episodes moved to the archive to make room
    pub evicted: Vec<Episode>,
}

/// Owns the live/archive partitioning decision for every feed in a database.
///
/// Cheap to clone; clones share the per-feed writer locks.
#[derive(Clone)]
pub struct FeedEngine {
    db: Database,
    capacity: NonZeroUsize,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl FeedEngine {
    pub fn new(db: Database, capacity: NonZeroUsize) -> Self {
        Self {
            db,
            capacity,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Maximum number of live episodes per feed.
    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Live episodes of a feed, newest first.
    pub async fn live_episodes(&self, feed_key: &str) -> Result<Vec<Episode>, FeedError> {
        Ok(self.db.live_episodes(feed_key).await?)
    }

    /// Insert a newly published episode, evicting the oldest live episode
    /// into the archive if the feed goes over capacity.
    ///
    /// The inserted episode is never evicted by its own insertion, even if
    /// its `published_at` is older than everything else in the feed.
    ///
    /// # Errors
    ///
    /// - `InvalidFeedKey` if the key is not usable as a file name
    /// - `InvalidEpisode` if the title or enclosure URL is blank, or
    ///   `published_at` falls outside years 0 to 9999
    /// - `Persistence` if any store write fails; nothing is committed then
    /// - `DuplicateKey` if eviction finds the victim already archived
    pub async fn add_episode(
        &self,
        feed_key: &str,
        new: NewEpisode,
    ) -> Result<AddOutcome, FeedError> {
        let new = validate(feed_key, new)?;

        let _guard = self.lock_feed(feed_key).await;
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let id = storage::allocate_id(&mut tx, feed_key, now).await?;
        let episode = new.with_id(id);
        storage::insert_live(&mut tx, feed_key, &episode).await?;
        let evicted = self.enforce_capacity(&mut tx, feed_key, id).await?;
        storage::touch_feed(&mut tx, feed_key, now).await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        tracing::info!(
            feed = %feed_key,
            episode_id = id,
            title = %episode.title,
            evicted = evicted.len(),
            "Added episode to feed"
        );
        Ok(AddOutcome { episode, evicted })
    }

    /// Move an archived episode back into the live set.
    ///
    /// The restored episode counts as the newest insertion and is protected
    /// from eviction during this call: if the feed is full, the oldest
    /// *other* live episode is archived instead.
    ///
    /// # Errors
    ///
    /// `NotFound` if `id` is not archived in this feed (including when it is
    /// already live). No state changes in that case.
    pub async fn restore_episode(
        &self,
        feed_key: &str,
        id: EpisodeId,
    ) -> Result<RestoreOutcome, FeedError> {
        check_feed_key(feed_key)?;
        let _guard = self.lock_feed(feed_key).await;
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let archived = match storage::remove_archived(&mut tx, feed_key, id).await {
            Ok(archived) => archived,
            Err(DatabaseError::NotFound(id)) => {
                tracing::info!(feed = %feed_key, episode_id = id, "Episode not found in archive");
                return Err(FeedError::NotFound(id));
            }
            Err(e) => return Err(e.into()),
        };
        let episode = archived.episode;
        storage::insert_live(&mut tx, feed_key, &episode).await?;
        let evicted = self.enforce_capacity(&mut tx, feed_key, id).await?;
        storage::touch_feed(&mut tx, feed_key, now).await?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;

        tracing::info!(
            feed = %feed_key,
            episode_id = id,
            evicted = evicted.len(),
            "Restored episode from archive"
        );
        Ok(RestoreOutcome { episode, evicted })
    }

    /// Archive the oldest live episodes (never `protected`) until the feed is
    /// within capacity. One pass evicts at most one episode unless the
    /// capacity was lowered since the last write.
    async fn enforce_capacity(
        &self,
        conn: &mut SqliteConnection,
        feed_key: &str,
        protected: EpisodeId,
    ) -> Result<Vec<Episode>, FeedError> {
        let mut evicted = Vec::new();

        while storage::count_live(conn, feed_key).await? > self.capacity.get() {
            let Some(victim) = storage::oldest_live_except(conn, feed_key, protected).await? else {
                break;
            };

            match storage::archive(conn, feed_key, &victim, Utc::now()).await {
                Ok(_) => {}
                Err(DatabaseError::DuplicateKey(id)) => {
                    tracing::error!(
                        feed = %feed_key,
                        episode_id = id,
                        "Evicted episode already archived; live and archive sets overlap"
                    );
                    return Err(FeedError::DuplicateKey(id));
                }
                Err(e) => return Err(e.into()),
            }
            storage::delete_live(conn, feed_key, victim.id).await?;

            tracing::debug!(
                feed = %feed_key,
                episode_id = victim.id,
                published_at = %victim.published_at,
                "Evicted episode to archive"
            );
            evicted.push(victim);
        }

        Ok(evicted)
    }

    /// Serialize writers per feed. Different feeds proceed independently.
    ///
    /// Also held while the served document is rewritten, so documents are
    /// written in the same order as the mutations they reflect.
    pub(crate) async fn lock_feed(&self, feed_key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(feed_key.to_owned()).or_default())
        };
        lock.lock_owned().await
    }
}

fn check_feed_key(feed_key: &str) -> Result<(), FeedError> {
    if !is_valid_feed_key(feed_key) {
        return Err(FeedError::InvalidFeedKey(feed_key.to_string()));
    }
    Ok(())
}

fn validate(feed_key: &str, mut new: NewEpisode) -> Result<NewEpisode, FeedError> {
    check_feed_key(feed_key)?;
    if new.title.trim().is_empty() {
        return Err(FeedError::InvalidEpisode("title is empty".to_string()));
    }
    if new.enclosure_url.trim().is_empty() {
        return Err(FeedError::InvalidEpisode("enclosure URL is empty".to_string()));
    }
    // Feed dates are RFC 2822, which has four-digit years
    if !(0..=9999).contains(&new.published_at.year()) {
        return Err(FeedError::InvalidEpisode(format!(
            "published_at {} is outside years 0 to 9999",
            new.published_at
        )));
    }
    // Stored with second precision; keep the returned episode identical to
    // what a later read produces.
    new.published_at = new.published_at.trunc_subsecs(0);
    Ok(new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use pretty_assertions::assert_eq;

    async fn engine(capacity: usize) -> FeedEngine {
        let db = Database::open(":memory:").await.unwrap();
        FeedEngine::new(db, NonZeroUsize::new(capacity).unwrap())
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn new_episode(title: &str, published: i64) -> NewEpisode {
        NewEpisode {
            title: title.to_string(),
            description: format!("About {title}"),
            enclosure_url: format!("https://cdn.example.com/{title}.mp3"),
            published_at: at(published),
            duration_seconds: Some(120),
            source_audio_file_id: Some(format!("upload-{title}")),
        }
    }

    fn titles(episodes: &[Episode]) -> Vec<&str> {
        episodes.iter().map(|e| e.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_add_below_capacity_evicts_nothing() {
        let engine = engine(3).await;
        let a = engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        let b = engine.add_episode("main", new_episode("b", 2)).await.unwrap();

        assert!(a.evicted.is_empty());
        assert!(b.evicted.is_empty());
        assert!(b.episode.id > a.episode.id);

        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(titles(&live), vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_add_over_capacity_evicts_oldest() {
        let engine = engine(2).await;
        engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        engine.add_episode("main", new_episode("b", 2)).await.unwrap();
        let c = engine.add_episode("main", new_episode("c", 3)).await.unwrap();

        assert_eq!(titles(&c.evicted), vec!["a"]);
        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(titles(&live), vec!["c", "b"]);

        let archived = engine.database().list_archived("main").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].episode, c.evicted[0]);
    }

    #[tokio::test]
    async fn test_equal_timestamps_evict_earliest_inserted() {
        let engine = engine(2).await;
        engine.add_episode("main", new_episode("first", 5)).await.unwrap();
        engine.add_episode("main", new_episode("second", 5)).await.unwrap();
        let third = engine.add_episode("main", new_episode("third", 5)).await.unwrap();

        assert_eq!(titles(&third.evicted), vec!["first"]);
    }

    #[tokio::test]
    async fn test_backdated_insert_is_kept_and_evicts_next_oldest() {
        let engine = engine(2).await;
        engine.add_episode("main", new_episode("b", 20)).await.unwrap();
        engine.add_episode("main", new_episode("c", 30)).await.unwrap();
        let a = engine.add_episode("main", new_episode("a", 10)).await.unwrap();

        assert_eq!(titles(&a.evicted), vec!["b"]);
        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(titles(&live), vec!["c", "a"]);
    }

    #[tokio::test]
    async fn test_add_rejects_blank_fields() {
        let engine = engine(2).await;

        let mut blank_title = new_episode("x", 1);
        blank_title.title = "   ".to_string();
        let err = engine.add_episode("main", blank_title).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidEpisode(_)));

        let mut blank_url = new_episode("y", 1);
        blank_url.enclosure_url = String::new();
        let err = engine.add_episode("main", blank_url).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidEpisode(_)));

        assert!(engine.live_episodes("main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_add_rejects_unrepresentable_publish_date() {
        let engine = engine(2).await;
        let mut new = new_episode("future", 1);
        new.published_at = Utc.with_ymd_and_hms(10000, 1, 1, 0, 0, 0).unwrap();

        let err = engine.add_episode("main", new).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidEpisode(_)));
        assert!(engine.live_episodes("main").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_feed_key_rejected_without_lock_entry() {
        let engine = engine(2).await;

        let err = engine
            .add_episode("../main", new_episode("a", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::InvalidFeedKey(_)));
        let err = engine.restore_episode("", 1).await.unwrap_err();
        assert!(matches!(err, FeedError::InvalidFeedKey(_)));
        assert_eq!(err.http_status(), 422);

        assert!(engine.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_eviction_rolls_back_insert() {
        let engine = engine(1).await;
        let a = engine.add_episode("main", new_episode("a", 1)).await.unwrap();

        // Put the next eviction victim in the archive already
        let mut conn = engine.database().pool.acquire().await.unwrap();
        storage::archive(&mut conn, "main", &a.episode, at(50)).await.unwrap();
        drop(conn);

        let err = engine
            .add_episode("main", new_episode("b", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, FeedError::DuplicateKey(id) if id == a.episode.id));

        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(live, vec![a.episode.clone()]);
        let archived = engine.database().list_archived("main").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].episode, a.episode);
    }

    #[tokio::test]
    async fn test_add_truncates_subsecond_precision() {
        let engine = engine(2).await;
        let mut new = new_episode("a", 100);
        new.published_at = Utc.timestamp_opt(100, 750_000_000).unwrap();

        let added = engine.add_episode("main", new).await.unwrap();
        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(live[0], added.episode);
        assert_eq!(added.episode.published_at, at(100));
    }

    #[tokio::test]
    async fn test_restore_into_full_feed_keeps_restored_and_evicts_other() {
        let engine = engine(2).await;
        let a = engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        engine.add_episode("main", new_episode("b", 2)).await.unwrap();
        engine.add_episode("main", new_episode("c", 3)).await.unwrap();

        let restored = engine.restore_episode("main", a.episode.id).await.unwrap();
        assert_eq!(restored.episode, a.episode);
        assert_eq!(titles(&restored.evicted), vec!["b"]);

        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(titles(&live), vec!["c", "a"]);

        let archived = engine.database().list_archived("main").await.unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].episode.title, "b");
    }

    #[tokio::test]
    async fn test_restore_with_room_evicts_nothing() {
        let engine = engine(2).await;
        let a = engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        engine.add_episode("main", new_episode("b", 2)).await.unwrap();
        engine.add_episode("main", new_episode("c", 3)).await.unwrap();

        // Lift the window so there is room again
        let roomy = FeedEngine::new(engine.database().clone(), NonZeroUsize::new(5).unwrap());
        let restored = roomy.restore_episode("main", a.episode.id).await.unwrap();
        assert!(restored.evicted.is_empty());
        assert_eq!(roomy.live_episodes("main").await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_restore_missing_is_not_found_and_changes_nothing() {
        let engine = engine(2).await;
        let a = engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        let before = engine.database().last_updated("main").await.unwrap();

        // Live ids are not restorable
        let err = engine.restore_episode("main", a.episode.id).await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(id) if id == a.episode.id));

        let err = engine.restore_episode("main", 9_999).await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(9_999)));

        let live = engine.live_episodes("main").await.unwrap();
        assert_eq!(live, vec![a.episode]);
        assert_eq!(engine.database().last_updated("main").await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_restore_from_other_feed_is_not_found() {
        let engine = engine(1).await;
        let a = engine.add_episode("alpha", new_episode("a", 1)).await.unwrap();
        engine.add_episode("alpha", new_episode("b", 2)).await.unwrap();

        let err = engine.restore_episode("beta", a.episode.id).await.unwrap_err();
        assert!(matches!(err, FeedError::NotFound(_)));
        assert!(engine
            .database()
            .find_archived("alpha", a.episode.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_lowered_capacity_evicts_down_to_window() {
        let wide = engine(4).await;
        for (i, t) in ["a", "b", "c", "d"].iter().enumerate() {
            wide.add_episode("main", new_episode(t, i as i64)).await.unwrap();
        }

        let narrow = FeedEngine::new(wide.database().clone(), NonZeroUsize::new(2).unwrap());
        let e = narrow.add_episode("main", new_episode("e", 10)).await.unwrap();

        assert_eq!(titles(&e.evicted), vec!["a", "b", "c"]);
        let live = narrow.live_episodes("main").await.unwrap();
        assert_eq!(titles(&live), vec!["e", "d"]);
    }

    #[tokio::test]
    async fn test_feeds_have_independent_windows() {
        let engine = engine(1).await;
        engine.add_episode("alpha", new_episode("a", 1)).await.unwrap();
        let b = engine.add_episode("beta", new_episode("b", 2)).await.unwrap();

        assert!(b.evicted.is_empty());
        assert_eq!(engine.live_episodes("alpha").await.unwrap().len(), 1);
        assert_eq!(engine.live_episodes("beta").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mutations_touch_last_updated() {
        let engine = engine(2).await;
        assert!(engine.database().last_updated("main").await.unwrap().is_none());

        engine.add_episode("main", new_episode("a", 1)).await.unwrap();
        assert!(engine.database().last_updated("main").await.unwrap().is_some());
    }
}
