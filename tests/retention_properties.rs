//! Property-based tests for the retention window.
//!
//! Random sequences of publishes and restores must never leave a feed over
//! capacity, lose an episode, or hold an episode in both the live set and
//! the archive.

use chrono::{TimeZone, Utc};
use castfeed::feed::FeedEngine;
use castfeed::storage::{Database, EpisodeId, NewEpisode};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashSet;
use std::num::NonZeroUsize;

#[derive(Debug, Clone)]
enum Op {
    /// Publish with this published_at offset
    Publish(i64),
    /// Restore the archived episode at this index (modulo archive size)
    Restore(usize),
}

fn arbitrary_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0i64..20).prop_map(Op::Publish),
        1 => any::<usize>().prop_map(Op::Restore),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// Property: live ∪ archive is every published id, disjointly, and the
    /// live set never exceeds capacity
    #[test]
    fn window_invariants_hold(
        capacity in 1usize..5,
        ops in prop::collection::vec(arbitrary_op(), 1..25)
    ) {
        runtime().block_on(async {
            let db = Database::open(":memory:").await.unwrap();
            let engine = FeedEngine::new(db, NonZeroUsize::new(capacity).unwrap());
            let mut published: HashSet<EpisodeId> = HashSet::new();

            for (n, op) in ops.iter().enumerate() {
                match op {
                    Op::Publish(offset) => {
                        let added = engine
                            .add_episode("main", NewEpisode {
                                title: format!("ep{n}"),
                                description: String::new(),
                                enclosure_url: format!("https://x/{n}.mp3"),
                                published_at: Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap(),
                                duration_seconds: None,
                                source_audio_file_id: None,
                            })
                            .await
                            .unwrap();
                        prop_assert!(added.evicted.iter().all(|e| e.id != added.episode.id));
                        published.insert(added.episode.id);
                    }
                    Op::Restore(index) => {
                        let archived = engine.database().list_archived("main").await.unwrap();
                        if archived.is_empty() {
                            continue;
                        }
                        let id = archived[index % archived.len()].episode.id;
                        let restored = engine.restore_episode("main", id).await.unwrap();
                        prop_assert_eq!(restored.episode.id, id);
                        prop_assert!(engine.database().is_live("main", id).await.unwrap());
                    }
                }

                let live = engine.live_episodes("main").await.unwrap();
                prop_assert!(live.len() <= capacity);
                prop_assert!(
                    live.windows(2).all(|w| w[0].published_at >= w[1].published_at),
                    "live set not newest first"
                );

                let live_ids: HashSet<_> = live.iter().map(|e| e.id).collect();
                let archived_ids: HashSet<_> = engine
                    .database()
                    .list_archived("main")
                    .await
                    .unwrap()
                    .into_iter()
                    .map(|a| a.episode.id)
                    .collect();
                prop_assert!(live_ids.is_disjoint(&archived_ids));
                let all: HashSet<_> = live_ids.union(&archived_ids).copied().collect();
                prop_assert_eq!(&all, &published);
                prop_assert_eq!(live.len(), published.len().min(capacity));
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
