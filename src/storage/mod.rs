mod archive;
mod episodes;
mod schema;
mod stats;
mod types;

pub(crate) use archive::{archive, remove as remove_archived};
pub(crate) use episodes::{
    allocate_id, count_live, delete_live, insert_live, oldest_live_except, touch_feed,
};
pub use schema::Database;
pub use stats::FeedCounts;
pub use types::{ArchivedEpisode, DatabaseError, Episode, EpisodeId, NewEpisode};
