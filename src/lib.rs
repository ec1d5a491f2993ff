//! Bounded podcast RSS feeds with an archive and restore.
//!
//! Each feed keeps at most `max_live_episodes` episodes in its served
//! document. Publishing past that window moves the oldest live episode to an
//! archive, from which it can later be restored.

pub mod config;
pub mod feed;
pub mod storage;
pub mod util;
