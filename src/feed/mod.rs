//! Podcast feed management: retention policy, RSS rendering, caller API.
//!
//! - **Engine**: keeps each feed's live set within its retention window,
//!   archiving the oldest episode on overflow and restoring on demand
//! - **RSS**: renders the live set as an RSS 2.0 podcast document and writes
//!   it atomically
//! - **Service**: the request-shaped operations a route layer exposes
//!
//! # Architecture
//!
//! - [`engine`] - [`FeedEngine`], the only component that moves episodes
//!   between the live set and the archive
//! - [`rss`] - pure rendering via `quick-xml`, plus the atomic file write
//! - [`service`] - [`FeedService`], combining the engine, renderer and config
//!
//! # Example
//!
//! ```ignore
//! use castfeed::feed::{FeedEngine, FeedService};
//!
//! let engine = FeedEngine::new(db, capacity);
//! let service = FeedService::new(engine, config);
//! service.publish("main", new_episode).await?;
//! let stats = service.stats("main").await?;
//! ```

pub mod engine;
mod error;
pub mod rss;
pub mod service;

pub use engine::{AddOutcome, FeedEngine, RestoreOutcome, DEFAULT_MAX_LIVE_EPISODES};
pub use error::FeedError;
pub use rss::{render_and_write, render_feed, write_feed, ChannelMetadata};
pub use service::{FeedInfo, FeedService, FeedStats, PublishResponse, Regenerated, RestoreResponse};
