use thiserror::Error;

use crate::storage::{DatabaseError, EpisodeId};

/// Errors surfaced by the feed engine, renderer and service.
///
/// The core never retries; callers decide whether a failure is worth
/// retrying. [`FeedError::http_status`] gives the response class a route
/// layer should use.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The store was unreachable or a write failed.
    #[error("Feed persistence failed: {0}")]
    Persistence(#[source] DatabaseError),

    /// The episode id is not where the operation expected it.
    #[error("Episode {0} not found in archive")]
    NotFound(EpisodeId),

    /// The id already exists in the target store. Indicates an engine bug.
    #[error("Episode {0} already exists in target store")]
    DuplicateKey(EpisodeId),

    /// Feed keys name output files, so only `[A-Za-z0-9_-]` is accepted.
    #[error("Invalid feed key {0:?}")]
    InvalidFeedKey(String),

    /// Episode data rejected before touching the store.
    #[error("Invalid episode: {0}")]
    InvalidEpisode(String),

    /// Episode or channel data cannot be rendered as a valid feed.
    #[error("Cannot render feed: {0}")]
    Serialization(String),

    /// Writing the rendered document failed.
    #[error("Failed to write feed document: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DatabaseError> for FeedError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(id) => FeedError::NotFound(id),
            DatabaseError::DuplicateKey(id) => FeedError::DuplicateKey(id),
            other => FeedError::Persistence(other),
        }
    }
}

impl From<quick_xml::Error> for FeedError {
    fn from(err: quick_xml::Error) -> Self {
        FeedError::Serialization(err.to_string())
    }
}

impl FeedError {
    /// HTTP status equivalent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            FeedError::NotFound(_) => 404,
            FeedError::DuplicateKey(_) => 409,
            FeedError::InvalidFeedKey(_)
            | FeedError::InvalidEpisode(_)
            | FeedError::Serialization(_) => 422,
            FeedError::Persistence(DatabaseError::Locked) => 503,
            FeedError::Persistence(_) | FeedError::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_not_found_maps_to_not_found() {
        let err = FeedError::from(DatabaseError::NotFound(3));
        assert!(matches!(err, FeedError::NotFound(3)));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn test_database_duplicate_maps_to_duplicate() {
        let err = FeedError::from(DatabaseError::DuplicateKey(9));
        assert!(matches!(err, FeedError::DuplicateKey(9)));
        assert_eq!(err.http_status(), 409);
    }

    #[test]
    fn test_other_database_errors_are_persistence() {
        let err = FeedError::from(DatabaseError::Migration("disk full".to_string()));
        assert!(matches!(err, FeedError::Persistence(_)));
        assert_eq!(err.http_status(), 500);
        assert!(err.to_string().contains("disk full"));

        assert_eq!(FeedError::from(DatabaseError::Locked).http_status(), 503);
    }
}
