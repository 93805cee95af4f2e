use thiserror::Error;

/// Errors surfaced by load operations
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Missing required owner identifier")]
    MissingOwner,
}

/// Errors raised by a cache backing store
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Backing store failure: {0}")]
    Backend(String),

    #[error("Failed to serialize cache entry: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type LoadResult<T> = Result<T, LoadError>;
