//! Error types for cacheflow

/// Boxed error produced by a caller-supplied computation
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for cacheflow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by [`CacheFlow`](crate::CacheFlow)
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed configuration or call policy; nothing was recorded or written
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Mutation requested for a key that was never cached
    #[error("no cached data for '{0}'")]
    NotFound(String),

    /// The entry store failed
    #[error("backend error: {0}")]
    Backend(#[from] flowstore::Error),

    /// The producer failed; its error is passed through as is
    #[error(transparent)]
    Producer(BoxError),

    /// A value could not be converted to or from its stored JSON form
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// The producer's own error, if that is what failed
    pub fn into_producer_error(self) -> Option<BoxError> {
        match self {
            Error::Producer(err) => Some(err),
            _ => None,
        }
    }
}
