//! Error types for flowstore

use std::io;

/// Result type alias for flowstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for entry store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error (local table file or remote socket)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Table or value could not be encoded or decoded as JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected RESP frame
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Error reply sent by the remote service
    #[error("remote error: {0}")]
    Remote(String),

    /// Remote service could not be reached
    #[error("cannot connect to {addr}: {source}")]
    Connection {
        /// Address that was dialed
        addr: String,
        /// Underlying socket error
        #[source]
        source: io::Error,
    },

    /// Store is closed
    #[error("store is closed")]
    Closed,
}
