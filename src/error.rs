//! Error types for sqlite-tsdb

use thiserror::Error;

/// Result type alias for sqlite-tsdb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for sqlite-tsdb
#[derive(Error, Debug)]
pub enum Error {
    /// Segment storage errors (SQLite, schema, compaction)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Remote archive errors
    #[error("Archive error: {0}")]
    Archive(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation attempted on a component that was already shut down
    #[error("{0} is closed")]
    Closed(&'static str),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error("Error: {0}")]
    Other(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        Error::Archive(e.to_string())
    }
}

impl From<object_store::path::Error> for Error {
    fn from(e: object_store::path::Error) -> Self {
        Error::Archive(e.to_string())
    }
}
