use thiserror::Error;

/// Errors produced by the indexing engine and its stores.
#[derive(Debug, Error)]
pub enum Error {
    /// The single build slot is occupied; the caller should retry later.
    #[error("indexing already in progress")]
    BuildInProgress,

    /// A key (or request id) was not present in the metadata store.
    #[error("key not found: {0}")]
    NotFound(String),

    /// An empty key was passed to the metadata store.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A stored request status could not be parsed as an integer.
    #[error("invalid status value: {0}")]
    InvalidStatus(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("metadata store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("metadata encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("search index error: {0}")]
    Index(#[from] tantivy::TantivyError),
}

pub type Result<T> = std::result::Result<T, Error>;
