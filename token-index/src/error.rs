//! Error types for the token index

use crate::types::{OutputRef, PolicyId};
use thiserror::Error;

/// Result type for index operations
pub type Result<T> = std::result::Result<T, Error>;

/// Index errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Binary serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed identifier (hash, policy id, asset name)
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Address could not be decomposed into credentials
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Inline datum is not a well-formed registry node
    #[error("Invalid datum: {0}")]
    InvalidDatum(String),

    /// Request fields are unusable (non-positive quantity, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Key is already present in the registry
    #[error("Token policy {0} already registered")]
    DuplicateKey(PolicyId),

    /// Registry node view violates the sorted-partition invariant
    #[error("Corrupt registry node set: {0}")]
    CorruptNodeSet(String),

    /// The node an insertion plan consumes has already been spent
    #[error("Stale insertion plan: registry node {consumed} is no longer unspent")]
    StalePlan {
        /// Backing record the plan expected to consume
        consumed: OutputRef,
    },

    /// Invariant violation (balance overflow, etc.)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the caller should refresh its view and try again
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StalePlan { .. } | Error::Concurrency(_))
    }

    /// Whether this is a declined request rather than a failure
    pub fn is_rejection(&self) -> bool {
        matches!(self, Error::DuplicateKey(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(err: hex::FromHexError) -> Self {
        Error::InvalidIdentifier(err.to_string())
    }
}
