//! Error types for the store module.

use thiserror::Error;

use consent_kernel_core::{IdentityRef, RequestId, TransitionError};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Blob encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// No request with this id.
    #[error("consent request not found: {0}")]
    NotFound(RequestId),

    /// The state machine rejected the transition. State is unchanged.
    #[error(transparent)]
    Rejected(#[from] TransitionError),

    /// Optimistic concurrency lost too many races in a row.
    #[error("concurrent writes to {0} kept conflicting")]
    Conflict(RequestId),

    /// The content address is registered to someone else.
    #[error("document {content_address} is registered to {owner}")]
    DocumentOwned {
        content_address: String,
        owner: IdentityRef,
    },

    /// The backend cannot serve requests (poisoned lock, failed worker).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Invalid data in storage.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn poisoned(what: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(format!("lock poisoned: {what}"))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
