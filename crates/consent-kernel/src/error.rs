//! Error types for the engine.
//!
//! Every failure maps onto one [`ErrorKind`]. Clients decide whether to
//! retry from the kind alone.

use consent_kernel_core::{RequestId, Status, TransitionError, TransitionKind, ValidationError};
use consent_kernel_store::StoreError;
use thiserror::Error;

/// The error taxonomy exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input. Never retried.
    Validation,
    /// The caller may not do this. Never retried.
    Forbidden,
    /// The state guard failed. Re-fetch before deciding anything.
    InvalidTransition,
    NotFound,
    /// Lost a concurrent-write race. Safe to retry immediately.
    Conflict,
    /// Store failure. Retry with backoff.
    Unavailable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Unavailable => "unavailable",
        }
    }
}

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Malformed input.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Caller identity lacks rights for the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// State guard failed.
    #[error("cannot {attempted} a request in state {from}")]
    InvalidTransition {
        from: Status,
        attempted: TransitionKind,
    },

    /// Unknown request id.
    #[error("consent request not found: {0}")]
    NotFound(RequestId),

    /// Concurrent writes kept winning.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Storage failure.
    #[error("store unavailable: {0}")]
    Unavailable(#[source] StoreError),
}

impl KernelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            KernelError::Validation(_) => ErrorKind::Validation,
            KernelError::Forbidden(_) => ErrorKind::Forbidden,
            KernelError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            KernelError::NotFound(_) => ErrorKind::NotFound,
            KernelError::Conflict(_) => ErrorKind::Conflict,
            KernelError::Unavailable(_) => ErrorKind::Unavailable,
        }
    }

    /// Only conflicts and store failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Unavailable)
    }
}

impl From<TransitionError> for KernelError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::Forbidden { actor, attempted } => {
                KernelError::Forbidden(format!("{actor} may not {attempted} this request"))
            }
            TransitionError::InvalidTransition { from, attempted } => {
                KernelError::InvalidTransition { from, attempted }
            }
            TransitionError::Validation(e) => KernelError::Validation(e),
        }
    }
}

impl From<StoreError> for KernelError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(e) => e.into(),
            StoreError::NotFound(id) => KernelError::NotFound(id),
            StoreError::Conflict(id) => {
                KernelError::Conflict(format!("concurrent writes to {id} kept conflicting"))
            }
            StoreError::DocumentOwned {
                content_address,
                owner,
            } => KernelError::Forbidden(format!(
                "document {content_address} is registered to {owner}"
            )),
            other => KernelError::Unavailable(other),
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, KernelError>;
