//! Error types for the Consent Kernel Core.

use thiserror::Error;

use crate::request::Status;
use crate::transition::TransitionKind;

/// Malformed input. The caller's fault; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("requested document kinds must not be empty")]
    NoDocumentKinds,

    #[error("invalid document kind: {0}")]
    InvalidDocumentKind(String),

    #[error("invalid reason: {0}")]
    InvalidReason(String),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("permission set grants no capability")]
    EmptyPermissions,

    #[error("grant must include at least one document")]
    NoDocuments,

    #[error("grant lists {count} documents, maximum is {max}")]
    TooManyDocuments { count: usize, max: usize },

    #[error("document {0} is listed more than once")]
    DuplicateDocument(String),

    #[error("invalid content address: {0}")]
    InvalidContentAddress(String),

    #[error("invalid document name: {0}")]
    InvalidDocumentName(String),

    #[error("media type {0} is not allowed")]
    MediaTypeNotAllowed(String),

    #[error("invalid media type: {0}")]
    InvalidMediaType(String),

    #[error("invalid document size {size}: must be between 1 and {max} bytes")]
    InvalidDocumentSize { size: u64, max: u64 },

    #[error("document {0} is not registered")]
    UnregisteredDocument(String),

    #[error("expiry {expires_at} is not after {now}")]
    ExpiryNotInFuture { expires_at: i64, now: i64 },
}

/// A rejected state transition. State is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// The actor may not perform this transition on this request.
    #[error("{actor} may not {attempted} this request")]
    Forbidden {
        actor: String,
        attempted: TransitionKind,
    },

    /// The state guard failed.
    #[error("cannot {attempted} a request in state {from}")]
    InvalidTransition {
        from: Status,
        attempted: TransitionKind,
    },

    /// The transition payload is malformed.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// An audit trail that cannot be replayed to a status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditError {
    #[error("audit trail is empty")]
    EmptyTrail,

    #[error("audit trail does not start with a created entry")]
    MissingCreated,

    #[error("audit trail mixes entries of {expected} and {found}")]
    ForeignEntry { expected: String, found: String },

    #[error("audit trail records {action} while in state {from}")]
    IllegalStep { from: Status, action: String },
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, ValidationError>;
