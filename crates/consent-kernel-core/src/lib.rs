//! # Consent Kernel Core
//!
//! Pure primitives for the Consent Kernel: consent requests, permission
//! sets, document references, the state machine, and the audit trail.
//!
//! This crate contains no I/O and no storage. Every function here is a
//! deterministic computation over its arguments; time is passed in.
//!
//! ## Key Types
//!
//! - [`ConsentRequest`] - The authorization record
//! - [`Transition`] - A requested mutation (Grant, Revoke, Expire)
//! - [`PermissionSet`] - The four capabilities attached to a grant
//! - [`DocumentRef`] - A content address plus metadata
//! - [`AuditEntry`] - One line of a request's append-only history
//!
//! ## State Machine
//!
//! All mutation goes through [`apply_transition`]. See [`transition`].

pub mod audit;
pub mod clock;
pub mod document;
pub mod error;
pub mod permission;
pub mod request;
pub mod transition;
pub mod types;

pub use audit::{replay_status, AuditAction, AuditEntry, AuditTrail};
pub use clock::{now_millis, Clock, SystemClock};
pub use document::{normalize_media_type, ContentAddress, DocumentPolicy, DocumentRecord, DocumentRef};
pub use error::{AuditError, TransitionError, ValidationError};
pub use permission::{Capability, PermissionSet};
pub use request::{ConsentRequest, DocumentKind, NewConsentRequest, PartyRole, Status};
pub use transition::{apply_transition, Actor, GrantPayload, Transition, TransitionKind, TransitionOutcome};
pub use types::{IdentityRef, RequestId};
