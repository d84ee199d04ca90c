//! # Consent Kernel
//!
//! A Consent Authorization Engine: a requester asks a grantor for access to
//! identity documents, the grantor approves it with a permission set and an
//! expiry, and access is enforced until the grant is revoked or expires.
//!
//! ## Overview
//!
//! - **Consent Requests**: a four-state lifecycle (Requested, Granted,
//!   Revoked, Expired) driven only through guarded transitions
//! - **Access checks**: pure decisions with typed deny reasons
//! - **Audit trail**: one entry per applied transition, written with it
//! - **Expiry sweeper**: moves elapsed grants to Expired
//! - **Document registry**: binds content addresses to their owners
//!
//! ## Usage
//!
//! ```rust,no_run
//! use consent_kernel::{ConsentKernel, KernelConfig, CreateInput};
//! use consent_kernel::core::DocumentKind;
//! use consent_kernel::store::SqliteStore;
//!
//! async fn example() -> consent_kernel::Result<()> {
//!     let store = SqliteStore::open("consent.db")?;
//!     let kernel = ConsentKernel::new(store, KernelConfig::default());
//!
//!     let created = kernel
//!         .create(CreateInput {
//!             requester: "R1".into(),
//!             grantor: "G1".into(),
//!             requested_document_kinds: vec![DocumentKind::tag("aadhar")],
//!             reason: "KYC".into(),
//!             proof: None,
//!         })
//!         .await?;
//!     println!("{} is {}", created.request_id, created.status);
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `consent_kernel::core` - types and the state machine
//! - `consent_kernel::access` - access decisions
//! - `consent_kernel::store` - storage abstraction, memory and SQLite

pub mod api;
pub mod config;
pub mod error;
pub mod kernel;
pub mod sweeper;
pub mod verifier;

// Re-export component crates
pub use consent_kernel_access as access;
pub use consent_kernel_core as core;
pub use consent_kernel_store as store;

pub use api::{
    AccessCheckInput, CreateInput, CreateOutput, DocumentInput, GrantInput, RegisterDocumentInput,
    RevokeInput,
};
pub use config::{KernelConfig, SweeperConfig};
pub use error::{ErrorKind, KernelError, Result};
pub use kernel::ConsentKernel;
pub use sweeper::{ExpirySweeper, SweepReport};
pub use verifier::{
    Challenge, Ed25519Verifier, IdentityProof, IdentityVerifier, ProofScope, TrustingVerifier,
    VerifyError,
};

// Re-export commonly used types
pub use consent_kernel_access::{AccessDecision, AccessReason, AccessibleDocument};
pub use consent_kernel_core::{
    AuditAction, AuditEntry, AuditTrail, Capability, Clock, ConsentRequest, DocumentKind,
    DocumentRef, IdentityRef, PartyRole, PermissionSet, RequestId, Status, SystemClock,
};
