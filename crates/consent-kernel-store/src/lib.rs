//! # Consent Kernel Store
//!
//! The Consent Store: single source of truth for consent requests, their
//! audit trails, and the document registry.
//!
//! ## Key Types
//!
//! - [`Store`] - The async trait every backend implements
//! - [`SqliteStore`] - SQLite-based persistent storage, optimistic CAS
//! - [`MemoryStore`] - In-memory storage with per-request locks
//!
//! ## Usage
//!
//! ```rust,no_run
//! use consent_kernel_core::{DocumentKind, IdentityRef, NewConsentRequest, now_millis};
//! use consent_kernel_store::{SqliteStore, Store};
//!
//! async fn example() -> consent_kernel_store::Result<()> {
//!     let store = SqliteStore::open("consent.db")?;
//!     let new = NewConsentRequest {
//!         requester: IdentityRef::parse("R1").unwrap(),
//!         grantor: IdentityRef::parse("G1").unwrap(),
//!         requested_document_kinds: vec![DocumentKind::tag("aadhar")],
//!         reason: "KYC".into(),
//!     };
//!     let record = store.create(new, now_millis()).await?;
//!     assert_eq!(store.audit_trail(&record.request_id).await?.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **One mutation entry point**: `transition` runs the core state machine
//!   and persists the record plus its audit entry atomically
//! - **Serialization unit is one request id**: different ids never block
//!   each other
//! - **Idempotent expiry**: `Expire` on a terminal record returns
//!   `Unchanged` and writes nothing

pub mod config;
pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use config::StoreConfig;
pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Store, StoreExt};
