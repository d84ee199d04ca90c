//! # Consent Kernel Access
//!
//! The single source of truth a viewer consults before rendering a document
//! or enabling an action on it.
//!
//! A requester may exercise a capability iff the request is `Granted`, the
//! grant has not reached `expiresAt`, and the capability is in the grant's
//! [`PermissionSet`](consent_kernel_core::PermissionSet). Grantors are never
//! gated. Denials carry a typed [`AccessReason`]; nothing here returns an
//! error or touches state.
//!
//! Enforcing a denied screenshot or download at the OS level is the
//! viewer's job. This crate only answers the question.

pub mod check;
pub mod decision;

pub use check::{accessible_documents, check_access, check_document_access, AccessibleDocument};
pub use decision::{AccessDecision, AccessReason};
