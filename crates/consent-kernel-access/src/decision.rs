//! Access decisions and their reasons.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a check came out the way it did.
///
/// The string forms are stable; viewers match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessReason {
    /// Allowed: the identity is the grantor.
    Owner,
    /// Denied: the request has not been granted yet.
    Pending,
    /// Denied: the grant was revoked.
    Revoked,
    /// Denied: the grant window has elapsed.
    Expired,
    /// Denied: the identity is not the requester of this grant.
    NotRequester,
    /// Denied: the grant does not include the capability.
    CapabilityNotGranted,
    /// Denied: the document is not part of the grant.
    DocumentNotShared,
}

impl AccessReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessReason::Owner => "owner",
            AccessReason::Pending => "pending",
            AccessReason::Revoked => "revoked",
            AccessReason::Expired => "expired",
            AccessReason::NotRequester => "not_requester",
            AccessReason::CapabilityNotGranted => "capability_not_granted",
            AccessReason::DocumentNotShared => "document_not_shared",
        }
    }
}

impl fmt::Display for AccessReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an access check: `{allowed, reason?}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccessDecision {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<AccessReason>,
}

impl AccessDecision {
    /// Allowed through an active grant.
    pub const fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    /// Allowed because the identity owns the documents.
    pub const fn owner() -> Self {
        Self {
            allowed: true,
            reason: Some(AccessReason::Owner),
        }
    }

    pub const fn deny(reason: AccessReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}
