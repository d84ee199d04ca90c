//! Consent requests: the authorization record and its lifecycle fields.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::document::DocumentRef;
use crate::error::ValidationError;
use crate::permission::PermissionSet;
use crate::types::{IdentityRef, RequestId};

/// Longest accepted reason text.
pub const MAX_REASON_LEN: usize = 2000;

/// Longest accepted document kind tag or caption.
pub const MAX_KIND_LEN: usize = 64;

/// Lifecycle state of a consent request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Requested,
    Granted,
    Revoked,
    Expired,
}

impl Status {
    /// Revoked and Expired admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Revoked | Status::Expired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Requested => "Requested",
            Status::Granted => "Granted",
            Status::Revoked => "Revoked",
            Status::Expired => "Expired",
        }
    }

    /// Storage code.
    pub fn to_u8(self) -> u8 {
        match self {
            Status::Requested => 0,
            Status::Granted => 1,
            Status::Revoked => 2,
            Status::Expired => 3,
        }
    }

    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0 => Some(Status::Requested),
            1 => Some(Status::Granted),
            2 => Some(Status::Revoked),
            3 => Some(Status::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category of document being asked for.
///
/// Serialized as a bare string for tags and `{"other": caption}` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "KindRepr", into = "KindRepr")]
pub enum DocumentKind {
    /// A free-form tag such as `aadhar` or `pan`.
    Tag(String),
    /// Anything else, described by a caption.
    Other(String),
}

impl DocumentKind {
    pub fn tag(tag: impl Into<String>) -> Self {
        DocumentKind::Tag(tag.into())
    }

    pub fn other(caption: impl Into<String>) -> Self {
        DocumentKind::Other(caption.into())
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let (label, text) = match self {
            DocumentKind::Tag(t) => ("tag", t),
            DocumentKind::Other(c) => ("caption", c),
        };
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::InvalidDocumentKind(format!("{label} is empty")));
        }
        if text.chars().count() > MAX_KIND_LEN {
            return Err(ValidationError::InvalidDocumentKind(format!(
                "{label} exceeds {MAX_KIND_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KindRepr {
    Tag(String),
    Other { other: String },
}

impl From<KindRepr> for DocumentKind {
    fn from(repr: KindRepr) -> Self {
        match repr {
            KindRepr::Tag(t) => DocumentKind::Tag(t),
            KindRepr::Other { other } => DocumentKind::Other(other),
        }
    }
}

impl From<DocumentKind> for KindRepr {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Tag(t) => KindRepr::Tag(t),
            DocumentKind::Other(other) => KindRepr::Other { other },
        }
    }
}

impl From<&str> for DocumentKind {
    fn from(s: &str) -> Self {
        DocumentKind::Tag(s.to_string())
    }
}

/// Input for creating a consent request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConsentRequest {
    pub requester: IdentityRef,
    pub grantor: IdentityRef,
    pub requested_document_kinds: Vec<DocumentKind>,
    pub reason: String,
}

impl NewConsentRequest {
    /// Check the creation payload. Self-consent is accepted.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.requested_document_kinds.is_empty() {
            return Err(ValidationError::NoDocumentKinds);
        }
        for kind in &self.requested_document_kinds {
            kind.validate()?;
        }

        let reason = self.reason.trim();
        if reason.is_empty() {
            return Err(ValidationError::InvalidReason("reason is empty".into()));
        }
        if reason.chars().count() > MAX_REASON_LEN {
            return Err(ValidationError::InvalidReason(format!(
                "reason exceeds {MAX_REASON_LEN} characters"
            )));
        }
        Ok(())
    }

    /// Build the initial Requested record.
    pub fn into_request(self, request_id: RequestId, now: i64) -> ConsentRequest {
        ConsentRequest {
            request_id,
            requester: self.requester,
            grantor: self.grantor,
            requested_document_kinds: self.requested_document_kinds,
            reason: self.reason,
            status: Status::Requested,
            permissions: None,
            documents: None,
            granted_at: None,
            expires_at: None,
            revoked_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// The authorization record.
///
/// Fields are public for reading; the only way to change a stored record is
/// a transition through [`apply_transition`](crate::transition::apply_transition).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub request_id: RequestId,
    pub requester: IdentityRef,
    pub grantor: IdentityRef,
    pub requested_document_kinds: Vec<DocumentKind>,
    pub reason: String,
    pub status: Status,
    pub permissions: Option<PermissionSet>,
    pub documents: Option<Vec<DocumentRef>>,
    pub granted_at: Option<i64>,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ConsentRequest {
    /// Whether `identity` is a party to this request in `role`.
    pub fn has_party(&self, identity: &IdentityRef, role: PartyRole) -> bool {
        match role {
            PartyRole::Requester => &self.requester == identity,
            PartyRole::Grantor => &self.grantor == identity,
        }
    }

    /// Whether a Granted request has reached its expiry at `now`.
    pub fn is_due_for_expiry(&self, now: i64) -> bool {
        self.status == Status::Granted && self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Check the record-level invariants. Stores call this before
    /// persisting so no reader can observe a malformed record.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.permissions.is_some() != self.documents.is_some() {
            return Err("permissions and documents must be set together".into());
        }
        if let (Some(granted), Some(expires)) = (self.granted_at, self.expires_at) {
            if expires <= granted {
                return Err("expiresAt must be after grantedAt".into());
            }
        }
        match self.status {
            Status::Requested => {
                if self.permissions.is_some()
                    || self.granted_at.is_some()
                    || self.revoked_at.is_some()
                {
                    return Err("Requested record carries transition fields".into());
                }
            }
            Status::Granted | Status::Expired => {
                if self.granted_at.is_none() || self.expires_at.is_none() {
                    return Err(format!("{} record lacks grant timestamps", self.status));
                }
                if self.documents.as_ref().map_or(true, Vec::is_empty) {
                    return Err(format!("{} record lacks documents", self.status));
                }
                if self.revoked_at.is_some() {
                    return Err(format!("{} record carries revokedAt", self.status));
                }
            }
            Status::Revoked => {
                if self.revoked_at.is_none() {
                    return Err("Revoked record lacks revokedAt".into());
                }
            }
        }
        if self.updated_at < self.created_at {
            return Err("updatedAt precedes createdAt".into());
        }
        Ok(())
    }
}

/// Which side of a request an identity is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRole {
    Requester,
    Grantor,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_request() -> NewConsentRequest {
        NewConsentRequest {
            requester: IdentityRef::parse("R1").unwrap(),
            grantor: IdentityRef::parse("G1").unwrap(),
            requested_document_kinds: vec![DocumentKind::tag("aadhar")],
            reason: "KYC".into(),
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(new_request().validate().is_ok());
    }

    #[test]
    fn test_self_consent_is_legal() {
        let mut req = new_request();
        req.grantor = req.requester.clone();
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_empty_kinds_rejected() {
        let mut req = new_request();
        req.requested_document_kinds.clear();
        assert_eq!(req.validate(), Err(ValidationError::NoDocumentKinds));
    }

    #[test]
    fn test_other_requires_caption() {
        let mut req = new_request();
        req.requested_document_kinds.push(DocumentKind::other("  "));
        assert!(matches!(
            req.validate(),
            Err(ValidationError::InvalidDocumentKind(_))
        ));
    }

    #[test]
    fn test_blank_reason_rejected() {
        let mut req = new_request();
        req.reason = "   ".into();
        assert!(matches!(req.validate(), Err(ValidationError::InvalidReason(_))));
    }

    #[test]
    fn test_initial_record() {
        let id = RequestId::from_bytes([1; 16]);
        let record = new_request().into_request(id, 1_000);
        assert_eq!(record.status, Status::Requested);
        assert_eq!(record.created_at, 1_000);
        assert_eq!(record.updated_at, 1_000);
        assert!(record.permissions.is_none() && record.documents.is_none());
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn test_status_json_is_capitalized() {
        let json = serde_json::to_string(&Status::Requested).unwrap();
        assert_eq!(json, "\"Requested\"");
    }

    #[test]
    fn test_document_kind_json() {
        let kinds = vec![DocumentKind::tag("aadhar"), DocumentKind::other("rent agreement")];
        let json = serde_json::to_value(&kinds).unwrap();
        assert_eq!(json, serde_json::json!(["aadhar", {"other": "rent agreement"}]));
        let back: Vec<DocumentKind> = serde_json::from_value(json).unwrap();
        assert_eq!(back, kinds);
    }

    #[test]
    fn test_status_codes() {
        for status in [Status::Requested, Status::Granted, Status::Revoked, Status::Expired] {
            assert_eq!(Status::from_u8(status.to_u8()), Some(status));
        }
        assert_eq!(Status::from_u8(9), None);
    }
}
