//! Boundary request and response shapes.
//!
//! Transport-agnostic: these serialize to the camelCase JSON a REST or RPC
//! layer would carry. Identity and content-address fields arrive as plain
//! strings and are parsed by the engine, so a malformed one surfaces as a
//! validation error rather than a decode failure.

use serde::{Deserialize, Serialize};

use consent_kernel_core::{
    normalize_media_type, Capability, ContentAddress, DocumentKind, DocumentRef,
    PermissionSet, RequestId, Status, ValidationError,
};

use crate::verifier::IdentityProof;

/// Create: `{requester, grantor, requestedDocumentKinds[], reason}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInput {
    pub requester: String,
    pub grantor: String,
    pub requested_document_kinds: Vec<DocumentKind>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<IdentityProof>,
}

/// Create result: `{requestId, status: "Requested"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOutput {
    pub request_id: RequestId,
    pub status: Status,
}

/// One document named in a Grant or a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentInput {
    pub content_address: String,
    pub name: String,
    pub media_type: String,
    pub size: u64,
}

impl DocumentInput {
    /// Parse into a [`DocumentRef`], lowercasing the media type. Policy
    /// checks happen separately.
    pub fn parse(&self) -> Result<DocumentRef, ValidationError> {
        Ok(DocumentRef::new(
            ContentAddress::parse(self.content_address.clone())?,
            self.name.trim(),
            normalize_media_type(&self.media_type)?,
            self.size,
        ))
    }
}

impl From<&DocumentRef> for DocumentInput {
    fn from(doc: &DocumentRef) -> Self {
        Self {
            content_address: doc.content_address.to_string(),
            name: doc.name.clone(),
            media_type: doc.media_type.clone(),
            size: doc.size,
        }
    }
}

/// Grant: `{requestId, grantor, permissions, documents[], expiresAt}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantInput {
    pub request_id: RequestId,
    pub grantor: String,
    pub permissions: PermissionSet,
    pub documents: Vec<DocumentInput>,
    /// Unix ms.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<IdentityProof>,
}

/// Revoke: `{requestId, actorIdentity}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeInput {
    pub request_id: RequestId,
    pub actor_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<IdentityProof>,
}

/// Access check: `{requestId, identity, capability}`, optionally scoped to
/// one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessCheckInput {
    pub request_id: RequestId,
    pub identity: String,
    pub capability: Capability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<IdentityProof>,
}

/// Register a document to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterDocumentInput {
    pub owner: String,
    pub document: DocumentInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<IdentityProof>,
}
