//! Capability checks over a consent request.
//!
//! Every function here is pure: the result depends only on the record
//! fields it reads and the `now` passed in. Nothing is mutated.

use serde::{Deserialize, Serialize};

use consent_kernel_core::{
    Capability, ConsentRequest, ContentAddress, DocumentRef, IdentityRef, PermissionSet,
    RequestId, Status,
};

use crate::decision::{AccessDecision, AccessReason};

/// Decide whether `identity` may exercise `capability` under `record`.
///
/// The grantor always gets [`AccessReason::Owner`]. For anyone else the
/// checks run in order: identity is the requester, status is Granted,
/// `now < expiresAt`, capability is in the permission set.
pub fn check_access(
    record: &ConsentRequest,
    identity: &IdentityRef,
    capability: Capability,
    now: i64,
) -> AccessDecision {
    if *identity == record.grantor {
        return AccessDecision::owner();
    }
    match active_permissions(record, identity, now) {
        Ok(permissions) if permissions.allows(capability) => AccessDecision::allow(),
        Ok(_) => AccessDecision::deny(AccessReason::CapabilityNotGranted),
        Err(reason) => AccessDecision::deny(reason),
    }
}

/// As [`check_access`], additionally requiring that `content_address` is one
/// of the documents the request grants.
pub fn check_document_access(
    record: &ConsentRequest,
    identity: &IdentityRef,
    capability: Capability,
    content_address: &ContentAddress,
    now: i64,
) -> AccessDecision {
    let decision = check_access(record, identity, capability, now);
    if !decision.allowed {
        return decision;
    }
    if shares_document(record, content_address) {
        decision
    } else {
        AccessDecision::deny(AccessReason::DocumentNotShared)
    }
}

/// A document the identity can currently view, with the grant it comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleDocument {
    pub request_id: RequestId,
    pub grantor: IdentityRef,
    pub document: DocumentRef,
    pub permissions: PermissionSet,
    pub expires_at: i64,
}

/// Documents `identity` can view right now across `records`, in record order.
pub fn accessible_documents<'a>(
    records: impl IntoIterator<Item = &'a ConsentRequest>,
    identity: &IdentityRef,
    now: i64,
) -> Vec<AccessibleDocument> {
    let mut out = Vec::new();
    for record in records {
        let Ok(permissions) = active_permissions(record, identity, now) else {
            continue;
        };
        if !permissions.allows(Capability::View) {
            continue;
        }
        let (Some(documents), Some(expires_at)) = (&record.documents, record.expires_at) else {
            continue;
        };
        out.extend(documents.iter().map(|doc| AccessibleDocument {
            request_id: record.request_id,
            grantor: record.grantor.clone(),
            document: doc.clone(),
            permissions,
            expires_at,
        }));
    }
    out
}

fn active_permissions(
    record: &ConsentRequest,
    identity: &IdentityRef,
    now: i64,
) -> Result<PermissionSet, AccessReason> {
    if *identity != record.requester {
        return Err(AccessReason::NotRequester);
    }
    match record.status {
        Status::Requested => return Err(AccessReason::Pending),
        Status::Revoked => return Err(AccessReason::Revoked),
        Status::Expired => return Err(AccessReason::Expired),
        Status::Granted => {}
    }
    match record.expires_at {
        Some(expires_at) if now < expires_at => {}
        _ => return Err(AccessReason::Expired),
    }
    record.permissions.ok_or(AccessReason::Pending)
}

fn shares_document(record: &ConsentRequest, content_address: &ContentAddress) -> bool {
    record
        .documents
        .as_ref()
        .is_some_and(|docs| docs.iter().any(|d| d.content_address == *content_address))
}
