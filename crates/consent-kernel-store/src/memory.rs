//! In-memory implementation of the Store trait.
//!
//! Same semantics as SQLite, no persistence. Each request lives in its own
//! mutex slot together with its audit trail, so a transition locks exactly
//! one request and writes the record and its audit entry as one unit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use tracing::debug;

use consent_kernel_core::{
    apply_transition, Actor, AuditEntry, ConsentRequest, ContentAddress, DocumentRecord,
    DocumentRef, IdentityRef, NewConsentRequest, PartyRole, RequestId, Status, Transition,
    TransitionOutcome,
};

use crate::error::{Result, StoreError};
use crate::traits::Store;

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. The outer `RwLock` guards
/// the index and is held only long enough to find a slot; the per-request
/// `Mutex` serializes transitions on that request.
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Request slots indexed by id.
    requests: HashMap<RequestId, Arc<Mutex<Slot>>>,

    /// Ids in creation order.
    order: Vec<RequestId>,

    /// Document registry indexed by content address.
    documents: HashMap<ContentAddress, DocumentRecord>,

    /// Content addresses in registration order.
    document_order: Vec<ContentAddress>,
}

struct Slot {
    record: ConsentRequest,
    audit: Vec<AuditEntry>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner::default()),
        }
    }

    /// Number of stored requests.
    pub fn len(&self) -> Result<usize> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.order.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    fn slot(&self, id: &RequestId) -> Result<Option<Arc<Mutex<Slot>>>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.requests.get(id).cloned())
    }

    /// Snapshot every record in creation order that passes `keep`.
    fn scan(&self, keep: impl Fn(&ConsentRequest) -> bool) -> Result<Vec<ConsentRequest>> {
        let slots: Vec<_> = {
            let inner = self.inner.read().map_err(StoreError::poisoned)?;
            inner
                .order
                .iter()
                .filter_map(|id| inner.requests.get(id).cloned())
                .collect()
        };

        let mut out = Vec::new();
        for slot in slots {
            let slot = slot.lock().map_err(StoreError::poisoned)?;
            if keep(&slot.record) {
                out.push(slot.record.clone());
            }
        }
        // Creation order already follows created_at except across clock
        // jumps; the stable sort keeps insertion order for ties.
        out.sort_by_key(|r| r.created_at);
        Ok(out)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create(&self, new: NewConsentRequest, now: i64) -> Result<ConsentRequest> {
        let actor = Actor::Party(new.requester.clone());
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;

        let mut request_id = RequestId::generate();
        while inner.requests.contains_key(&request_id) {
            request_id = RequestId::generate();
        }

        let record = new.into_request(request_id, now);
        let entry = AuditEntry::created(request_id, actor, now);
        inner.requests.insert(
            request_id,
            Arc::new(Mutex::new(Slot {
                record: record.clone(),
                audit: vec![entry],
            })),
        );
        inner.order.push(request_id);

        Ok(record)
    }

    async fn get(&self, id: &RequestId) -> Result<Option<ConsentRequest>> {
        let Some(slot) = self.slot(id)? else {
            return Ok(None);
        };
        let slot = slot.lock().map_err(StoreError::poisoned)?;
        Ok(Some(slot.record.clone()))
    }

    async fn transition(
        &self,
        id: &RequestId,
        transition: &Transition,
        actor: &Actor,
        now: i64,
    ) -> Result<TransitionOutcome> {
        let slot = self.slot(id)?.ok_or(StoreError::NotFound(*id))?;
        let mut slot = slot.lock().map_err(StoreError::poisoned)?;

        let outcome = apply_transition(&slot.record, transition, actor, now)?;
        if let TransitionOutcome::Applied { record, entry } = &outcome {
            record
                .check_invariants()
                .map_err(StoreError::InvalidData)?;
            slot.record = record.clone();
            slot.audit.push(entry.clone());
            debug!(request_id = %id, status = %record.status, "memory store applied transition");
        }
        Ok(outcome)
    }

    async fn list_by_party(
        &self,
        identity: &IdentityRef,
        role: PartyRole,
    ) -> Result<Vec<ConsentRequest>> {
        self.scan(|r| r.has_party(identity, role))
    }

    async fn list_by_status(&self, status: Status) -> Result<Vec<ConsentRequest>> {
        self.scan(|r| r.status == status)
    }

    async fn audit_trail(&self, id: &RequestId) -> Result<Vec<AuditEntry>> {
        let Some(slot) = self.slot(id)? else {
            return Ok(Vec::new());
        };
        let slot = slot.lock().map_err(StoreError::poisoned)?;
        Ok(slot.audit.clone())
    }

    async fn register_document(
        &self,
        owner: &IdentityRef,
        document: &DocumentRef,
        now: i64,
    ) -> Result<DocumentRecord> {
        let mut inner = self.inner.write().map_err(StoreError::poisoned)?;

        if let Some(existing) = inner.documents.get(&document.content_address) {
            if existing.owner == *owner {
                return Ok(existing.clone());
            }
            return Err(StoreError::DocumentOwned {
                content_address: document.content_address.to_string(),
                owner: existing.owner.clone(),
            });
        }

        let record = DocumentRecord {
            owner: owner.clone(),
            document: document.clone(),
            registered_at: now,
        };
        inner
            .documents
            .insert(document.content_address.clone(), record.clone());
        inner.document_order.push(document.content_address.clone());
        Ok(record)
    }

    async fn documents_of(&self, owner: &IdentityRef) -> Result<Vec<DocumentRecord>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        let mut docs: Vec<DocumentRecord> = inner
            .document_order
            .iter()
            .rev()
            .filter_map(|addr| inner.documents.get(addr))
            .filter(|d| d.owner == *owner)
            .cloned()
            .collect();
        // Newest first; reverse registration order breaks ties.
        docs.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(docs)
    }

    async fn document_owner(
        &self,
        content_address: &ContentAddress,
    ) -> Result<Option<IdentityRef>> {
        let inner = self.inner.read().map_err(StoreError::poisoned)?;
        Ok(inner.documents.get(content_address).map(|d| d.owner.clone()))
    }
}
