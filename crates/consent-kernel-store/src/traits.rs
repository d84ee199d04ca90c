//! Store trait: the single source of truth for consent requests.
//!
//! This trait keeps the engine storage-agnostic. Implementations include
//! SQLite (primary) and in-memory (for tests and single-process use).

use async_trait::async_trait;
use consent_kernel_core::{
    Actor, AuditEntry, ConsentRequest, ContentAddress, DocumentRecord, DocumentRef, IdentityRef,
    NewConsentRequest, PartyRole, RequestId, Status, Transition, TransitionOutcome,
};

use crate::error::{Result, StoreError};

/// The Store trait: async interface for consent persistence.
///
/// # Contract
///
/// - **Single mutation entry point**: records change only through
///   [`transition`](Store::transition), which runs
///   [`apply_transition`](consent_kernel_core::apply_transition) and persists
///   the result atomically per request id.
/// - **Linearized per id**: two transitions on the same id never interleave
///   between guard and write. Transitions on different ids do not block each
///   other.
/// - **Audit in the same write**: every applied transition appends its audit
///   entry in the same atomic unit as the record update.
/// - **Consistent reads**: reads may lag in-flight writes but never observe
///   a half-applied transition.
#[async_trait]
pub trait Store: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Consent Requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist a new Requested record with a fresh, unique id and append its
    /// `created` audit entry. The input is assumed validated.
    async fn create(&self, new: NewConsentRequest, now: i64) -> Result<ConsentRequest>;

    /// Get a request by id.
    async fn get(&self, id: &RequestId) -> Result<Option<ConsentRequest>>;

    /// Apply a transition atomically.
    ///
    /// # Returns
    /// - `Applied` if the record moved (audit entry appended).
    /// - `Unchanged` for idempotent no-ops (nothing written).
    /// - `Err(NotFound)` for an unknown id.
    /// - `Err(Rejected)` when a guard fails; state is untouched.
    async fn transition(
        &self,
        id: &RequestId,
        transition: &Transition,
        actor: &Actor,
        now: i64,
    ) -> Result<TransitionOutcome>;

    /// Requests where `identity` plays `role`, ordered by `created_at`.
    async fn list_by_party(
        &self,
        identity: &IdentityRef,
        role: PartyRole,
    ) -> Result<Vec<ConsentRequest>>;

    /// Requests in `status`, ordered by `created_at`.
    async fn list_by_status(&self, status: Status) -> Result<Vec<ConsentRequest>>;

    /// Audit entries of a request in append order. Empty for unknown ids.
    async fn audit_trail(&self, id: &RequestId) -> Result<Vec<AuditEntry>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Document Registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register `document` to `owner`.
    ///
    /// Re-registering by the same owner returns the existing record.
    /// A different owner gets [`StoreError::DocumentOwned`].
    async fn register_document(
        &self,
        owner: &IdentityRef,
        document: &DocumentRef,
        now: i64,
    ) -> Result<DocumentRecord>;

    /// Documents registered to `owner`, newest first.
    async fn documents_of(&self, owner: &IdentityRef) -> Result<Vec<DocumentRecord>>;

    /// The owner of a content address, if registered.
    async fn document_owner(&self, content_address: &ContentAddress)
        -> Result<Option<IdentityRef>>;
}

/// Extension trait for common store patterns.
pub trait StoreExt: Store {
    /// Get a request, mapping a missing id to [`StoreError::NotFound`].
    fn get_required(
        &self,
        id: &RequestId,
    ) -> impl std::future::Future<Output = Result<ConsentRequest>> + Send;

    /// Granted requests whose `expires_at` has been reached at `now`.
    fn due_for_expiry(
        &self,
        now: i64,
    ) -> impl std::future::Future<Output = Result<Vec<ConsentRequest>>> + Send;
}

impl<S: Store + ?Sized> StoreExt for S {
    async fn get_required(&self, id: &RequestId) -> Result<ConsentRequest> {
        self.get(id).await?.ok_or(StoreError::NotFound(*id))
    }

    async fn due_for_expiry(&self, now: i64) -> Result<Vec<ConsentRequest>> {
        let granted = self.list_by_status(Status::Granted).await?;
        Ok(granted
            .into_iter()
            .filter(|r| r.is_due_for_expiry(now))
            .collect())
    }
}
