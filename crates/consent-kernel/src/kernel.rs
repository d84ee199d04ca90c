//! The engine: the boundary operations every client channel goes through.
//!
//! Web sessions, chat-bots and the sweeper all call the same methods here.
//! No client computes status on its own.

use std::sync::Arc;

use tracing::{debug, info, warn};

use consent_kernel_access::{self as access, AccessDecision, AccessibleDocument};
use consent_kernel_core::{
    apply_transition, Actor, AuditTrail, Clock, ConsentRequest, ContentAddress, DocumentRecord,
    DocumentRef, GrantPayload, IdentityRef, NewConsentRequest, PartyRole, RequestId, Status,
    SystemClock, Transition, TransitionError, TransitionOutcome, ValidationError,
};
use consent_kernel_store::{Store, StoreExt};

use crate::api::{
    AccessCheckInput, CreateInput, CreateOutput, DocumentInput, GrantInput, RegisterDocumentInput,
    RevokeInput,
};
use crate::config::KernelConfig;
use crate::error::{KernelError, Result};
use crate::verifier::{
    Challenge, IdentityProof, IdentityVerifier, ProofScope, ReplayGuard, TrustingVerifier,
    VerifyError,
};

/// The Consent Authorization Engine.
///
/// Wraps a [`Store`] with input validation, identity verification, the
/// document policy and registry checks, and logging.
pub struct ConsentKernel<S: Store> {
    /// The storage backend.
    store: Arc<S>,
    /// Source of `now` for every transition and access check.
    clock: Arc<dyn Clock>,
    verifier: Arc<dyn IdentityVerifier>,
    /// Proof freshness and spent nonces.
    replay: ReplayGuard,
    config: KernelConfig,
}

impl<S: Store> ConsentKernel<S> {
    /// Create a new engine over `store` with the system clock and a
    /// trusting identity verifier.
    pub fn new(store: S, config: KernelConfig) -> Self {
        Self::shared(Arc::new(store), config)
    }

    /// Create an engine over a store shared with other components.
    pub fn shared(store: Arc<S>, config: KernelConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            verifier: Arc::new(TrustingVerifier),
            replay: ReplayGuard::new(config.proof_window_ms()),
            config,
        }
    }

    /// Replace the clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the identity verifier.
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Current time according to the engine's clock.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Mutations
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a consent request in state Requested.
    pub async fn create(&self, input: CreateInput) -> Result<CreateOutput> {
        let requester = IdentityRef::parse(input.requester)?;
        let grantor = IdentityRef::parse(input.grantor)?;
        self.verify(ProofScope::Create, grantor.as_str(), &requester, input.proof.as_ref())?;

        let new = NewConsentRequest {
            requester,
            grantor,
            requested_document_kinds: input.requested_document_kinds,
            reason: input.reason.trim().to_string(),
        };
        new.validate()?;

        let record = self.store.create(new, self.now()).await?;
        info!(
            request_id = %record.request_id,
            requester = %record.requester,
            grantor = %record.grantor,
            "consent request created"
        );
        Ok(CreateOutput {
            request_id: record.request_id,
            status: record.status,
        })
    }

    /// Grant a Requested request.
    ///
    /// Checks run in the same order as the state machine: caller is the
    /// grantor, request is still Requested, then the payload. Document
    /// policy and registry ownership are part of the payload checks.
    pub async fn grant(&self, input: GrantInput) -> Result<ConsentRequest> {
        let grantor = IdentityRef::parse(input.grantor)?;
        let subject = input.request_id.to_hex();
        self.verify(ProofScope::Grant, &subject, &grantor, input.proof.as_ref())?;
        let actor = Actor::Party(grantor.clone());

        let parsed = input
            .documents
            .iter()
            .map(DocumentInput::parse)
            .collect::<std::result::Result<Vec<_>, _>>();
        let transition = Transition::Grant(GrantPayload {
            permissions: input.permissions,
            documents: parsed.as_ref().map(Clone::clone).unwrap_or_default(),
            expires_at: input.expires_at,
        });

        // Dry run against a snapshot so guard failures surface before
        // policy errors. The store re-runs it atomically.
        let now = self.now();
        let snapshot = self.store.get_required(&input.request_id).await?;
        if let Err(e) = apply_transition(&snapshot, &transition, &actor, now) {
            return Err(match (e, parsed) {
                // Guards passed; the malformed document is the real error.
                (TransitionError::Validation(_), Err(malformed)) => malformed.into(),
                (e, _) => e.into(),
            });
        }

        if let Transition::Grant(payload) = &transition {
            self.config
                .document_policy
                .validate_grant_documents(&payload.documents)?;
            self.check_document_ownership(&grantor, &payload.documents)
                .await?;
        }

        let outcome = self
            .store
            .transition(&input.request_id, &transition, &actor, now)
            .await?;
        let record = outcome.into_record();
        info!(
            request_id = %record.request_id,
            actor = %actor,
            status = %record.status,
            expires_at = record.expires_at,
            "consent granted"
        );
        Ok(record)
    }

    /// Revoke a Requested or Granted request. Grantor or requester only.
    pub async fn revoke(&self, input: RevokeInput) -> Result<ConsentRequest> {
        let identity = IdentityRef::parse(input.actor_identity)?;
        let subject = input.request_id.to_hex();
        self.verify(ProofScope::Revoke, &subject, &identity, input.proof.as_ref())?;
        let actor = Actor::Party(identity);

        let transition = Transition::Revoke {
            note: input.note.filter(|n| !n.trim().is_empty()),
        };
        let outcome = self
            .store
            .transition(&input.request_id, &transition, &actor, self.now())
            .await?;
        let record = outcome.into_record();
        info!(
            request_id = %record.request_id,
            actor = %actor,
            status = %record.status,
            "consent revoked"
        );
        Ok(record)
    }

    /// Expire a Granted request whose window has elapsed.
    ///
    /// Idempotent: an already Expired or Revoked request is returned
    /// unchanged.
    pub async fn expire(&self, request_id: &RequestId) -> Result<ConsentRequest> {
        Ok(self.expire_outcome(request_id).await?.into_record())
    }

    pub(crate) async fn expire_outcome(&self, request_id: &RequestId) -> Result<TransitionOutcome> {
        let outcome = self
            .store
            .transition(request_id, &Transition::Expire, &Actor::Sweeper, self.now())
            .await?;
        match &outcome {
            TransitionOutcome::Applied { record, .. } => {
                info!(request_id = %record.request_id, status = %record.status, "consent expired");
            }
            TransitionOutcome::Unchanged(record) => {
                debug!(request_id = %record.request_id, status = %record.status, "expire was a no-op");
            }
        }
        Ok(outcome)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Get a request by id.
    pub async fn get(&self, request_id: &RequestId) -> Result<ConsentRequest> {
        debug!(request_id = %request_id, "get consent request");
        Ok(self.store.get_required(request_id).await?)
    }

    /// Requests where `identity` plays `role`, ordered by `createdAt`.
    pub async fn list_by_party(
        &self,
        identity: &str,
        role: PartyRole,
    ) -> Result<Vec<ConsentRequest>> {
        let identity = IdentityRef::parse(identity)?;
        debug!(identity = %identity, ?role, "list by party");
        Ok(self.store.list_by_party(&identity, role).await?)
    }

    /// Requests in `status`, ordered by `createdAt`.
    pub async fn list_by_status(&self, status: Status) -> Result<Vec<ConsentRequest>> {
        debug!(%status, "list by status");
        Ok(self.store.list_by_status(status).await?)
    }

    /// The audit trail of a request.
    ///
    /// If replaying the trail does not reproduce the stored status the
    /// mismatch is logged; the stored record stays authoritative.
    pub async fn audit_trail(&self, request_id: &RequestId) -> Result<AuditTrail> {
        let record = self.store.get_required(request_id).await?;
        let trail = AuditTrail::new(*request_id, self.store.audit_trail(request_id).await?);

        match trail.replay_status() {
            Ok(status) if status == record.status => {}
            Ok(status) => warn!(
                request_id = %request_id,
                stored = %record.status,
                replayed = %status,
                "audit trail disagrees with stored status"
            ),
            Err(e) => warn!(request_id = %request_id, error = %e, "audit trail cannot be replayed"),
        }
        Ok(trail)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Access
    // ─────────────────────────────────────────────────────────────────────────

    /// Decide an access attempt. Never mutates the request.
    pub async fn check_access(&self, input: AccessCheckInput) -> Result<AccessDecision> {
        let identity = IdentityRef::parse(input.identity)?;
        let subject = input.request_id.to_hex();
        self.verify(ProofScope::CheckAccess, &subject, &identity, input.proof.as_ref())?;
        let content_address = input
            .content_address
            .map(ContentAddress::parse)
            .transpose()?;
        let record = self.store.get_required(&input.request_id).await?;
        let now = self.now();

        let decision = match &content_address {
            Some(addr) => {
                access::check_document_access(&record, &identity, input.capability, addr, now)
            }
            None => access::check_access(&record, &identity, input.capability, now),
        };
        debug!(
            request_id = %record.request_id,
            identity = %identity,
            capability = %input.capability,
            allowed = decision.allowed,
            reason = decision.reason.map(|r| r.as_str()),
            "access check"
        );
        Ok(decision)
    }

    /// Documents `identity` can view right now.
    pub async fn accessible_documents(
        &self,
        identity: &str,
        proof: Option<&IdentityProof>,
    ) -> Result<Vec<AccessibleDocument>> {
        let identity = IdentityRef::parse(identity)?;
        self.verify(ProofScope::ListAccessible, identity.as_str(), &identity, proof)?;
        let records = self
            .store
            .list_by_party(&identity, PartyRole::Requester)
            .await?;
        Ok(access::accessible_documents(&records, &identity, self.now()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Document Registry
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a document to its owner after policy checks.
    pub async fn register_document(&self, input: RegisterDocumentInput) -> Result<DocumentRecord> {
        let owner = IdentityRef::parse(input.owner)?;
        let document = input.document.parse()?;
        let subject = document.content_address.to_string();
        self.verify(ProofScope::RegisterDocument, &subject, &owner, input.proof.as_ref())?;
        self.config.document_policy.validate_document(&document)?;

        let record = self
            .store
            .register_document(&owner, &document, self.now())
            .await?;
        info!(
            owner = %owner,
            content_address = %document.content_address,
            "document registered"
        );
        Ok(record)
    }

    /// Documents registered to `owner`, newest first.
    pub async fn documents_of(&self, owner: &str) -> Result<Vec<DocumentRecord>> {
        let owner = IdentityRef::parse(owner)?;
        Ok(self.store.documents_of(&owner).await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internal
    // ─────────────────────────────────────────────────────────────────────────

    /// Check that the caller controls `identity` for `scope` on `subject`.
    ///
    /// Order: freshness, signature, then the nonce is spent. A forged proof
    /// never burns a nonce.
    fn verify(
        &self,
        scope: ProofScope,
        subject: &str,
        identity: &IdentityRef,
        proof: Option<&IdentityProof>,
    ) -> Result<()> {
        let Some(proof) = proof else {
            if self.verifier.requires_proof() {
                return Err(forbidden(VerifyError::MissingProof(identity.to_string())));
            }
            return Ok(());
        };

        let now = self.now();
        let challenge = Challenge::for_proof(scope, subject, identity.clone(), proof)
            .map_err(forbidden)?;
        self.replay
            .check_fresh(challenge.issued_at, now)
            .and_then(|()| self.verifier.verify(&challenge, &proof.signature))
            .and_then(|()| self.replay.spend(&challenge, now))
            .map_err(|e| {
                warn!(identity = %identity, %scope, error = %e, "identity proof rejected");
                forbidden(e)
            })
    }

    /// Registry check for a grant's documents.
    ///
    /// Runs before, not inside, the store's atomic transition. Registrations
    /// never revoke or rewrite grants and an address is owned at most once,
    /// so a registration landing between this check and the write has the
    /// same outcome as one made just after the grant commits.
    async fn check_document_ownership(
        &self,
        grantor: &IdentityRef,
        documents: &[DocumentRef],
    ) -> Result<()> {
        for doc in documents {
            match self.store.document_owner(&doc.content_address).await? {
                Some(owner) if owner != *grantor => {
                    return Err(KernelError::Forbidden(format!(
                        "document {} is registered to {}",
                        doc.content_address, owner
                    )));
                }
                Some(_) => {}
                None if self.config.require_registered_documents => {
                    return Err(ValidationError::UnregisteredDocument(
                        doc.content_address.to_string(),
                    )
                    .into());
                }
                None => {}
            }
        }
        Ok(())
    }
}

fn forbidden(err: VerifyError) -> KernelError {
    KernelError::Forbidden(err.to_string())
}
