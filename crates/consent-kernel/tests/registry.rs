//! Document registry, document policy and identity verification.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use consent_kernel::core::{Clock, DocumentPolicy, IdentityRef, ValidationError};
use consent_kernel::store::MemoryStore;
use consent_kernel::{
    AccessCheckInput, Capability, Challenge, ConsentKernel, CreateInput, Ed25519Verifier,
    ErrorKind, IdentityProof, KernelConfig, KernelError, ProofScope, RegisterDocumentInput,
    RequestId, RevokeInput, Status,
};
use consent_kernel_testkit::{document, TestFixture, GRANTOR, HOUR_MS, STRANGER};

#[tokio::test]
async fn test_register_and_list_documents() {
    let fx = TestFixture::new();
    fx.register(GRANTOR, 1).await;
    fx.clock.advance(5);
    fx.register(GRANTOR, 2).await;
    fx.register(STRANGER, 3).await;

    let docs = fx.kernel.documents_of(GRANTOR).await.unwrap();
    let addrs: Vec<_> = docs
        .iter()
        .map(|d| d.document.content_address.to_string())
        .collect();
    assert_eq!(addrs, vec![document(2).content_address, document(1).content_address]);
    assert!(docs.iter().all(|d| d.owner.as_str() == GRANTOR));
}

#[tokio::test]
async fn test_registration_is_owned_once() {
    let fx = TestFixture::new();
    fx.register(GRANTOR, 1).await;

    // Same owner again is idempotent.
    let first = fx.kernel.documents_of(GRANTOR).await.unwrap();
    fx.clock.advance(1000);
    fx.register(GRANTOR, 1).await;
    assert_eq!(fx.kernel.documents_of(GRANTOR).await.unwrap(), first);

    let err = fx
        .kernel
        .register_document(RegisterDocumentInput {
            owner: STRANGER.into(),
            document: document(1),
            proof: None,
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_registration_applies_policy() {
    let fx = TestFixture::new();

    let mut exe = document(1);
    exe.media_type = "application/x-msdownload".into();
    let mut empty = document(2);
    empty.size = 0;
    let mut huge = document(3);
    huge.size = 11 * 1024 * 1024;
    let mut unnamed = document(4);
    unnamed.name = "   ".into();

    for doc in [exe, empty, huge, unnamed] {
        let err = fx
            .kernel
            .register_document(RegisterDocumentInput {
                owner: GRANTOR.into(),
                document: doc,
                proof: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
    assert!(fx.kernel.documents_of(GRANTOR).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_grant_of_foreign_document_is_forbidden() {
    let fx = TestFixture::new();
    fx.register(STRANGER, 1).await;
    let id = fx.requested().await;

    let err = fx.kernel.grant(fx.grant_input(id, HOUR_MS)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(fx.kernel.get(&id).await.unwrap().status, Status::Requested);

    fx.register(GRANTOR, 2).await;
    let mut input = fx.grant_input(id, HOUR_MS);
    input.documents = vec![document(2)];
    assert_eq!(fx.kernel.grant(input).await.unwrap().status, Status::Granted);
}

#[tokio::test]
async fn test_registration_after_grant_leaves_grant_alone() {
    let fx = TestFixture::new();
    let granted = fx.granted(HOUR_MS).await;

    // The granted document was unregistered; someone else claims it now.
    fx.register(STRANGER, 1).await;
    let record = fx.kernel.get(&granted.request_id).await.unwrap();
    assert_eq!(record.status, Status::Granted);
    assert_eq!(record.documents.as_ref().map(Vec::len), Some(1));

    // Later grants of it by the grantor are refused.
    let id = fx.requested().await;
    let err = fx.kernel.grant(fx.grant_input(id, HOUR_MS)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_grant_requires_registration_when_configured() {
    let config = KernelConfig {
        require_registered_documents: true,
        ..KernelConfig::default()
    };
    let fx = TestFixture::with_config(config);
    let id = fx.requested().await;

    let err = fx.kernel.grant(fx.grant_input(id, HOUR_MS)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Validation);

    fx.register(GRANTOR, 1).await;
    assert!(fx.kernel.grant(fx.grant_input(id, HOUR_MS)).await.is_ok());
}

#[tokio::test]
async fn test_grant_document_policy() {
    let fx = TestFixture::new();
    let id = fx.requested().await;

    let mut input = fx.grant_input(id, HOUR_MS);
    input.documents = vec![];
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Validation);

    let mut input = fx.grant_input(id, HOUR_MS);
    input.documents = vec![document(1), document(1)];
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Validation);

    let mut input = fx.grant_input(id, HOUR_MS);
    input.documents = (0..17).map(document).collect();
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Validation);

    let mut input = fx.grant_input(id, HOUR_MS);
    input.permissions = Default::default();
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Validation);

    assert_eq!(fx.kernel.get(&id).await.unwrap().status, Status::Requested);

    // A permissive policy accepts any media type.
    let fx = TestFixture::with_config(KernelConfig {
        document_policy: DocumentPolicy::permissive(),
        ..KernelConfig::default()
    });
    let id = fx.requested().await;
    let mut input = fx.grant_input(id, HOUR_MS);
    input.documents[0].media_type = "text/plain".into();
    assert!(fx.kernel.grant(input).await.is_ok());
}

#[tokio::test]
async fn test_forbidden_is_reported_before_state() {
    let fx = TestFixture::new();
    let granted = fx.granted(HOUR_MS).await;

    // Wrong actor on a Granted request: Forbidden wins over InvalidTransition.
    let mut input = fx.grant_input(granted.request_id, HOUR_MS);
    input.grantor = STRANGER.into();
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Forbidden);

    // A malformed document does not mask the actor check.
    let mut input = fx.grant_input(granted.request_id, HOUR_MS);
    input.grantor = STRANGER.into();
    input.documents[0].content_address = "../../etc/passwd".into();
    assert_eq!(fx.kernel.grant(input).await.unwrap_err().kind(), ErrorKind::Forbidden);

    // On a pending request it is a validation error.
    let pending = fx.requested().await;
    let mut input = fx.grant_input(pending, HOUR_MS);
    input.documents[0].content_address = "../../etc/passwd".into();
    assert!(matches!(
        fx.kernel.grant(input).await.unwrap_err(),
        KernelError::Validation(ValidationError::InvalidContentAddress(_))
    ));

    // Right actor, wrong state, bad payload: InvalidTransition wins.
    let mut input = fx.grant_input(granted.request_id, -HOUR_MS);
    input.documents = vec![];
    assert_eq!(
        fx.kernel.grant(input).await.unwrap_err().kind(),
        ErrorKind::InvalidTransition
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity verification
// ─────────────────────────────────────────────────────────────────────────────

fn key_identity(key: &SigningKey) -> String {
    hex::encode(key.verifying_key().to_bytes())
}

fn sign(key: &SigningKey, scope: ProofScope, subject: &str, issued_at: i64) -> IdentityProof {
    let identity = IdentityRef::parse(key_identity(key)).unwrap();
    Challenge::new(scope, subject, identity, issued_at).sign(key)
}

/// An engine that demands Ed25519 proofs, and a granted request between
/// two fresh keys.
struct SignedParties {
    fx: TestFixture,
    kernel: ConsentKernel<MemoryStore>,
    requester: SigningKey,
    grantor: SigningKey,
    request_id: RequestId,
    /// The proof the grantor presented with the Grant.
    grant_proof: IdentityProof,
}

impl SignedParties {
    async fn granted() -> Self {
        let fx = TestFixture::new();
        let kernel = ConsentKernel::new(MemoryStore::new(), KernelConfig::default())
            .with_clock(fx.clock.clone())
            .with_verifier(Arc::new(Ed25519Verifier));
        let requester = SigningKey::generate(&mut OsRng);
        let grantor = SigningKey::generate(&mut OsRng);
        let now = fx.clock.now_millis();

        let created = kernel
            .create(CreateInput {
                requester: key_identity(&requester),
                grantor: key_identity(&grantor),
                proof: Some(sign(&requester, ProofScope::Create, &key_identity(&grantor), now)),
                ..fx.create_input()
            })
            .await
            .unwrap();
        let request_id = created.request_id;

        let mut grant = fx.grant_input(request_id, HOUR_MS);
        grant.grantor = key_identity(&grantor);
        let grant_proof = sign(&grantor, ProofScope::Grant, &request_id.to_hex(), now);
        grant.proof = Some(grant_proof.clone());
        kernel.grant(grant).await.unwrap();

        Self {
            fx,
            kernel,
            requester,
            grantor,
            request_id,
            grant_proof,
        }
    }

    fn now(&self) -> i64 {
        self.fx.clock.now_millis()
    }

    fn revoke_by_grantor(&self, proof: IdentityProof) -> RevokeInput {
        RevokeInput {
            request_id: self.request_id,
            actor_identity: key_identity(&self.grantor),
            note: None,
            proof: Some(proof),
        }
    }

    fn view_by_requester(&self, proof: Option<IdentityProof>) -> AccessCheckInput {
        AccessCheckInput {
            request_id: self.request_id,
            identity: key_identity(&self.requester),
            capability: Capability::View,
            content_address: None,
            proof,
        }
    }
}

#[tokio::test]
async fn test_ed25519_verifier_gates_mutations() {
    let fx = TestFixture::new();
    let kernel = ConsentKernel::new(MemoryStore::new(), KernelConfig::default())
        .with_clock(fx.clock.clone())
        .with_verifier(Arc::new(Ed25519Verifier));
    let now = fx.clock.now_millis();

    let requester = SigningKey::generate(&mut OsRng);
    let grantor = SigningKey::generate(&mut OsRng);
    let create = CreateInput {
        requester: key_identity(&requester),
        grantor: key_identity(&grantor),
        ..fx.create_input()
    };

    // No proof.
    let err = kernel.create(create.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // Signed by someone else.
    let forged = CreateInput {
        proof: Some(sign(&grantor, ProofScope::Create, &key_identity(&grantor), now)),
        ..create.clone()
    };
    assert_eq!(kernel.create(forged).await.unwrap_err().kind(), ErrorKind::Forbidden);

    let signed = CreateInput {
        proof: Some(sign(&requester, ProofScope::Create, &key_identity(&grantor), now)),
        ..create
    };
    let created = kernel.create(signed).await.unwrap();

    let mut grant = fx.grant_input(created.request_id, HOUR_MS);
    grant.grantor = key_identity(&grantor);
    grant.proof = Some(sign(&grantor, ProofScope::Grant, &created.request_id.to_hex(), now));
    let record = kernel.grant(grant).await.unwrap();
    assert_eq!(record.status, Status::Granted);
    assert_eq!(record.requester.as_str(), key_identity(&requester));
}

#[tokio::test]
async fn test_grant_proof_cannot_revoke() {
    let parties = SignedParties::granted().await;

    // The exact proof an observer saw on the Grant.
    let err = parties
        .kernel
        .revoke(parties.revoke_by_grantor(parties.grant_proof.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    assert_eq!(
        parties.kernel.get(&parties.request_id).await.unwrap().status,
        Status::Granted
    );
}

#[tokio::test]
async fn test_spent_proof_is_forbidden() {
    let parties = SignedParties::granted().await;
    let subject = parties.request_id.to_hex();
    let proof = sign(&parties.requester, ProofScope::CheckAccess, &subject, parties.now());

    let decision = parties
        .kernel
        .check_access(parties.view_by_requester(Some(proof.clone())))
        .await
        .unwrap();
    assert!(decision.allowed);

    let err = parties
        .kernel
        .check_access(parties.view_by_requester(Some(proof)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // A fresh proof is accepted again.
    let fresh = sign(&parties.requester, ProofScope::CheckAccess, &subject, parties.now());
    let decision = parties
        .kernel
        .check_access(parties.view_by_requester(Some(fresh)))
        .await
        .unwrap();
    assert!(decision.allowed);
}

#[tokio::test]
async fn test_stale_proof_is_forbidden() {
    let parties = SignedParties::granted().await;
    let subject = parties.request_id.to_hex();
    let window = KernelConfig::default().proof_window.as_millis() as i64;

    let old = sign(&parties.grantor, ProofScope::Revoke, &subject, parties.now() - window - 1);
    let err = parties.kernel.revoke(parties.revoke_by_grantor(old)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let future = sign(&parties.grantor, ProofScope::Revoke, &subject, parties.now() + window + 1);
    let err = parties.kernel.revoke(parties.revoke_by_grantor(future)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // Signed inside the window, presented after it closed.
    let held = sign(&parties.grantor, ProofScope::Revoke, &subject, parties.now());
    parties.fx.clock.advance(window + 1);
    let err = parties.kernel.revoke(parties.revoke_by_grantor(held)).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let current = sign(&parties.grantor, ProofScope::Revoke, &subject, parties.now());
    let record = parties.kernel.revoke(parties.revoke_by_grantor(current)).await.unwrap();
    assert_eq!(record.status, Status::Revoked);
}

#[tokio::test]
async fn test_proof_is_bound_to_its_request() {
    let parties = SignedParties::granted().await;
    let other = RequestId::generate();
    let proof = sign(&parties.grantor, ProofScope::Revoke, &other.to_hex(), parties.now());

    let err = parties
        .kernel
        .revoke(parties.revoke_by_grantor(proof))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[tokio::test]
async fn test_access_checks_require_proof() {
    let parties = SignedParties::granted().await;

    let err = parties
        .kernel
        .check_access(parties.view_by_requester(None))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    // The grantor's key cannot speak for the requester.
    let borrowed = sign(
        &parties.grantor,
        ProofScope::CheckAccess,
        &parties.request_id.to_hex(),
        parties.now(),
    );
    let err = parties
        .kernel
        .check_access(parties.view_by_requester(Some(borrowed)))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let requester = key_identity(&parties.requester);
    let err = parties
        .kernel
        .accessible_documents(&requester, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let proof = sign(&parties.requester, ProofScope::ListAccessible, &requester, parties.now());
    let docs = parties
        .kernel
        .accessible_documents(&requester, Some(&proof))
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}
