//! Test fixtures and helpers.
//!
//! Common setup code for integration tests: a manually driven clock, a
//! kernel wired to it, and seeded parties and documents.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use rand::RngCore;

use consent_kernel::{
    ConsentKernel, CreateInput, DocumentInput, ExpirySweeper, GrantInput, KernelConfig,
    RegisterDocumentInput, RevokeInput,
};
use consent_kernel_core::{
    Clock, ConsentRequest, DocumentKind, IdentityRef, PermissionSet, RequestId,
};
use consent_kernel_store::{MemoryStore, Store};

/// Fixed start time for fixtures: 2023-11-14T22:13:20Z.
pub const START_MILLIS: i64 = 1_700_000_000_000;

pub const HOUR_MS: i64 = 60 * 60 * 1000;

/// Default requester identity.
pub const REQUESTER: &str = "R1";

/// Default grantor identity.
pub const GRANTOR: &str = "G1";

/// An identity that is party to nothing.
pub const STRANGER: &str = "X9";

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        Self {
            now: AtomicI64::new(start),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    /// Move forward by `millis` and return the new time.
    pub fn advance(&self, millis: i64) -> i64 {
        self.now.fetch_add(millis, Ordering::SeqCst) + millis
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(START_MILLIS)
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Parse an identity known to be well formed.
pub fn identity(raw: &str) -> IdentityRef {
    IdentityRef::parse(raw).expect("fixture identity is valid")
}

/// A fresh random identity, for multi-party tests.
pub fn random_identity() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ID{}", hex::encode(bytes))
}

/// A PDF document with a deterministic content address.
pub fn document(n: u32) -> DocumentInput {
    DocumentInput {
        content_address: format!("QmTestDocument{n:06}"),
        name: format!("document-{n}.pdf"),
        media_type: "application/pdf".into(),
        size: 4096,
    }
}

/// A kernel over `S` driven by a [`ManualClock`].
pub struct TestFixture<S: Store = MemoryStore> {
    pub kernel: Arc<ConsentKernel<S>>,
    pub clock: Arc<ManualClock>,
}

impl TestFixture<MemoryStore> {
    /// Create a fixture over a fresh memory store.
    pub fn new() -> Self {
        Self::with_store(MemoryStore::new())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self::with_store_and_config(MemoryStore::new(), config)
    }
}

impl Default for TestFixture<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Store> TestFixture<S> {
    pub fn with_store(store: S) -> Self {
        Self::with_store_and_config(store, KernelConfig::default())
    }

    pub fn with_store_and_config(store: S, config: KernelConfig) -> Self {
        let clock = Arc::new(ManualClock::default());
        let kernel = ConsentKernel::new(store, config).with_clock(clock.clone());
        Self {
            kernel: Arc::new(kernel),
            clock,
        }
    }

    /// Another kernel over `store` on this fixture's clock and config, as a
    /// second process sharing the database would be.
    pub fn sibling<T: Store>(&self, store: T) -> TestFixture<T> {
        let kernel =
            ConsentKernel::new(store, self.kernel.config().clone()).with_clock(self.clock.clone());
        TestFixture {
            kernel: Arc::new(kernel),
            clock: self.clock.clone(),
        }
    }

    /// A sweeper over this fixture's kernel.
    pub fn sweeper(&self) -> ExpirySweeper<S> {
        ExpirySweeper::new(self.kernel.clone())
    }

    /// Create input from [`REQUESTER`] to [`GRANTOR`].
    pub fn create_input(&self) -> CreateInput {
        CreateInput {
            requester: REQUESTER.into(),
            grantor: GRANTOR.into(),
            requested_document_kinds: vec![DocumentKind::tag("aadhar")],
            reason: "KYC".into(),
            proof: None,
        }
    }

    /// Grant input from [`GRANTOR`]: view only, one document, expiring
    /// `ttl_ms` from now.
    pub fn grant_input(&self, request_id: RequestId, ttl_ms: i64) -> GrantInput {
        GrantInput {
            request_id,
            grantor: GRANTOR.into(),
            permissions: PermissionSet::view_only(),
            documents: vec![document(1)],
            expires_at: self.clock.now_millis() + ttl_ms,
            proof: None,
        }
    }

    pub fn revoke_input(&self, request_id: RequestId, actor: &str) -> RevokeInput {
        RevokeInput {
            request_id,
            actor_identity: actor.into(),
            note: None,
            proof: None,
        }
    }

    /// Create a Requested request from [`REQUESTER`] to [`GRANTOR`].
    pub async fn requested(&self) -> RequestId {
        self.kernel
            .create(self.create_input())
            .await
            .expect("fixture create succeeds")
            .request_id
    }

    /// Create and grant a request expiring `ttl_ms` from now.
    pub async fn granted(&self, ttl_ms: i64) -> ConsentRequest {
        let id = self.requested().await;
        self.kernel
            .grant(self.grant_input(id, ttl_ms))
            .await
            .expect("fixture grant succeeds")
    }

    /// Register `document(n)` to `owner`.
    pub async fn register(&self, owner: &str, n: u32) {
        self.kernel
            .register_document(RegisterDocumentInput {
                owner: owner.into(),
                document: document(n),
                proof: None,
            })
            .await
            .expect("fixture registration succeeds");
    }
}
