//! Proptest generators for property-based testing.

use proptest::prelude::*;

use consent_kernel_core::{
    Capability, ContentAddress, DocumentKind, DocumentRef, IdentityRef, PermissionSet,
};

/// Generate a well-formed identity.
pub fn identity() -> impl Strategy<Value = IdentityRef> {
    "[A-Za-z0-9_:.-]{1,64}".prop_map(|s| IdentityRef::parse(s).expect("pattern is valid"))
}

/// Generate a capability.
pub fn capability() -> impl Strategy<Value = Capability> {
    prop_oneof![
        Just(Capability::View),
        Just(Capability::Edit),
        Just(Capability::Download),
        Just(Capability::Screenshot),
    ]
}

/// Generate any permission set, including the empty one.
pub fn any_permission_set() -> impl Strategy<Value = PermissionSet> {
    (0u8..16).prop_map(PermissionSet::from_bits)
}

/// Generate a permission set with at least one capability.
pub fn permission_set() -> impl Strategy<Value = PermissionSet> {
    (1u8..16).prop_map(PermissionSet::from_bits)
}

/// Generate a content address from a random digest.
pub fn content_address() -> impl Strategy<Value = ContentAddress> {
    any::<[u8; 16]>().prop_map(|digest| {
        ContentAddress::parse(format!("bafy{}", hex::encode(digest))).expect("hex is alphanumeric")
    })
}

/// Generate a document reference that passes the default policy.
pub fn document_ref() -> impl Strategy<Value = DocumentRef> {
    (
        content_address(),
        "[a-z]{1,20}",
        prop_oneof![Just("application/pdf"), Just("image/png"), Just("image/jpeg")],
        1u64..=1024 * 1024,
    )
        .prop_map(|(addr, stem, media, size)| {
            DocumentRef::new(addr, format!("{stem}.bin"), media, size)
        })
}

/// Generate a requested document kind.
pub fn document_kind() -> impl Strategy<Value = DocumentKind> {
    prop_oneof![
        prop_oneof![Just("aadhar"), Just("pan"), Just("passport"), Just("driving_license")]
            .prop_map(DocumentKind::tag),
        "[a-z][a-z ]{0,29}".prop_map(DocumentKind::other),
    ]
}

/// Which party attempts an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Who {
    Requester,
    Grantor,
    Stranger,
}

/// One step in a random lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Grant { by: Who, ttl_ms: i64 },
    Revoke { by: Who },
    Expire,
    Advance { ms: i64 },
}

fn who() -> impl Strategy<Value = Who> {
    prop_oneof![Just(Who::Requester), Just(Who::Grantor), Just(Who::Stranger)]
}

impl Arbitrary for Step {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop_oneof![
            (who(), -1_000i64..=10_000).prop_map(|(by, ttl_ms)| Step::Grant { by, ttl_ms }),
            who().prop_map(|by| Step::Revoke { by }),
            Just(Step::Expire),
            (0i64..=5_000).prop_map(|ms| Step::Advance { ms }),
        ]
        .boxed()
    }
}

/// Generate a lifecycle of up to `max_len` steps.
pub fn steps(max_len: usize) -> impl Strategy<Value = Vec<Step>> {
    prop::collection::vec(any::<Step>(), 0..=max_len)
}
