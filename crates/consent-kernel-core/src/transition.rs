//! The consent request state machine.
//!
//! ```text
//! Requested ──grant──▶ Granted ──revoke──▶ Revoked
//!     │                   │
//!     └──────revoke───────┼──────────────▶ Revoked
//!                         └──expire──────▶ Expired
//! ```
//!
//! [`apply_transition`] is pure: it takes the current record and returns
//! either the next record with its audit entry, or an error. Stores run it
//! inside their per-request atomic section so the guard and the write are
//! never interleaved with a competitor.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audit::{AuditAction, AuditEntry};
use crate::document::DocumentRef;
use crate::error::{TransitionError, ValidationError};
use crate::permission::PermissionSet;
use crate::request::{ConsentRequest, Status};
use crate::types::IdentityRef;

/// The kind of mutation being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Grant,
    Revoke,
    Expire,
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransitionKind::Grant => "grant",
            TransitionKind::Revoke => "revoke",
            TransitionKind::Expire => "expire",
        })
    }
}

/// Who is performing a transition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "identity")]
pub enum Actor {
    /// A party identified by the caller-supplied identity.
    Party(IdentityRef),
    /// The expiry sweeper.
    Sweeper,
}

impl Actor {
    pub fn party(identity: IdentityRef) -> Self {
        Actor::Party(identity)
    }

    pub fn identity(&self) -> Option<&IdentityRef> {
        match self {
            Actor::Party(id) => Some(id),
            Actor::Sweeper => None,
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Party(id) => write!(f, "{id}"),
            Actor::Sweeper => f.write_str("sweeper"),
        }
    }
}

/// Payload of a Grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantPayload {
    pub permissions: PermissionSet,
    pub documents: Vec<DocumentRef>,
    /// Unix ms; must be strictly after the transition time.
    pub expires_at: i64,
}

/// A requested mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum Transition {
    Grant(GrantPayload),
    Revoke { note: Option<String> },
    Expire,
}

impl Transition {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Grant(_) => TransitionKind::Grant,
            Transition::Revoke { .. } => TransitionKind::Revoke,
            Transition::Expire => TransitionKind::Expire,
        }
    }
}

/// Result of applying a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record moved; `entry` must be appended to the audit trail in the
    /// same atomic write.
    Applied {
        record: ConsentRequest,
        entry: AuditEntry,
    },
    /// Idempotent no-op: the record is returned as-is and nothing is logged.
    Unchanged(ConsentRequest),
}

impl TransitionOutcome {
    pub fn record(&self) -> &ConsentRequest {
        match self {
            TransitionOutcome::Applied { record, .. } => record,
            TransitionOutcome::Unchanged(record) => record,
        }
    }

    pub fn into_record(self) -> ConsentRequest {
        match self {
            TransitionOutcome::Applied { record, .. } => record,
            TransitionOutcome::Unchanged(record) => record,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied { .. })
    }
}

/// Apply `transition` by `actor` to `record` at time `now`.
///
/// Guards run in a fixed order: actor authorization (`Forbidden`), then the
/// state guard (`InvalidTransition`), then payload validation. The input
/// record is never modified; on error the caller keeps the old state.
///
/// Timestamps are clamped to `record.updated_at` so a lagging clock can
/// never backdate a transition.
pub fn apply_transition(
    record: &ConsentRequest,
    transition: &Transition,
    actor: &Actor,
    now: i64,
) -> Result<TransitionOutcome, TransitionError> {
    let at = now.max(record.updated_at);
    let attempted = transition.kind();

    match transition {
        Transition::Grant(payload) => {
            require_party(actor, attempted, |id| *id == record.grantor)?;
            if record.status != Status::Requested {
                return Err(invalid(record.status, attempted));
            }
            payload.permissions.validate()?;
            if payload.documents.is_empty() {
                return Err(ValidationError::NoDocuments.into());
            }
            if payload.expires_at <= at {
                return Err(ValidationError::ExpiryNotInFuture {
                    expires_at: payload.expires_at,
                    now: at,
                }
                .into());
            }

            let mut next = record.clone();
            next.status = Status::Granted;
            next.permissions = Some(payload.permissions);
            next.documents = Some(payload.documents.clone());
            next.granted_at = Some(at);
            next.expires_at = Some(payload.expires_at);
            next.updated_at = at;
            Ok(applied(next, AuditAction::Granted, actor, at, None))
        }

        Transition::Revoke { note } => {
            require_party(actor, attempted, |id| {
                *id == record.grantor || *id == record.requester
            })?;
            if !matches!(record.status, Status::Requested | Status::Granted) {
                return Err(invalid(record.status, attempted));
            }

            // Grant fields are kept on Granted -> Revoked as history.
            let mut next = record.clone();
            next.status = Status::Revoked;
            next.revoked_at = Some(at);
            next.updated_at = at;
            Ok(applied(next, AuditAction::Revoked, actor, at, note.clone()))
        }

        Transition::Expire => {
            if *actor != Actor::Sweeper {
                return Err(forbidden(actor, attempted));
            }
            match record.status {
                Status::Expired | Status::Revoked => {
                    Ok(TransitionOutcome::Unchanged(record.clone()))
                }
                Status::Requested => Err(invalid(record.status, attempted)),
                Status::Granted => {
                    if !record.is_due_for_expiry(now) {
                        return Err(invalid(record.status, attempted));
                    }
                    let mut next = record.clone();
                    next.status = Status::Expired;
                    next.updated_at = at;
                    Ok(applied(next, AuditAction::Expired, actor, at, None))
                }
            }
        }
    }
}

fn require_party(
    actor: &Actor,
    attempted: TransitionKind,
    allowed: impl Fn(&IdentityRef) -> bool,
) -> Result<(), TransitionError> {
    match actor {
        Actor::Party(id) if allowed(id) => Ok(()),
        _ => Err(forbidden(actor, attempted)),
    }
}

fn forbidden(actor: &Actor, attempted: TransitionKind) -> TransitionError {
    TransitionError::Forbidden {
        actor: actor.to_string(),
        attempted,
    }
}

fn invalid(from: Status, attempted: TransitionKind) -> TransitionError {
    TransitionError::InvalidTransition { from, attempted }
}

fn applied(
    record: ConsentRequest,
    action: AuditAction,
    actor: &Actor,
    at: i64,
    note: Option<String>,
) -> TransitionOutcome {
    let entry = AuditEntry {
        request_id: record.request_id,
        action,
        actor: actor.clone(),
        at,
        note,
    };
    TransitionOutcome::Applied { record, entry }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ContentAddress;
    use crate::request::{DocumentKind, NewConsentRequest};
    use crate::types::RequestId;
    use proptest::prelude::*;

    const T0: i64 = 1_700_000_000_000;
    const HOUR: i64 = 3_600_000;

    fn id(s: &str) -> IdentityRef {
        IdentityRef::parse(s).unwrap()
    }

    fn requested() -> ConsentRequest {
        NewConsentRequest {
            requester: id("R1"),
            grantor: id("G1"),
            requested_document_kinds: vec![DocumentKind::tag("aadhar")],
            reason: "KYC".into(),
        }
        .into_request(RequestId::from_bytes([7; 16]), T0)
    }

    fn grant(expires_at: i64) -> Transition {
        Transition::Grant(GrantPayload {
            permissions: PermissionSet::view_only(),
            documents: vec![DocumentRef::new(
                ContentAddress::parse("QmAadhar0001").unwrap(),
                "aadhar.pdf",
                "application/pdf",
                2048,
            )],
            expires_at,
        })
    }

    fn granted() -> ConsentRequest {
        apply_transition(&requested(), &grant(T0 + HOUR), &Actor::party(id("G1")), T0)
            .unwrap()
            .into_record()
    }

    #[test]
    fn test_grant_by_grantor() {
        let outcome =
            apply_transition(&requested(), &grant(T0 + HOUR), &Actor::party(id("G1")), T0 + 5)
                .unwrap();
        let TransitionOutcome::Applied { record, entry } = outcome else {
            panic!("expected applied");
        };
        assert_eq!(record.status, Status::Granted);
        assert_eq!(record.granted_at, Some(T0 + 5));
        assert_eq!(record.expires_at, Some(T0 + HOUR));
        assert_eq!(record.updated_at, T0 + 5);
        assert_eq!(entry.action, AuditAction::Granted);
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn test_grant_by_other_identity_is_forbidden() {
        let err = apply_transition(&requested(), &grant(T0 + HOUR), &Actor::party(id("R1")), T0)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Forbidden { .. }));
    }

    #[test]
    fn test_forbidden_checked_before_state() {
        let err = apply_transition(&granted(), &grant(T0 + HOUR), &Actor::party(id("X")), T0)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Forbidden { .. }));
    }

    #[test]
    fn test_grant_with_past_expiry() {
        let err = apply_transition(&requested(), &grant(T0 - 1), &Actor::party(id("G1")), T0)
            .unwrap_err();
        assert!(matches!(
            err,
            TransitionError::Validation(ValidationError::ExpiryNotInFuture { .. })
        ));
        let err = apply_transition(&requested(), &grant(T0), &Actor::party(id("G1")), T0)
            .unwrap_err();
        assert!(matches!(err, TransitionError::Validation(_)));
    }

    #[test]
    fn test_grant_requires_permissions_and_documents() {
        let empty_perms = Transition::Grant(GrantPayload {
            permissions: PermissionSet::default(),
            documents: vec![],
            expires_at: T0 + HOUR,
        });
        let err = apply_transition(&requested(), &empty_perms, &Actor::party(id("G1")), T0)
            .unwrap_err();
        assert_eq!(err, TransitionError::Validation(ValidationError::EmptyPermissions));

        let no_docs = Transition::Grant(GrantPayload {
            permissions: PermissionSet::all(),
            documents: vec![],
            expires_at: T0 + HOUR,
        });
        let err =
            apply_transition(&requested(), &no_docs, &Actor::party(id("G1")), T0).unwrap_err();
        assert_eq!(err, TransitionError::Validation(ValidationError::NoDocuments));
    }

    #[test]
    fn test_regrant_is_invalid() {
        let err = apply_transition(&granted(), &grant(T0 + 2 * HOUR), &Actor::party(id("G1")), T0)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: Status::Granted,
                attempted: TransitionKind::Grant
            }
        );
    }

    #[test]
    fn test_revoke_by_either_party() {
        for who in ["G1", "R1"] {
            let next = apply_transition(
                &requested(),
                &Transition::Revoke { note: None },
                &Actor::party(id(who)),
                T0 + 1,
            )
            .unwrap()
            .into_record();
            assert_eq!(next.status, Status::Revoked);
            assert_eq!(next.revoked_at, Some(T0 + 1));
            assert!(next.permissions.is_none() && next.documents.is_none());
        }
        let err = apply_transition(
            &requested(),
            &Transition::Revoke { note: None },
            &Actor::party(id("X")),
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Forbidden { .. }));
    }

    #[test]
    fn test_revoke_granted_keeps_history() {
        let next = apply_transition(
            &granted(),
            &Transition::Revoke {
                note: Some("no longer needed".into()),
            },
            &Actor::party(id("G1")),
            T0 + 10,
        )
        .unwrap();
        let TransitionOutcome::Applied { record, entry } = next else {
            panic!("expected applied");
        };
        assert_eq!(record.status, Status::Revoked);
        assert!(record.permissions.is_some());
        assert_eq!(record.granted_at, Some(T0));
        assert_eq!(entry.note.as_deref(), Some("no longer needed"));
        assert!(record.check_invariants().is_ok());
    }

    #[test]
    fn test_revoke_twice_is_invalid() {
        let revoked = apply_transition(
            &granted(),
            &Transition::Revoke { note: None },
            &Actor::party(id("G1")),
            T0,
        )
        .unwrap()
        .into_record();
        let err = apply_transition(
            &revoked,
            &Transition::Revoke { note: None },
            &Actor::party(id("G1")),
            T0,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_expire_guard() {
        let record = granted();
        let err =
            apply_transition(&record, &Transition::Expire, &Actor::Sweeper, T0 + HOUR - 1)
                .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));

        let next = apply_transition(&record, &Transition::Expire, &Actor::Sweeper, T0 + HOUR)
            .unwrap();
        assert!(next.is_applied());
        assert_eq!(next.record().status, Status::Expired);
    }

    #[test]
    fn test_expire_only_by_sweeper() {
        let err = apply_transition(
            &granted(),
            &Transition::Expire,
            &Actor::party(id("G1")),
            T0 + 2 * HOUR,
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::Forbidden { .. }));
    }

    #[test]
    fn test_expire_is_idempotent() {
        let expired = apply_transition(&granted(), &Transition::Expire, &Actor::Sweeper, T0 + HOUR)
            .unwrap()
            .into_record();
        let again =
            apply_transition(&expired, &Transition::Expire, &Actor::Sweeper, T0 + 2 * HOUR)
                .unwrap();
        assert_eq!(again, TransitionOutcome::Unchanged(expired));
    }

    #[test]
    fn test_requested_never_expires() {
        let err = apply_transition(&requested(), &Transition::Expire, &Actor::Sweeper, i64::MAX)
            .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn test_lagging_clock_does_not_backdate() {
        let record = granted();
        let next = apply_transition(
            &record,
            &Transition::Revoke { note: None },
            &Actor::party(id("R1")),
            T0 - 500,
        )
        .unwrap()
        .into_record();
        assert_eq!(next.revoked_at, Some(record.updated_at));
    }

    fn arb_step() -> impl Strategy<Value = (u8, u8, i64)> {
        (0u8..3, 0u8..4, 0i64..(3 * HOUR))
    }

    proptest! {
        #[test]
        fn test_status_follows_graph(steps in prop::collection::vec(arb_step(), 0..12)) {
            let mut record = requested();
            let mut now = T0;
            for (kind, who, dt) in steps {
                now += dt;
                let transition = match kind {
                    0 => grant(now + HOUR),
                    1 => Transition::Revoke { note: None },
                    _ => Transition::Expire,
                };
                let actor = match who {
                    0 => Actor::party(id("G1")),
                    1 => Actor::party(id("R1")),
                    2 => Actor::party(id("X")),
                    _ => Actor::Sweeper,
                };
                let before = record.status;
                if let Ok(outcome) = apply_transition(&record, &transition, &actor, now) {
                    let after = outcome.record().status;
                    let legal = before == after
                        || matches!(
                            (before, after),
                            (Status::Requested, Status::Granted)
                                | (Status::Requested, Status::Revoked)
                                | (Status::Granted, Status::Revoked)
                                | (Status::Granted, Status::Expired)
                        );
                    prop_assert!(legal, "{before} -> {after}");
                    if outcome.is_applied() {
                        prop_assert_ne!(before, after);
                    }
                    record = outcome.into_record();
                    prop_assert!(record.check_invariants().is_ok());
                }
            }
        }
    }
}
