//! Audit trail entries.
//!
//! The trail is append-only and derived from store writes: an entry is
//! produced by [`apply_transition`](crate::transition::apply_transition) and
//! persisted in the same atomic write as the record it describes. When the
//! trail and the record disagree, the record wins.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AuditError;
use crate::request::Status;
use crate::transition::Actor;
use crate::types::RequestId;

/// What happened to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Created,
    Granted,
    Revoked,
    Expired,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Granted => "granted",
            AuditAction::Revoked => "revoked",
            AuditAction::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(AuditAction::Created),
            "granted" => Some(AuditAction::Granted),
            "revoked" => Some(AuditAction::Revoked),
            "expired" => Some(AuditAction::Expired),
            _ => None,
        }
    }

    /// The status a request is in right after this action.
    pub fn resulting_status(&self) -> Status {
        match self {
            AuditAction::Created => Status::Requested,
            AuditAction::Granted => Status::Granted,
            AuditAction::Revoked => Status::Revoked,
            AuditAction::Expired => Status::Expired,
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub request_id: RequestId,
    pub action: AuditAction,
    pub actor: Actor,
    /// Unix ms.
    pub at: i64,
    pub note: Option<String>,
}

impl AuditEntry {
    /// The entry appended when a request is created.
    pub fn created(request_id: RequestId, actor: Actor, at: i64) -> Self {
        Self {
            request_id,
            action: AuditAction::Created,
            actor,
            at,
            note: None,
        }
    }
}

/// The ordered audit trail of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditTrail {
    pub request_id: RequestId,
    pub entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new(request_id: RequestId, entries: Vec<AuditEntry>) -> Self {
        Self {
            request_id,
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Status implied by replaying the trail.
    pub fn replay_status(&self) -> Result<Status, AuditError> {
        for entry in &self.entries {
            if entry.request_id != self.request_id {
                return Err(AuditError::ForeignEntry {
                    expected: self.request_id.to_hex(),
                    found: entry.request_id.to_hex(),
                });
            }
        }
        replay_status(&self.entries)
    }

    /// Blake3 fingerprint of the trail, hex-encoded.
    ///
    /// Pollers compare digests to tell whether anything was appended.
    pub fn digest(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.request_id.as_bytes());
        for entry in &self.entries {
            hasher.update(&[0x1e]);
            hasher.update(entry.action.as_str().as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(entry.actor.to_string().as_bytes());
            hasher.update(&[0x1f]);
            hasher.update(&entry.at.to_be_bytes());
            if let Some(note) = &entry.note {
                hasher.update(&[0x1f]);
                hasher.update(note.as_bytes());
            }
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// Reconstruct a request's status purely from its audit entries.
pub fn replay_status(entries: &[AuditEntry]) -> Result<Status, AuditError> {
    let (first, rest) = entries.split_first().ok_or(AuditError::EmptyTrail)?;
    if first.action != AuditAction::Created {
        return Err(AuditError::MissingCreated);
    }

    let mut status = Status::Requested;
    for entry in rest {
        let legal = matches!(
            (status, entry.action),
            (Status::Requested, AuditAction::Granted)
                | (Status::Requested, AuditAction::Revoked)
                | (Status::Granted, AuditAction::Revoked)
                | (Status::Granted, AuditAction::Expired)
        );
        if !legal {
            return Err(AuditError::IllegalStep {
                from: status,
                action: entry.action.to_string(),
            });
        }
        status = entry.action.resulting_status();
    }
    Ok(status)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::IdentityRef;

    fn entry(action: AuditAction, at: i64) -> AuditEntry {
        AuditEntry {
            request_id: RequestId::from_bytes([3; 16]),
            action,
            actor: Actor::Party(IdentityRef::parse("G1").unwrap()),
            at,
            note: None,
        }
    }

    #[test]
    fn test_replay_follows_actions() {
        let trail = vec![
            entry(AuditAction::Created, 1),
            entry(AuditAction::Granted, 2),
            entry(AuditAction::Expired, 3),
        ];
        assert_eq!(replay_status(&trail), Ok(Status::Expired));
        assert_eq!(replay_status(&trail[..1]), Ok(Status::Requested));
    }

    #[test]
    fn test_replay_rejects_bad_trails() {
        assert_eq!(replay_status(&[]), Err(AuditError::EmptyTrail));
        assert_eq!(
            replay_status(&[entry(AuditAction::Granted, 1)]),
            Err(AuditError::MissingCreated)
        );
        assert!(matches!(
            replay_status(&[entry(AuditAction::Created, 1), entry(AuditAction::Expired, 2)]),
            Err(AuditError::IllegalStep { .. })
        ));
    }

    #[test]
    fn test_digest_changes_on_append() {
        let id = RequestId::from_bytes([3; 16]);
        let mut trail = AuditTrail::new(id, vec![entry(AuditAction::Created, 1)]);
        let before = trail.digest();
        assert_eq!(before, trail.digest());
        trail.entries.push(entry(AuditAction::Granted, 2));
        assert_ne!(before, trail.digest());
        assert_eq!(trail.digest().len(), 64);
    }

    #[test]
    fn test_entry_json_shape() {
        let json = serde_json::to_value(entry(AuditAction::Created, 5)).unwrap();
        assert_eq!(json["action"], "created");
        assert_eq!(json["actor"]["type"], "party");
        assert_eq!(json["actor"]["identity"], "G1");
    }
}
