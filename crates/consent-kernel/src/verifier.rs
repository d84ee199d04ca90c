//! Pluggable identity verification.
//!
//! Before every operation that acts as an identity, the engine builds a
//! [`Challenge`] naming the operation, its target, the claimed identity,
//! and the proof's timestamp and nonce. It then asks an
//! [`IdentityVerifier`] whether the signature over it is valid. The caller
//! never chooses the signed bytes, so a proof seen for one operation does
//! not carry over to another. The engine also rejects stale proofs and
//! spent nonces.
//!
//! The default, [`TrustingVerifier`], accepts any well-formed identity
//! unchecked. [`Ed25519Verifier`] requires a signature from the key the
//! identity names.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Mutex, PoisonError};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use consent_kernel_core::IdentityRef;

/// Domain tag prefixed to every challenge.
const CHALLENGE_DOMAIN: &str = "consent-kernel/v1";

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 16;

/// The operation a proof authorizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofScope {
    Create,
    Grant,
    Revoke,
    RegisterDocument,
    CheckAccess,
    ListAccessible,
}

impl ProofScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProofScope::Create => "create",
            ProofScope::Grant => "grant",
            ProofScope::Revoke => "revoke",
            ProofScope::RegisterDocument => "register_document",
            ProofScope::CheckAccess => "check_access",
            ProofScope::ListAccessible => "list_accessible",
        }
    }
}

impl fmt::Display for ProofScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evidence that the caller controls an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProof {
    /// When the proof was made, Unix ms.
    pub issued_at: i64,
    /// Single-use random value, hex-encoded.
    pub nonce: String,
    /// Signature over the [`Challenge`] bytes, hex-encoded.
    pub signature: String,
}

/// The exact statement a proof signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scope: ProofScope,
    /// What the operation targets: a request id, a content address, or the
    /// counterparty of a new request.
    pub subject: String,
    pub identity: IdentityRef,
    pub issued_at: i64,
    pub nonce: String,
}

impl Challenge {
    /// A challenge with a fresh random nonce.
    pub fn new(
        scope: ProofScope,
        subject: impl Into<String>,
        identity: IdentityRef,
        issued_at: i64,
    ) -> Self {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        Self {
            scope,
            subject: subject.into(),
            identity,
            issued_at,
            nonce: hex::encode(nonce),
        }
    }

    /// Rebuild the challenge a proof must have signed.
    pub fn for_proof(
        scope: ProofScope,
        subject: impl Into<String>,
        identity: IdentityRef,
        proof: &IdentityProof,
    ) -> Result<Self, VerifyError> {
        let nonce = hex::decode(&proof.nonce)
            .map_err(|e| VerifyError::MalformedProof(format!("nonce: {e}")))?;
        if nonce.len() != NONCE_LEN {
            return Err(VerifyError::MalformedProof(format!(
                "nonce must be {NONCE_LEN} bytes"
            )));
        }
        Ok(Self {
            scope,
            subject: subject.into(),
            identity,
            issued_at: proof.issued_at,
            nonce: proof.nonce.to_ascii_lowercase(),
        })
    }

    /// Canonical bytes: newline-separated fields after a domain tag.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "{CHALLENGE_DOMAIN}\n{}\n{}\n{}\n{}\n{}",
            self.scope, self.subject, self.identity, self.issued_at, self.nonce
        )
        .into_bytes()
    }

    /// Sign with an Ed25519 key. Client-side helper.
    pub fn sign(&self, key: &SigningKey) -> IdentityProof {
        IdentityProof {
            issued_at: self.issued_at,
            nonce: self.nonce.clone(),
            signature: hex::encode(key.sign(&self.to_bytes()).to_bytes()),
        }
    }
}

/// Why a claimed identity was not accepted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("no identity proof supplied for {0}")]
    MissingProof(String),

    #[error("identity {0} is not a verifiable public key")]
    InvalidKey(String),

    #[error("malformed proof: {0}")]
    MalformedProof(String),

    #[error("signature does not verify for {0}")]
    BadSignature(String),

    #[error("proof issued at {issued_at} is outside the window at {now}")]
    Stale { issued_at: i64, now: i64 },

    #[error("proof nonce already used by {0}")]
    Replayed(String),
}

/// Checks that a caller legitimately controls the identity it claims.
pub trait IdentityVerifier: Send + Sync + Debug {
    /// Whether a caller without a proof is turned away.
    fn requires_proof(&self) -> bool {
        true
    }

    /// Check `signature` over `challenge` for `challenge.identity`.
    fn verify(&self, challenge: &Challenge, signature: &str) -> Result<(), VerifyError>;
}

/// Accepts every identity as asserted.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustingVerifier;

impl IdentityVerifier for TrustingVerifier {
    fn requires_proof(&self) -> bool {
        false
    }

    fn verify(&self, _: &Challenge, _: &str) -> Result<(), VerifyError> {
        Ok(())
    }
}

/// Treats the identity as a hex Ed25519 public key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ed25519Verifier;

impl IdentityVerifier for Ed25519Verifier {
    fn verify(&self, challenge: &Challenge, signature: &str) -> Result<(), VerifyError> {
        let claimed = &challenge.identity;
        let key_bytes: [u8; 32] = hex::decode(claimed.as_str())
            .ok()
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| VerifyError::InvalidKey(claimed.to_string()))?;
        let key = VerifyingKey::from_bytes(&key_bytes)
            .map_err(|_| VerifyError::InvalidKey(claimed.to_string()))?;

        let sig_bytes: [u8; 64] = hex::decode(signature)
            .map_err(|e| VerifyError::MalformedProof(format!("signature: {e}")))?
            .try_into()
            .map_err(|_| VerifyError::MalformedProof("signature must be 64 bytes".into()))?;
        let signature = Signature::from_bytes(&sig_bytes);

        key.verify(&challenge.to_bytes(), &signature)
            .map_err(|_| VerifyError::BadSignature(claimed.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Replay protection
// ─────────────────────────────────────────────────────────────────────────────

/// Freshness window plus the nonces spent inside it.
///
/// A nonce is remembered until its proof falls out of the window, after
/// which the freshness check alone rejects it. Process-local.
#[derive(Debug)]
pub(crate) struct ReplayGuard {
    window_ms: i64,
    spent: Mutex<HashMap<(IdentityRef, String), i64>>,
}

impl ReplayGuard {
    pub(crate) fn new(window_ms: i64) -> Self {
        Self {
            window_ms,
            spent: Mutex::new(HashMap::new()),
        }
    }

    /// Reject a proof outside the window. Cheap; runs before the signature.
    pub(crate) fn check_fresh(&self, issued_at: i64, now: i64) -> Result<(), VerifyError> {
        if issued_at.abs_diff(now) > self.window_ms.unsigned_abs() {
            return Err(VerifyError::Stale { issued_at, now });
        }
        Ok(())
    }

    /// Spend the challenge's nonce. Fails if it was spent already.
    pub(crate) fn spend(&self, challenge: &Challenge, now: i64) -> Result<(), VerifyError> {
        // A poisoned map is still consistent.
        let mut spent = self.spent.lock().unwrap_or_else(PoisonError::into_inner);
        let horizon = now.saturating_sub(self.window_ms);
        spent.retain(|_, issued_at| *issued_at >= horizon);

        let key = (challenge.identity.clone(), challenge.nonce.clone());
        if spent.contains_key(&key) {
            return Err(VerifyError::Replayed(challenge.identity.to_string()));
        }
        spent.insert(key, challenge.issued_at);
        Ok(())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.spent.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    fn key_identity(key: &SigningKey) -> IdentityRef {
        IdentityRef::parse(hex::encode(key.verifying_key().to_bytes())).unwrap()
    }

    fn challenge_for(key: &SigningKey, scope: ProofScope, subject: &str) -> Challenge {
        Challenge::new(scope, subject, key_identity(key), NOW)
    }

    #[test]
    fn test_trusting_accepts_anything() {
        let id = IdentityRef::parse("ALGO7XK2").unwrap();
        let challenge = Challenge::new(ProofScope::Grant, "r", id, NOW);
        assert!(!TrustingVerifier.requires_proof());
        assert!(TrustingVerifier.verify(&challenge, "").is_ok());
    }

    #[test]
    fn test_ed25519_roundtrip() {
        let key = SigningKey::generate(&mut OsRng);
        let challenge = challenge_for(&key, ProofScope::Grant, "0011");
        let proof = challenge.sign(&key);

        let rebuilt =
            Challenge::for_proof(ProofScope::Grant, "0011", key_identity(&key), &proof).unwrap();
        assert_eq!(rebuilt, challenge);
        assert!(Ed25519Verifier.verify(&rebuilt, &proof.signature).is_ok());
    }

    #[test]
    fn test_ed25519_rejects_other_scope_or_subject() {
        let key = SigningKey::generate(&mut OsRng);
        let proof = challenge_for(&key, ProofScope::Grant, "0011").sign(&key);

        for (scope, subject) in [(ProofScope::Revoke, "0011"), (ProofScope::Grant, "0022")] {
            let rebuilt = Challenge::for_proof(scope, subject, key_identity(&key), &proof).unwrap();
            assert!(matches!(
                Ed25519Verifier.verify(&rebuilt, &proof.signature),
                Err(VerifyError::BadSignature(_))
            ));
        }
    }

    #[test]
    fn test_ed25519_rejects_wrong_key() {
        let key = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let proof = challenge_for(&key, ProofScope::Grant, "0011").sign(&key);
        let rebuilt =
            Challenge::for_proof(ProofScope::Grant, "0011", key_identity(&other), &proof).unwrap();
        assert!(matches!(
            Ed25519Verifier.verify(&rebuilt, &proof.signature),
            Err(VerifyError::BadSignature(_))
        ));
    }

    #[test]
    fn test_ed25519_requires_key_and_nonce() {
        assert!(Ed25519Verifier.requires_proof());

        let id = IdentityRef::parse("not-a-key").unwrap();
        let challenge = Challenge::new(ProofScope::Revoke, "r", id.clone(), NOW);
        assert!(matches!(
            Ed25519Verifier.verify(&challenge, "00"),
            Err(VerifyError::InvalidKey(_))
        ));

        let short = IdentityProof {
            issued_at: NOW,
            nonce: "abcd".into(),
            signature: "00".into(),
        };
        assert!(matches!(
            Challenge::for_proof(ProofScope::Revoke, "r", id, &short),
            Err(VerifyError::MalformedProof(_))
        ));
    }

    #[test]
    fn test_replay_guard_window() {
        let guard = ReplayGuard::new(1000);
        assert!(guard.check_fresh(NOW - 1000, NOW).is_ok());
        assert!(guard.check_fresh(NOW + 1000, NOW).is_ok());
        assert!(matches!(
            guard.check_fresh(NOW - 1001, NOW),
            Err(VerifyError::Stale { .. })
        ));
    }

    #[test]
    fn test_replay_guard_spends_once_and_prunes() {
        let guard = ReplayGuard::new(1000);
        let id = IdentityRef::parse("ALGO7XK2").unwrap();
        let first = Challenge::new(ProofScope::Revoke, "r", id.clone(), NOW);

        guard.spend(&first, NOW).unwrap();
        assert!(matches!(
            guard.spend(&first, NOW + 10),
            Err(VerifyError::Replayed(_))
        ));

        // Same nonce from another identity is a different key.
        let mut other = first.clone();
        other.identity = IdentityRef::parse("ALGO9ZZ1").unwrap();
        guard.spend(&other, NOW).unwrap();
        assert_eq!(guard.len(), 2);

        let later = Challenge::new(ProofScope::Revoke, "r", id, NOW + 5000);
        guard.spend(&later, NOW + 5000).unwrap();
        assert_eq!(guard.len(), 1);
    }
}
