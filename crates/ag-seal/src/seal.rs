// seal.rs — The seal record and signature verification.
//
// A seal is issued for every validated manifest, approved or not. All fields
// except (was_executed, executed_at) are frozen at issue time; the ledger
// enforces that with triggers. Signature verification here is pure — it
// rebuilds the signed payload from the seal's own fields and checks it
// against the embedded public key, never against a global key, so key
// rotation does not invalidate already-issued seals.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use ring::signature::{UnparsedPublicKey, ED25519};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::SealPayload;

/// Default seal lifetime: long enough to bridge normal execution latency,
/// short enough to bound the blast radius of a leaked seal.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Cryptographic evidence of a decision for exactly one manifest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seal {
    /// Opaque, globally unique identifier (`seal_<hex>`).
    pub seal_id: String,

    /// The manifest this seal attests to.
    pub manifest_id: Uuid,

    /// Whether the policy decision was an approval.
    pub approved: bool,

    /// The policy version that produced the decision.
    pub policy_version: String,

    /// Present iff `approved` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denial_reason: Option<String>,

    /// Base64 Ed25519 signature over the canonical payload.
    pub signature: String,

    /// Base64 Ed25519 public key of the issuer.
    pub public_key: String,

    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// One-time-use execution marker. Only ever transitions
    /// (false, None) → (true, Some(t)), enforced by the ledger.
    #[serde(default)]
    pub was_executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
}

/// Where a seal is in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealState {
    /// Unexpired and not yet executed.
    Fresh,
    /// Consumed; carries the execution timestamp.
    Executed(DateTime<Utc>),
    /// Past `expires_at` without having been executed.
    Expired,
}

impl Seal {
    /// The payload this seal's signature covers.
    pub fn payload(&self) -> SealPayload {
        SealPayload {
            manifest_id: self.manifest_id,
            approved: self.approved,
            policy_version: self.policy_version.clone(),
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            denial_reason: self.denial_reason.clone(),
        }
    }

    /// Check the Ed25519 signature against the embedded public key.
    ///
    /// Malformed base64 counts as invalid rather than an error: a tampered
    /// seal should report `valid=false`, not fail the request.
    pub fn signature_is_valid(&self) -> bool {
        let Ok(public_key) = BASE64.decode(&self.public_key) else {
            return false;
        };
        let Ok(signature) = BASE64.decode(&self.signature) else {
            return false;
        };
        let message = self.payload().canonical_bytes();
        UnparsedPublicKey::new(&ED25519, public_key)
            .verify(&message, &signature)
            .is_ok()
    }

    /// Whether the seal's TTL has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// The seal's lifecycle state at `now`. Execution takes precedence:
    /// a seal consumed before its TTL elapsed stays `Executed`.
    pub fn state_at(&self, now: DateTime<Utc>) -> SealState {
        match self.executed_at {
            Some(t) if self.was_executed => SealState::Executed(t),
            _ if self.is_expired_at(now) => SealState::Expired,
            _ => SealState::Fresh,
        }
    }
}
