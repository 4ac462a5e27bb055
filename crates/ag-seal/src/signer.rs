// signer.rs — Seal issuance with a process-wide Ed25519 key.
//
// One active signing key per deployment, provisioned out of band as a PKCS#8
// file and read-only after startup. The private key never leaves this module;
// everything else in the system sees only the base64 public key carried on
// each seal.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use ring::rand::SystemRandom;
use ring::signature::{Ed25519KeyPair, KeyPair};
use uuid::Uuid;

use crate::error::SealError;
use crate::payload::{truncate_to_micros, SealPayload};
use crate::seal::Seal;

/// Generate a fresh Ed25519 key as a PKCS#8 v2 document.
///
/// Used by the server's `keygen` command; the bytes are written to disk by
/// the caller and loaded back with [`SealSigner::from_key_file`].
pub fn generate_pkcs8_key() -> Result<Vec<u8>, SealError> {
    let rng = SystemRandom::new();
    let document = Ed25519KeyPair::generate_pkcs8(&rng).map_err(|_| SealError::KeyGeneration)?;
    Ok(document.as_ref().to_vec())
}

/// Generate a collision-resistant opaque seal identifier.
///
/// 128 bits of RNG output rendered as `seal_<32 hex chars>`.
pub fn generate_seal_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
    format!("seal_{}", hex)
}

/// Issues seals signed with the deployment's Ed25519 key.
pub struct SealSigner {
    keypair: Ed25519KeyPair,
    public_key_b64: String,
    ttl: Duration,
}

// Manual Debug: never render key material.
impl fmt::Debug for SealSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SealSigner")
            .field("public_key", &self.public_key_b64)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl SealSigner {
    /// Build a signer from PKCS#8 key bytes.
    pub fn from_pkcs8(pkcs8: &[u8], ttl: Duration) -> Result<Self, SealError> {
        let keypair = Ed25519KeyPair::from_pkcs8(pkcs8)
            .map_err(|e| SealError::KeyRejected(e.to_string()))?;
        let public_key_b64 = BASE64.encode(keypair.public_key().as_ref());
        Ok(Self {
            keypair,
            public_key_b64,
            ttl,
        })
    }

    /// Build a signer from a PKCS#8 key file on disk.
    pub fn from_key_file(path: impl AsRef<Path>, ttl: Duration) -> Result<Self, SealError> {
        let path = path.as_ref();
        let pkcs8 = std::fs::read(path).map_err(|source| SealError::KeyFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pkcs8(&pkcs8, ttl)
    }

    /// Generate an ephemeral signer. Test and bootstrap convenience; real
    /// deployments load a provisioned key so seals survive restarts.
    pub fn generate(ttl: Duration) -> Result<Self, SealError> {
        let pkcs8 = generate_pkcs8_key()?;
        Self::from_pkcs8(&pkcs8, ttl)
    }

    /// The issuer's public key, base64 encoded.
    pub fn public_key_b64(&self) -> &str {
        &self.public_key_b64
    }

    /// The configured seal TTL.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Issue a seal for a decision.
    ///
    /// Called for denials too — a denied seal is evidentiary: signed and
    /// ledgered, but no executor will honor it.
    pub fn issue(
        &self,
        manifest_id: Uuid,
        approved: bool,
        policy_version: &str,
        denial_reason: Option<String>,
    ) -> Seal {
        let issued_at = truncate_to_micros(Utc::now());
        let expires_at = issued_at
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::seconds(
                crate::seal::DEFAULT_TTL_SECS as i64,
            ));

        let payload = SealPayload {
            manifest_id,
            approved,
            policy_version: policy_version.to_string(),
            issued_at,
            expires_at,
            denial_reason: denial_reason.clone(),
        };
        let signature = self.keypair.sign(&payload.canonical_bytes());

        Seal {
            seal_id: generate_seal_id(),
            manifest_id,
            approved,
            policy_version: policy_version.to_string(),
            denial_reason,
            signature: BASE64.encode(signature.as_ref()),
            public_key: self.public_key_b64.clone(),
            issued_at,
            expires_at,
            was_executed: false,
            executed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn seal_id_format_and_uniqueness() {
        let ids: HashSet<String> = (0..100).map(|_| generate_seal_id()).collect();
        assert_eq!(ids.len(), 100);
        for id in &ids {
            assert!(id.starts_with("seal_"));
            assert_eq!(id.len(), "seal_".len() + 32);
            assert!(id["seal_".len()..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn ttl_sets_expiry_window() {
        let signer = SealSigner::generate(Duration::from_secs(300)).unwrap();
        let seal = signer.issue(Uuid::new_v4(), true, "sha256:aaaa", None);
        assert_eq!(seal.expires_at - seal.issued_at, chrono::Duration::minutes(5));
    }

    #[test]
    fn key_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("seal.pk8");
        std::fs::write(&key_path, generate_pkcs8_key().unwrap()).unwrap();

        let signer = SealSigner::from_key_file(&key_path, Duration::from_secs(300)).unwrap();
        let seal = signer.issue(Uuid::new_v4(), true, "sha256:aaaa", None);
        assert!(seal.signature_is_valid());
    }

    #[test]
    fn missing_key_file_is_an_error() {
        let result = SealSigner::from_key_file("/nonexistent/seal.pk8", Duration::from_secs(300));
        assert!(matches!(result, Err(SealError::KeyFile { .. })));
    }

    #[test]
    fn garbage_key_material_is_rejected() {
        let result = SealSigner::from_pkcs8(b"not a key", Duration::from_secs(300));
        assert!(matches!(result, Err(SealError::KeyRejected(_))));
    }

    #[test]
    fn two_signers_have_distinct_public_keys() {
        let a = SealSigner::generate(Duration::from_secs(300)).unwrap();
        let b = SealSigner::generate(Duration::from_secs(300)).unwrap();
        assert_ne!(a.public_key_b64(), b.public_key_b64());
    }

    #[test]
    fn seal_carries_issuing_key() {
        let signer = SealSigner::generate(Duration::from_secs(300)).unwrap();
        let seal = signer.issue(Uuid::new_v4(), false, "sha256:bbbb", Some("nope".into()));
        assert_eq!(seal.public_key, signer.public_key_b64());
    }

    #[test]
    fn debug_does_not_leak_key_material() {
        let signer = SealSigner::generate(Duration::from_secs(300)).unwrap();
        let rendered = format!("{:?}", signer);
        assert!(rendered.contains("public_key"));
        assert!(!rendered.contains("keypair"));
    }
}
