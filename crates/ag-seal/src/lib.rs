//! # ag-seal
//!
//! Seal issuance and verification for AgentGate.
//!
//! A seal is the cryptographic evidence of an authorization decision: an
//! Ed25519 signature over the canonical serialization of the decision
//! payload, bounded by a TTL and consumable exactly once. Approved seals
//! authorize downstream execution; denied seals are evidentiary only.
//!
//! Signature validity is reproducible from the seal's own fields — verifiers
//! rebuild the signed payload and check it against the public key carried in
//! the seal, so no server round-trip is needed for that half of verification.
//! Execution state lives in the ledger and is composed in by the gateway.

pub mod error;
pub mod payload;
pub mod seal;
pub mod signer;

pub use error::SealError;
pub use payload::SealPayload;
pub use seal::{Seal, SealState, DEFAULT_TTL_SECS};
pub use signer::{generate_pkcs8_key, generate_seal_id, SealSigner};
