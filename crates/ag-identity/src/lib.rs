//! # ag-identity
//!
//! Multi-tenant identity for AgentGate: organizations own agents, agents
//! hold credentials, and bearer tokens guard the mutating endpoints.
//!
//! Two credential forms:
//! - short-lived HS256 JWTs carrying `{sub, org, scope, iat, exp}`
//! - optional long-lived API keys, stored only as SHA-256 hashes and
//!   compared in constant time
//!
//! Registry state (active flags, org membership) lives in the ledger; this
//! crate owns registration, token issuance, and validation logic.

pub mod error;
pub mod service;
pub mod token;

pub use error::IdentityError;
pub use service::{
    hash_api_key, AgentRegistration, AuthContext, IdentityService, OrgRegistration,
};
pub use token::{Claims, TokenSigner, DEFAULT_TOKEN_TTL_SECS};
