// error.rs — Error types for identity operations.

use thiserror::Error;

/// Errors from registration, token issuance, or validation.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Token encoding/decoding failed: bad signature, expired, malformed.
    #[error("token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    /// The token's agent is unknown or deactivated.
    #[error("unknown or inactive agent '{agent_id}'")]
    AgentNotActive { agent_id: String },

    /// The token's organization is unknown or deactivated.
    #[error("unknown or inactive organization '{org_id}'")]
    OrganizationNotActive { org_id: String },

    /// Registry persistence failed.
    #[error(transparent)]
    Ledger(#[from] ag_ledger::LedgerError),
}
