// registry.rs — Organization and agent records.
//
// Both live in the ledger database; the store restricts updates to the
// `active` flag and refuses deletion, so identity history is as durable as
// decision history. The identity crate owns registration and credential
// logic; these are just the persisted shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tenant. Created once via the bootstrap endpoint, deactivated but never
/// deleted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organization {
    pub org_id: String,
    pub name: String,
    pub contact_email: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

/// An agent, scoped to exactly one organization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub agent_id: String,
    pub org_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// SHA-256 hex of an optional long-lived API key. Never the key itself.
    #[serde(skip_serializing, default)]
    pub api_key_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_hash_never_serializes() {
        let agent = Agent {
            agent_id: "agent-1".into(),
            org_id: "org-1".into(),
            name: "deploy bot".into(),
            description: None,
            api_key_hash: Some("ab".repeat(32)),
            created_at: Utc::now(),
            active: true,
        };
        let json = serde_json::to_string(&agent).unwrap();
        assert!(!json.contains("api_key_hash"));
        assert!(!json.contains(&"ab".repeat(32)));
    }
}
