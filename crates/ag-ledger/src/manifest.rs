// manifest.rs — The persisted manifest record.
//
// A manifest is the structured record of a proposed agent action. One row is
// written per validate call, approved or denied, and never touched again.
// `parameters` and `raw_manifest` are stored verbatim as JSON so the seal
// signs exactly what the agent submitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A proposed agent action, as validated and persisted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    /// Server-assigned identifier.
    pub manifest_id: Uuid,

    /// Server clock at validation time.
    pub created_at: DateTime<Utc>,

    pub agent_id: String,
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Provider tag, e.g. "stripe".
    pub provider: String,
    /// Method tag, e.g. "create_payment".
    pub method: String,
    /// Opaque to the gateway; passed through to the policy engine and
    /// preserved byte-for-byte under canonicalization.
    pub parameters: Value,

    /// The agent's stated justification.
    pub reasoning: String,
    /// Self-reported confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,

    /// Deployment environment tag, e.g. "production".
    pub environment: String,

    /// The full submission as received on the wire.
    pub raw_manifest: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn manifest_serialization_round_trip() {
        let manifest = Manifest {
            manifest_id: Uuid::new_v4(),
            created_at: Utc::now(),
            agent_id: "agent-1".into(),
            org_id: "org-1".into(),
            user_id: None,
            provider: "stripe".into(),
            method: "create_payment".into(),
            parameters: json!({"amount": 3500}),
            reasoning: "monthly invoice".into(),
            confidence_score: Some(0.95),
            environment: "production".into(),
            raw_manifest: json!({"action": {"provider": "stripe"}}),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        let restored: Manifest = serde_json::from_str(&json).unwrap();
        assert_eq!(manifest, restored);
    }

    #[test]
    fn absent_optionals_are_omitted() {
        let manifest = Manifest {
            manifest_id: Uuid::new_v4(),
            created_at: Utc::now(),
            agent_id: "a".into(),
            org_id: "o".into(),
            user_id: None,
            provider: "p".into(),
            method: "m".into(),
            parameters: json!({}),
            reasoning: "r".into(),
            confidence_score: None,
            environment: "staging".into(),
            raw_manifest: json!({}),
        };
        let json = serde_json::to_string(&manifest).unwrap();
        assert!(!json.contains("user_id"));
        assert!(!json.contains("confidence_score"));
    }
}
