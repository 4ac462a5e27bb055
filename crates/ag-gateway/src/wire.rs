// wire.rs — The client ↔ server wire contract.
//
// Every body shape is strict: unknown fields are rejected so the SDK and
// server cannot silently drift apart. Validation beyond shape (non-empty
// ids, confidence range) happens in `ManifestSubmission::validate` before
// any other work.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// A manifest submission: the agent's proposed action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ManifestSubmission {
    pub agent: AgentSection,
    pub action: ActionSection,
    pub justification: JustificationSection,
    /// Deployment environment tag, e.g. "production" or "staging".
    pub environment: String,
    /// Evaluate and sign, but skip the ledger append.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AgentSection {
    pub agent_id: String,
    pub org_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ActionSection {
    pub provider: String,
    pub method: String,
    /// Opaque to the gateway: passed to the policy engine and stored
    /// verbatim. An empty object is permitted.
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct JustificationSection {
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

impl ManifestSubmission {
    /// Field-level checks the type system can't express.
    pub fn validate(&self) -> Result<(), GatewayError> {
        fn required(field: &str, value: &str) -> Result<(), GatewayError> {
            if value.trim().is_empty() {
                return Err(GatewayError::Schema {
                    field: field.to_string(),
                    message: format!("{} must not be empty", field),
                });
            }
            Ok(())
        }

        required("agent.agent_id", &self.agent.agent_id)?;
        required("agent.org_id", &self.agent.org_id)?;
        required("action.provider", &self.action.provider)?;
        required("action.method", &self.action.method)?;
        required("environment", &self.environment)?;

        if !self.action.parameters.is_object() {
            return Err(GatewayError::Schema {
                field: "action.parameters".to_string(),
                message: "action.parameters must be an object".to_string(),
            });
        }
        if let Some(score) = self.justification.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(GatewayError::Schema {
                    field: "justification.confidence_score".to_string(),
                    message: "confidence_score must be within [0, 1]".to_string(),
                });
            }
        }
        Ok(())
    }
}
