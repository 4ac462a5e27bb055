// decision.rs — Evaluation input and the decision sum type.
//
// Decision is a closed set of outcomes so the orchestrator branches on
// variants, not strings. EngineUnavailable is deliberately its own variant
// rather than a Deny: it is the only category that silently becomes a denial
// instead of a 5xx, and callers sometimes need to tell the two apart (health
// reporting, logging).

use serde::Serialize;
use serde_json::Value;

/// Denial reason recorded when the engine cannot be reached.
pub const UNAVAILABLE_REASON: &str = "policy engine unavailable";

/// Policy version recorded when no version is known.
pub const UNKNOWN_VERSION: &str = "unknown";

/// The manifest projection sent to the engine as query input.
///
/// Mirrors the wire contract's `{agent, action, justification, environment}`
/// shape; defined here rather than imported from the gateway to keep the
/// dependency graph clean.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EvalInput {
    pub agent: AgentRef,
    pub action: ActionRef,
    pub justification: JustificationRef,
    pub environment: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentRef {
    pub agent_id: String,
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ActionRef {
    pub provider: String,
    pub method: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JustificationRef {
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence_score: Option<f64>,
}

/// The outcome of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The policy allowed the action.
    Approve {
        policy_version: String,
        matched_rules: Vec<String>,
    },
    /// The policy denied the action (including default deny).
    Deny {
        policy_version: String,
        reason: String,
        matched_rules: Vec<String>,
    },
    /// The engine was unreachable, timed out, or answered malformed output.
    /// Treated as a denial by the orchestrator; still ledgered.
    EngineUnavailable,
}

impl Decision {
    pub fn approved(&self) -> bool {
        matches!(self, Decision::Approve { .. })
    }

    /// The policy version to record on the manifest.
    pub fn policy_version(&self) -> &str {
        match self {
            Decision::Approve { policy_version, .. } | Decision::Deny { policy_version, .. } => {
                policy_version
            }
            Decision::EngineUnavailable => UNKNOWN_VERSION,
        }
    }

    /// The denial reason, when there is one.
    pub fn denial_reason(&self) -> Option<&str> {
        match self {
            Decision::Approve { .. } => None,
            Decision::Deny { reason, .. } => Some(reason),
            Decision::EngineUnavailable => Some(UNAVAILABLE_REASON),
        }
    }

    /// Rule ids the engine reported as matched.
    pub fn matched_rules(&self) -> &[String] {
        match self {
            Decision::Approve { matched_rules, .. } | Decision::Deny { matched_rules, .. } => {
                matched_rules
            }
            Decision::EngineUnavailable => &[],
        }
    }
}
