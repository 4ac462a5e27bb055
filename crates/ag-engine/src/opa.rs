// opa.rs — OPA-backed policy evaluation.
//
// The adapter owns the three OPA RPCs the gateway uses:
//   PUT  /v1/policies/<name>           — upload the compiled Rego module
//   POST /v1/data/agentgate/authz/result — evaluate one manifest projection
//   GET  /health                        — reachability probe
//
// The loaded-policy cache is an immutable Arc swapped under a std RwLock:
// the hot path takes a read lock for a clone of the Arc and never blocks
// other readers; reload is the single writer.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use crate::backend::{EngineHealth, LoadedPolicy, PolicyBackend};
use crate::decision::{Decision, EvalInput, UNKNOWN_VERSION};
use crate::error::EngineError;

/// Default evaluation deadline.
pub const DEFAULT_EVAL_DEADLINE: Duration = Duration::from_secs(2);

/// Connection settings for the OPA adapter.
#[derive(Debug, Clone)]
pub struct OpaConfig {
    /// Base URL of the OPA server, e.g. `http://127.0.0.1:8181`.
    pub base_url: String,
    /// Name the compiled module is uploaded under.
    pub policy_name: String,
    /// Path to the declarative policy source (YAML).
    pub source_path: PathBuf,
    /// Per-evaluation deadline. Blown deadlines are denials, not retries.
    pub eval_deadline: Duration,
}

/// OPA implementation of [`PolicyBackend`].
pub struct OpaBackend {
    http: reqwest::Client,
    config: OpaConfig,
    loaded: RwLock<Option<Arc<LoadedPolicy>>>,
}

impl OpaBackend {
    pub fn new(config: OpaConfig) -> Result<Self, EngineError> {
        let http = reqwest::Client::builder()
            .timeout(config.eval_deadline)
            .build()?;
        Ok(Self {
            http,
            config,
            loaded: RwLock::new(None),
        })
    }

    fn data_url(&self) -> String {
        format!(
            "{}/v1/data/{}",
            self.config.base_url.trim_end_matches('/'),
            ag_policy::compiler::RESULT_DATA_PATH
        )
    }

    fn policy_url(&self) -> String {
        format!(
            "{}/v1/policies/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.policy_name
        )
    }

    fn cached_version(&self) -> Option<String> {
        self.loaded
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|p| p.version.clone()))
    }

    /// Note a version observed in an engine response. If it differs from the
    /// cache (another loader raced us, or the engine restarted with a
    /// different bundle), adopt the engine's version — it is the authority
    /// for what actually decided the manifest.
    fn observe_version(&self, engine_version: &str) {
        let drifted = match self.cached_version() {
            Some(cached) => cached != engine_version,
            None => true,
        };
        if drifted && engine_version != UNKNOWN_VERSION {
            tracing::warn!(
                engine_version,
                "policy version drift observed; adopting engine version"
            );
            if let Ok(mut guard) = self.loaded.write() {
                *guard = Some(Arc::new(LoadedPolicy {
                    version: engine_version.to_string(),
                    loaded_at: Utc::now(),
                    rule_count: guard.as_ref().map(|p| p.rule_count).unwrap_or(0),
                }));
            }
        }
    }
}

#[async_trait]
impl PolicyBackend for OpaBackend {
    async fn evaluate(&self, input: &EvalInput) -> Decision {
        let body = json!({ "input": input });
        let response = match self.http.post(self.data_url()).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "policy engine unreachable");
                return Decision::EngineUnavailable;
            }
        };
        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "policy engine returned error status");
            return Decision::EngineUnavailable;
        }
        let document: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "policy engine returned malformed body");
                return Decision::EngineUnavailable;
            }
        };

        let decision = decision_from_document(&document);
        if let Decision::Approve { policy_version, .. } | Decision::Deny { policy_version, .. } =
            &decision
        {
            self.observe_version(policy_version);
        }
        decision
    }

    async fn reload(&self) -> Result<LoadedPolicy, EngineError> {
        let source = tokio::fs::read_to_string(&self.config.source_path)
            .await
            .map_err(|source| EngineError::SourceRead {
                path: self.config.source_path.clone(),
                source,
            })?;
        let compiled = ag_policy::compile(&source)?;

        let response = self
            .http
            .put(self.policy_url())
            .header("content-type", "text/plain")
            .body(compiled.rego.clone())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::UploadRejected { status, body });
        }

        let policy = LoadedPolicy {
            version: compiled.version.clone(),
            loaded_at: Utc::now(),
            rule_count: compiled.rule_ids.len(),
        };
        // Single-writer swap; in-flight evaluations keep their Arc.
        if let Ok(mut guard) = self.loaded.write() {
            *guard = Some(Arc::new(policy.clone()));
        }
        tracing::info!(version = %policy.version, rules = policy.rule_count, "policy reloaded");
        Ok(policy)
    }

    async fn health(&self) -> EngineHealth {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));
        let available = match self.http.get(url).send().await {
            Ok(r) => r.status().is_success(),
            Err(_) => false,
        };
        let loaded = self.loaded_policy();
        EngineHealth {
            available,
            policy_loaded: loaded.is_some(),
            policy_version: loaded.map(|p| p.version),
        }
    }

    fn loaded_policy(&self) -> Option<LoadedPolicy> {
        self.loaded
            .read()
            .ok()
            .and_then(|guard| guard.as_ref().map(|p| (**p).clone()))
    }
}

/// Map an OPA data-API response document to a decision.
///
/// OPA answers `{"result": {...}}`; a missing `result` means no policy is
/// loaded at the entrypoint, which is indistinguishable from an engine
/// misconfiguration and handled fail-closed.
fn decision_from_document(document: &Value) -> Decision {
    let Some(result) = document.get("result") else {
        tracing::warn!("policy engine response missing result (no policy loaded?)");
        return Decision::EngineUnavailable;
    };
    let Some(allow) = result.get("allow").and_then(Value::as_bool) else {
        tracing::warn!("policy engine result missing allow flag");
        return Decision::EngineUnavailable;
    };

    let policy_version = result
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_VERSION)
        .to_string();
    let matched_rules: Vec<String> = result
        .get("matched_rules")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    if allow {
        Decision::Approve {
            policy_version,
            matched_rules,
        }
    } else {
        let deny_reasons: Vec<&str> = result
            .get("deny_reasons")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let reason = if deny_reasons.is_empty() {
            "no policy rule allowed this action".to_string()
        } else {
            deny_reasons.join("; ")
        };
        Decision::Deny {
            policy_version,
            reason,
            matched_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn allow_document_maps_to_approve() {
        let document = json!({
            "result": {
                "allow": true,
                "deny_reasons": [],
                "matched_rules": ["allow-small-payments"],
                "version": "sha256:abcd"
            }
        });
        let decision = decision_from_document(&document);
        assert_eq!(
            decision,
            Decision::Approve {
                policy_version: "sha256:abcd".into(),
                matched_rules: vec!["allow-small-payments".into()],
            }
        );
    }

    #[test]
    fn deny_document_joins_reasons() {
        let document = json!({
            "result": {
                "allow": false,
                "deny_reasons": ["Payment amount exceeds $50.00 limit"],
                "matched_rules": ["deny-large-payments"],
                "version": "sha256:abcd"
            }
        });
        match decision_from_document(&document) {
            Decision::Deny { reason, .. } => {
                assert_eq!(reason, "Payment amount exceeds $50.00 limit");
            }
            other => panic!("expected Deny, got {:?}", other),
        }
    }

    #[test]
    fn default_deny_gets_generic_reason() {
        let document = json!({
            "result": {
                "allow": false,
                "deny_reasons": [],
                "matched_rules": [],
                "version": "sha256:abcd"
            }
        });
        match decision_from_document(&document) {
            Decision::Deny { reason, .. } => {
                assert_eq!(reason, "no policy rule allowed this action");
            }
            other => panic!("expected Deny, got {:?}", other),
        }
    }

    #[test]
    fn missing_result_is_unavailable() {
        assert_eq!(
            decision_from_document(&json!({})),
            Decision::EngineUnavailable
        );
    }

    #[test]
    fn malformed_result_is_unavailable() {
        let document = json!({"result": {"allow": "yes"}});
        assert_eq!(
            decision_from_document(&document),
            Decision::EngineUnavailable
        );
    }

    #[test]
    fn missing_version_falls_back_to_unknown() {
        let document = json!({"result": {"allow": true}});
        match decision_from_document(&document) {
            Decision::Approve { policy_version, .. } => {
                assert_eq!(policy_version, UNKNOWN_VERSION);
            }
            other => panic!("expected Approve, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unreachable_engine_is_unavailable_not_an_error() {
        // Nothing listens on this port; the request fails fast.
        let backend = OpaBackend::new(OpaConfig {
            base_url: "http://127.0.0.1:1".into(),
            policy_name: "agentgate".into(),
            source_path: "/nonexistent.yaml".into(),
            eval_deadline: Duration::from_millis(200),
        })
        .unwrap();

        let input = EvalInput {
            agent: crate::decision::AgentRef {
                agent_id: "a".into(),
                org_id: "o".into(),
                user_id: None,
            },
            action: crate::decision::ActionRef {
                provider: "stripe".into(),
                method: "create_payment".into(),
                parameters: json!({}),
            },
            justification: crate::decision::JustificationRef {
                reasoning: "r".into(),
                confidence_score: None,
            },
            environment: "staging".into(),
        };
        assert_eq!(backend.evaluate(&input).await, Decision::EngineUnavailable);
    }

    #[tokio::test]
    async fn reload_with_missing_source_is_an_error() {
        let backend = OpaBackend::new(OpaConfig {
            base_url: "http://127.0.0.1:1".into(),
            policy_name: "agentgate".into(),
            source_path: "/nonexistent.yaml".into(),
            eval_deadline: Duration::from_millis(200),
        })
        .unwrap();
        assert!(matches!(
            backend.reload().await,
            Err(EngineError::SourceRead { .. })
        ));
        assert!(backend.loaded_policy().is_none());
    }
}
