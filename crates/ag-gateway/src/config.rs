// config.rs — Gateway configuration.
//
// Loaded from agentgate.toml with serde defaults for every field, so a
// minimal file (or none at all) yields a runnable single-trust-domain
// deployment: auth optional, local SQLite, local OPA.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from reading the config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration for the gateway server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Address the HTTP server binds.
    pub listen_addr: String,

    /// Path to the SQLite ledger database.
    pub database_path: PathBuf,

    /// Path to the Ed25519 PKCS#8 signing key (see `ag-server keygen`).
    pub signing_key_path: PathBuf,

    /// Shared secret for HS256 bearer tokens. Override in production.
    pub jwt_secret: String,

    /// Path to the declarative policy source (YAML).
    pub policy_source_path: PathBuf,

    /// Base URL of the OPA server.
    pub opa_url: String,

    /// Name the compiled module is uploaded under.
    pub opa_policy_name: String,

    /// Seal lifetime in seconds.
    pub seal_ttl_secs: u64,

    /// Overall per-request deadline in seconds.
    pub request_deadline_secs: u64,

    /// Policy-engine RPC deadline in seconds.
    pub eval_deadline_secs: u64,

    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,

    /// Bound on concurrent in-flight validate requests; excess gets 503.
    pub max_inflight_validations: usize,

    /// Whether `validate`, audit reads, and policy reload require a bearer
    /// token. Off for single-trust-domain deployments, on for multi-tenant.
    pub auth_required: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8400".to_string(),
            database_path: PathBuf::from("agentgate.db"),
            signing_key_path: PathBuf::from("agentgate-seal.pk8"),
            jwt_secret: "agentgate-dev-secret".to_string(),
            policy_source_path: PathBuf::from("policies/example.yaml"),
            opa_url: "http://127.0.0.1:8181".to_string(),
            opa_policy_name: "agentgate".to_string(),
            seal_ttl_secs: ag_seal::DEFAULT_TTL_SECS,
            request_deadline_secs: 5,
            eval_deadline_secs: 2,
            max_body_bytes: 256 * 1024,
            max_inflight_validations: 64,
            auth_required: false,
        }
    }
}

impl GatewayConfig {
    /// Load from a TOML file. Missing keys fall back to defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    pub fn seal_ttl(&self) -> Duration {
        Duration::from_secs(self.seal_ttl_secs)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_secs(self.request_deadline_secs)
    }

    pub fn eval_deadline(&self) -> Duration {
        Duration::from_secs(self.eval_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_a_runnable_single_trust_domain() {
        let config = GatewayConfig::default();
        assert!(!config.auth_required);
        assert_eq!(config.seal_ttl_secs, 300);
        assert_eq!(config.eval_deadline_secs, 2);
        assert_eq!(config.request_deadline_secs, 5);
        assert_eq!(config.max_body_bytes, 262_144);
    }

    #[test]
    fn partial_file_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentgate.toml");
        std::fs::write(&path, "auth_required = true\nseal_ttl_secs = 60\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert!(config.auth_required);
        assert_eq!(config.seal_ttl_secs, 60);
        // Untouched keys keep their defaults.
        assert_eq!(config.opa_policy_name, "agentgate");
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agentgate.toml");
        std::fs::write(&path, "auth_requird = true\n").unwrap();
        assert!(matches!(
            GatewayConfig::from_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        assert!(matches!(
            GatewayConfig::from_file("/nonexistent/agentgate.toml"),
            Err(ConfigError::Read { .. })
        ));
    }
}
