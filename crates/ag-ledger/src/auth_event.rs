// auth_event.rs — Security forensics events.
//
// Every authentication-relevant outcome (token issue, validation failure,
// manifest identity check, scope refusal) is recorded as an immutable
// AuthEvent row. The table carries the same no-UPDATE/no-DELETE triggers as
// the manifests table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What kind of authentication event this records.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthEventType {
    /// An operator or agent logged in (org bootstrap).
    Login,
    /// A bearer token was issued.
    TokenIssue,
    /// A presented token failed validation.
    TokenValidateFail,
    /// A manifest's identity matched its token claims.
    ManifestAuthOk,
    /// A manifest's identity contradicted its token claims.
    ManifestAuthFail,
    /// An audit query was refused for crossing org scope.
    QueryScopeDenied,
}

impl AuthEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthEventType::Login => "login",
            AuthEventType::TokenIssue => "token_issue",
            AuthEventType::TokenValidateFail => "token_validate_fail",
            AuthEventType::ManifestAuthOk => "manifest_auth_ok",
            AuthEventType::ManifestAuthFail => "manifest_auth_fail",
            AuthEventType::QueryScopeDenied => "query_scope_denied",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "login" => Some(AuthEventType::Login),
            "token_issue" => Some(AuthEventType::TokenIssue),
            "token_validate_fail" => Some(AuthEventType::TokenValidateFail),
            "manifest_auth_ok" => Some(AuthEventType::ManifestAuthOk),
            "manifest_auth_fail" => Some(AuthEventType::ManifestAuthFail),
            "query_scope_denied" => Some(AuthEventType::QueryScopeDenied),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable security event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthEvent {
    pub event_id: Uuid,
    pub event_type: AuthEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    /// The endpoint the event occurred on, e.g. "/v1/manifest/validate".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuthEvent {
    /// Create an event with the current timestamp and a random id.
    /// Optional fields start empty; set them with the builder methods.
    pub fn new(event_type: AuthEventType, success: bool) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            agent_id: None,
            org_id: None,
            endpoint: None,
            ip: None,
            success,
            failure_reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }
}
