// error.rs — Typed error categories and the HTTP problem shape.
//
// Internal errors bubble as typed categories; this module maps each category
// to a status code and a stable error_code string. The codes are part of the
// API contract — never rename one.
//
// Denials are NOT errors: a denied manifest is a 200 with approved=false.
// The only category that silently becomes a denial instead of a 5xx is
// policy-engine unavailability, handled in the orchestrator.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use ag_identity::IdentityError;

/// Everything the request path can fail with.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request body violated the wire contract.
    #[error("invalid manifest: {message}")]
    Schema { field: String, message: String },

    /// Missing or unverifiable credentials.
    #[error("authentication required: {reason}")]
    Unauthorized { reason: String },

    /// Valid credentials, insufficient scope (tenant mismatch, inactive).
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// The named resource does not exist.
    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    /// The seal was already consumed; conveys the original execution time.
    #[error("seal already executed")]
    SealAlreadyExecuted {
        seal_id: String,
        executed_at: DateTime<Utc>,
    },

    /// The seal's TTL elapsed before execution.
    #[error("seal expired")]
    SealExpired { seal_id: String },

    /// A denied (evidentiary) seal carries no execution authority.
    #[error("seal was not approved")]
    SealNotApproved { seal_id: String },

    /// Two manifest-id collisions in a row. Practically unreachable.
    #[error("manifest id collision persisted after retry")]
    ManifestCollision,

    /// The request body exceeded the configured limit.
    #[error("request body too large")]
    PayloadTooLarge,

    /// Too many in-flight validations.
    #[error("server overloaded, retry later")]
    Overloaded,

    /// The overall request deadline elapsed.
    #[error("request deadline exceeded")]
    DeadlineExceeded,

    /// Ledger reads/writes failed; fail closed, return no seal.
    #[error(transparent)]
    Ledger(#[from] ag_ledger::LedgerError),

    /// Seal issuance failed (key trouble).
    #[error(transparent)]
    Seal(#[from] ag_seal::SealError),

    /// Policy reload failed.
    #[error(transparent)]
    Engine(#[from] ag_engine::EngineError),
}

impl From<IdentityError> for GatewayError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::Token(e) => GatewayError::Unauthorized {
                reason: e.to_string(),
            },
            IdentityError::AgentNotActive { agent_id } => GatewayError::Forbidden {
                reason: format!("agent '{}' is unknown or inactive", agent_id),
            },
            IdentityError::OrganizationNotActive { org_id } => GatewayError::Forbidden {
                reason: format!("organization '{}' is unknown or inactive", org_id),
            },
            IdentityError::Ledger(e) => GatewayError::Ledger(e),
        }
    }
}

impl GatewayError {
    /// Stable machine-readable code. Part of the API contract.
    pub fn error_code(&self) -> &'static str {
        match self {
            GatewayError::Schema { .. } => "invalid_manifest",
            GatewayError::Unauthorized { .. } => "unauthorized",
            GatewayError::Forbidden { .. } => "forbidden",
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::SealAlreadyExecuted { .. } => "seal_already_executed",
            GatewayError::SealExpired { .. } => "seal_expired",
            GatewayError::SealNotApproved { .. } => "seal_not_approved",
            GatewayError::ManifestCollision => "manifest_id_collision",
            GatewayError::PayloadTooLarge => "payload_too_large",
            GatewayError::Overloaded => "overloaded",
            GatewayError::DeadlineExceeded => "deadline_exceeded",
            GatewayError::Ledger(_) => "ledger_failure",
            GatewayError::Seal(_) => "seal_failure",
            GatewayError::Engine(_) => "policy_load_failure",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Schema { .. } => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GatewayError::NotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::SealAlreadyExecuted { .. }
            | GatewayError::SealExpired { .. }
            | GatewayError::SealNotApproved { .. } => StatusCode::CONFLICT,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::ManifestCollision
            | GatewayError::Ledger(_)
            | GatewayError::Seal(_)
            | GatewayError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Structured details for categories that carry useful context.
    fn details(&self) -> Option<serde_json::Value> {
        match self {
            GatewayError::Schema { field, .. } => Some(json!({ "field": field })),
            GatewayError::SealAlreadyExecuted {
                seal_id,
                executed_at,
            } => Some(json!({
                "seal_id": seal_id,
                "already_executed": true,
                "executed_at": executed_at,
            })),
            GatewayError::SealExpired { seal_id } => Some(json!({ "seal_id": seal_id })),
            GatewayError::SealNotApproved { seal_id } => Some(json!({ "seal_id": seal_id })),
            _ => None,
        }
    }
}

/// The compact problem shape every error response uses.
#[derive(Debug, Serialize)]
pub struct Problem {
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.error_code(), "request failed");
        } else {
            tracing::debug!(error = %self, code = self.error_code(), "request rejected");
        }

        let problem = Problem {
            error_code: self.error_code(),
            message: self.to_string(),
            details: self.details(),
        };
        let mut response = (status, Json(problem)).into_response();
        if matches!(self, GatewayError::Overloaded) {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from_static("1"));
        }
        response
    }
}
