// routes.rs — The REST surface.
//
// Endpoint map:
//   POST /v1/manifest/validate   — hot path: schema → auth → policy → seal → ledger
//   POST /v1/seal/mark-executed  — one-time-use transition
//   GET  /v1/seal/verify         — independent verification from stored fields
//   GET  /v1/audit/query         — filtered, paginated ledger reads
//   GET  /v1/audit/stats         — aggregates
//   POST /v1/orgs/register       — unauthenticated bootstrap
//   GET  /v1/orgs/{org_id}       — bearer, org-scoped
//   POST /v1/agents/register     — bearer, org-scoped
//   GET  /v1/agents              — bearer, org-scoped
//   POST /v1/policy/reload       — recompile + upload + version swap
//   GET  /health, /v1/manifest/health, /
//
// Schema validation always runs before identity or policy work, and error
// responses all use the problem shape from error.rs.

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use ag_identity::AuthContext;
use ag_ledger::{Agent, AuthEvent, AuthEventType, QueryFilters, QueryPage};
use ag_seal::Seal;

use crate::error::GatewayError;
use crate::state::AppState;
use crate::wire::ManifestSubmission;

/// Assemble the full router.
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.config.max_body_bytes;
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/v1/manifest/validate", post(validate))
        .route("/v1/manifest/health", get(manifest_health))
        .route("/v1/seal/mark-executed", post(mark_executed))
        .route("/v1/seal/verify", get(verify_seal))
        .route("/v1/audit/query", get(audit_query))
        .route("/v1/audit/stats", get(audit_stats))
        .route("/v1/orgs/register", post(register_org))
        .route("/v1/orgs/{org_id}", get(get_org))
        .route("/v1/agents/register", post(register_agent))
        .route("/v1/agents", get(list_agents))
        .route("/v1/policy/reload", post(reload_policy))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Auth helpers ──

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Optional authentication: validate a token when present; demand one when
/// the deployment requires auth. Validation failures are recorded.
fn authenticate_optional(
    state: &AppState,
    headers: &HeaderMap,
    endpoint: &str,
) -> Result<Option<AuthContext>, GatewayError> {
    match bearer_token(headers) {
        Some(token) => match state.identity.authenticate(token) {
            Ok(ctx) => Ok(Some(ctx)),
            Err(e) => {
                state.orchestrator.record_auth_event(
                    AuthEvent::new(AuthEventType::TokenValidateFail, false)
                        .with_endpoint(endpoint)
                        .with_failure_reason(e.to_string()),
                );
                Err(e.into())
            }
        },
        None if state.config.auth_required => Err(GatewayError::Unauthorized {
            reason: "bearer token required".to_string(),
        }),
        None => Ok(None),
    }
}

/// Mandatory authentication for the org/agent management endpoints.
fn authenticate_required(
    state: &AppState,
    headers: &HeaderMap,
    endpoint: &str,
) -> Result<AuthContext, GatewayError> {
    match bearer_token(headers) {
        Some(token) => match state.identity.authenticate(token) {
            Ok(ctx) => Ok(ctx),
            Err(e) => {
                state.orchestrator.record_auth_event(
                    AuthEvent::new(AuthEventType::TokenValidateFail, false)
                        .with_endpoint(endpoint)
                        .with_failure_reason(e.to_string()),
                );
                Err(e.into())
            }
        },
        None => Err(GatewayError::Unauthorized {
            reason: "bearer token required".to_string(),
        }),
    }
}

fn map_json_rejection(rejection: JsonRejection) -> GatewayError {
    if rejection.status() == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge
    } else {
        GatewayError::Schema {
            field: "body".to_string(),
            message: rejection.body_text(),
        }
    }
}

// ── Hot path ──

#[derive(Debug, Serialize)]
struct ValidateResponse {
    manifest_id: Uuid,
    approved: bool,
    /// Present only on approval; denied seals stay evidentiary.
    #[serde(skip_serializing_if = "Option::is_none")]
    seal: Option<Seal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denial_reason: Option<String>,
    policy_version: String,
}

async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ManifestSubmission>, JsonRejection>,
) -> Result<Json<ValidateResponse>, GatewayError> {
    // Schema first, before identity or any backend work.
    let Json(submission) = payload.map_err(map_json_rejection)?;
    submission.validate()?;

    // Backpressure: bound in-flight validations, shed the rest.
    let _permit = state
        .inflight
        .try_acquire()
        .map_err(|_| GatewayError::Overloaded)?;

    let auth = authenticate_optional(&state, &headers, "/v1/manifest/validate")?;

    let outcome = tokio::time::timeout(
        state.config.request_deadline(),
        state.orchestrator.validate(&submission, auth.as_ref()),
    )
    .await
    .map_err(|_| GatewayError::DeadlineExceeded)??;

    Ok(Json(ValidateResponse {
        manifest_id: outcome.manifest_id,
        approved: outcome.approved,
        seal: outcome.approved.then_some(outcome.seal),
        denial_reason: outcome.denial_reason,
        policy_version: outcome.policy_version,
    }))
}

// ── Seal endpoints ──

#[derive(Debug, Deserialize)]
struct SealIdQuery {
    seal_id: String,
}

#[derive(Debug, Serialize)]
struct MarkExecutedResponse {
    seal_id: String,
    marked_executed: bool,
    executed_at: DateTime<Utc>,
}

async fn mark_executed(
    State(state): State<AppState>,
    Query(query): Query<SealIdQuery>,
) -> Result<Json<MarkExecutedResponse>, GatewayError> {
    let seal = state
        .ledger
        .get_seal(&query.seal_id)?
        .ok_or(GatewayError::NotFound { resource: "seal" })?;

    if seal.was_executed {
        return Err(GatewayError::SealAlreadyExecuted {
            seal_id: seal.seal_id,
            executed_at: seal.executed_at.unwrap_or(seal.issued_at),
        });
    }
    if !seal.approved {
        return Err(GatewayError::SealNotApproved {
            seal_id: seal.seal_id,
        });
    }
    if seal.is_expired_at(Utc::now()) {
        return Err(GatewayError::SealExpired {
            seal_id: seal.seal_id,
        });
    }

    match state.ledger.mark_executed(&query.seal_id, Utc::now())? {
        ag_ledger::ExecutionOutcome::Marked { executed_at } => Ok(Json(MarkExecutedResponse {
            seal_id: query.seal_id,
            marked_executed: true,
            executed_at,
        })),
        // Lost the race between the read above and the conditional update.
        ag_ledger::ExecutionOutcome::AlreadyExecuted { executed_at } => {
            Err(GatewayError::SealAlreadyExecuted {
                seal_id: query.seal_id,
                executed_at,
            })
        }
        ag_ledger::ExecutionOutcome::NotFound => {
            Err(GatewayError::NotFound { resource: "seal" })
        }
    }
}

#[derive(Debug, Serialize)]
struct VerifyResponse {
    seal_id: String,
    /// Signature checks out AND the TTL has not elapsed.
    valid: bool,
    approved: bool,
    expired: bool,
    already_executed: bool,
    manifest_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

async fn verify_seal(
    State(state): State<AppState>,
    Query(query): Query<SealIdQuery>,
) -> Result<Json<VerifyResponse>, GatewayError> {
    let seal = state
        .ledger
        .get_seal(&query.seal_id)?
        .ok_or(GatewayError::NotFound { resource: "seal" })?;

    let now = Utc::now();
    let expired = seal.is_expired_at(now);
    let signature_ok = seal.signature_is_valid();

    Ok(Json(VerifyResponse {
        seal_id: seal.seal_id.clone(),
        valid: signature_ok && !expired,
        approved: seal.approved,
        expired,
        already_executed: seal.was_executed,
        manifest_id: seal.manifest_id,
        issued_at: seal.issued_at,
        expires_at: seal.expires_at,
    }))
}

// ── Audit endpoints ──

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AuditQueryParams {
    org_id: Option<String>,
    agent_id: Option<String>,
    provider: Option<String>,
    approved: Option<bool>,
    created_from: Option<DateTime<Utc>>,
    created_to: Option<DateTime<Utc>>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// Apply tenant scoping to the caller's filters.
///
/// Authenticated callers are pinned to their own org: an explicit filter
/// for another org is a 403 plus a forensics event. Unauthenticated
/// deployments (single trust domain) honor the filters as given.
fn scoped_filters(
    state: &AppState,
    auth: Option<&AuthContext>,
    params: &AuditQueryParams,
    endpoint: &str,
) -> Result<QueryFilters, GatewayError> {
    let org_id = match auth {
        Some(ctx) => match &params.org_id {
            Some(requested) if *requested != ctx.org_id => {
                state.orchestrator.record_auth_event(
                    AuthEvent::new(AuthEventType::QueryScopeDenied, false)
                        .with_agent(&ctx.agent_id)
                        .with_org(&ctx.org_id)
                        .with_endpoint(endpoint)
                        .with_failure_reason(format!("requested org '{}'", requested)),
                );
                return Err(GatewayError::Forbidden {
                    reason: "query crosses organization scope".to_string(),
                });
            }
            _ => Some(ctx.org_id.clone()),
        },
        None => params.org_id.clone(),
    };

    Ok(QueryFilters {
        org_id,
        agent_id: params.agent_id.clone(),
        provider: params.provider.clone(),
        approved: params.approved,
        created_from: params.created_from,
        created_to: params.created_to,
    })
}

async fn audit_query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<QueryPage>, GatewayError> {
    let auth = authenticate_optional(&state, &headers, "/v1/audit/query")?;
    let filters = scoped_filters(&state, auth.as_ref(), &params, "/v1/audit/query")?;
    let page = state
        .ledger
        .query(&filters, params.limit.unwrap_or(50), params.offset.unwrap_or(0))?;
    Ok(Json(page))
}

async fn audit_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<AuditQueryParams>,
) -> Result<Json<ag_ledger::LedgerStats>, GatewayError> {
    let auth = authenticate_optional(&state, &headers, "/v1/audit/stats")?;
    let filters = scoped_filters(&state, auth.as_ref(), &params, "/v1/audit/stats")?;
    Ok(Json(state.ledger.stats(&filters)?))
}

// ── Identity endpoints ──

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterOrgRequest {
    name: String,
    contact_email: String,
}

#[derive(Debug, Serialize)]
struct RegisterOrgResponse {
    org_id: String,
    org_name: String,
    admin_agent: Agent,
    jwt_token: String,
}

async fn register_org(
    State(state): State<AppState>,
    payload: Result<Json<RegisterOrgRequest>, JsonRejection>,
) -> Result<Json<RegisterOrgResponse>, GatewayError> {
    let Json(request) = payload.map_err(map_json_rejection)?;
    if request.name.trim().is_empty() {
        return Err(GatewayError::Schema {
            field: "name".to_string(),
            message: "name must not be empty".to_string(),
        });
    }
    if request.contact_email.trim().is_empty() {
        return Err(GatewayError::Schema {
            field: "contact_email".to_string(),
            message: "contact_email must not be empty".to_string(),
        });
    }

    let registration = state
        .identity
        .register_organization(&request.name, &request.contact_email)?;

    state.orchestrator.record_auth_event(
        AuthEvent::new(AuthEventType::Login, true)
            .with_agent(&registration.admin_agent.agent_id)
            .with_org(&registration.organization.org_id)
            .with_endpoint("/v1/orgs/register"),
    );
    state.orchestrator.record_auth_event(
        AuthEvent::new(AuthEventType::TokenIssue, true)
            .with_agent(&registration.admin_agent.agent_id)
            .with_org(&registration.organization.org_id)
            .with_endpoint("/v1/orgs/register"),
    );

    Ok(Json(RegisterOrgResponse {
        org_id: registration.organization.org_id,
        org_name: registration.organization.name,
        admin_agent: registration.admin_agent,
        jwt_token: registration.token,
    }))
}

async fn get_org(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(org_id): Path<String>,
) -> Result<Json<ag_ledger::Organization>, GatewayError> {
    let ctx = authenticate_required(&state, &headers, "/v1/orgs")?;
    if ctx.org_id != org_id {
        return Err(GatewayError::Forbidden {
            reason: "token is not scoped to this organization".to_string(),
        });
    }
    let org = state
        .identity
        .organization(&org_id)?
        .ok_or(GatewayError::NotFound {
            resource: "organization",
        })?;
    Ok(Json(org))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterAgentRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    /// Optional long-lived credential; only its hash is stored.
    #[serde(default)]
    api_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct RegisterAgentResponse {
    agent: Agent,
    jwt_token: String,
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RegisterAgentRequest>, JsonRejection>,
) -> Result<Json<RegisterAgentResponse>, GatewayError> {
    let ctx = authenticate_required(&state, &headers, "/v1/agents/register")?;
    let Json(request) = payload.map_err(map_json_rejection)?;
    if request.name.trim().is_empty() {
        return Err(GatewayError::Schema {
            field: "name".to_string(),
            message: "name must not be empty".to_string(),
        });
    }

    let registration = state.identity.register_agent(
        &ctx.org_id,
        &request.name,
        request.description,
        request.api_key.as_deref(),
    )?;

    state.orchestrator.record_auth_event(
        AuthEvent::new(AuthEventType::TokenIssue, true)
            .with_agent(&registration.agent.agent_id)
            .with_org(&ctx.org_id)
            .with_endpoint("/v1/agents/register"),
    );

    Ok(Json(RegisterAgentResponse {
        agent: registration.agent,
        jwt_token: registration.token,
    }))
}

#[derive(Debug, Serialize)]
struct AgentListResponse {
    org_id: String,
    agents: Vec<Agent>,
}

async fn list_agents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<AgentListResponse>, GatewayError> {
    let ctx = authenticate_required(&state, &headers, "/v1/agents")?;
    let agents = state.identity.agents(&ctx.org_id)?;
    Ok(Json(AgentListResponse {
        org_id: ctx.org_id,
        agents,
    }))
}

// ── Policy management ──

async fn reload_policy(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, GatewayError> {
    // Same auth posture as validate: open in single-trust-domain
    // deployments, token-gated in multi-tenant ones.
    let _auth = authenticate_optional(&state, &headers, "/v1/policy/reload")?;
    let loaded = state.backend.reload().await?;
    Ok(Json(json!({
        "policy_version": loaded.version,
        "rules": loaded.rule_count,
        "loaded_at": loaded.loaded_at,
    })))
}

// ── Health and discovery ──

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database_ok = state.ledger.ping().is_ok();
    let engine = state.backend.health().await;
    let status = if database_ok && engine.available {
        "ok"
    } else {
        "degraded"
    };
    Json(json!({
        "status": status,
        "database": if database_ok { "ok" } else { "unavailable" },
        "policy_engine": if engine.available { "ok" } else { "unavailable" },
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn manifest_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = state.backend.health().await;
    Json(json!({
        "status": if engine.available && engine.policy_loaded { "ok" } else { "degraded" },
        "engine_available": engine.available,
        "policy_version": engine.policy_version,
        "policy_loaded": engine.policy_loaded,
    }))
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": "agentgate",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "policy-sealed authorization gateway for autonomous agents",
        "endpoints": {
            "validate": "POST /v1/manifest/validate",
            "verify": "GET /v1/seal/verify",
            "mark_executed": "POST /v1/seal/mark-executed",
            "audit": "GET /v1/audit/query",
            "health": "GET /health",
        },
    }))
}
