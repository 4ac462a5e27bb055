// orchestrator.rs — The validate hot path.
//
// One call runs the whole decision: identity consistency, policy
// evaluation, seal issuance, ledger append. Fail-closed rules:
//   - engine trouble → the decision is a denial, still ledgered
//   - ledger append failure → error out, the client gets no seal
//   - identity mismatch → 403 before the engine or ledger are touched,
//     with an auth event recorded
//
// A seal is issued for every decision. On denial it is evidentiary:
// signed, persisted, never honored by an executor, and not returned to
// the caller.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use ag_engine::{ActionRef, AgentRef, Decision, EvalInput, JustificationRef, PolicyBackend};
use ag_identity::AuthContext;
use ag_ledger::{AuthEvent, AuthEventType, Ledger, LedgerError, Manifest};
use ag_seal::payload::truncate_to_micros;
use ag_seal::{Seal, SealSigner};

use crate::error::GatewayError;
use crate::wire::ManifestSubmission;

/// What a validate call produced.
#[derive(Debug, Clone)]
pub struct ValidationOutcome {
    pub manifest_id: Uuid,
    pub approved: bool,
    /// The issued seal; callers only forward it to the client on approval.
    pub seal: Seal,
    pub denial_reason: Option<String>,
    pub policy_version: String,
}

/// The validation pipeline: evaluate, sign, persist.
pub struct Orchestrator {
    backend: Arc<dyn PolicyBackend>,
    signer: Arc<SealSigner>,
    ledger: Arc<Ledger>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn PolicyBackend>,
        signer: Arc<SealSigner>,
        ledger: Arc<Ledger>,
    ) -> Self {
        Self {
            backend,
            signer,
            ledger,
        }
    }

    /// Run one manifest through the decision path.
    ///
    /// `auth` is present when the caller supplied a bearer token (always,
    /// when the deployment requires auth). The manifest's identity must
    /// match the token's claims.
    pub async fn validate(
        &self,
        submission: &ManifestSubmission,
        auth: Option<&AuthContext>,
    ) -> Result<ValidationOutcome, GatewayError> {
        // Identity consistency comes first: a mismatch never reaches the
        // policy engine or the ledger's manifest table.
        if let Some(ctx) = auth {
            if ctx.agent_id != submission.agent.agent_id || ctx.org_id != submission.agent.org_id {
                self.record_auth_event(
                    AuthEvent::new(AuthEventType::ManifestAuthFail, false)
                        .with_agent(&submission.agent.agent_id)
                        .with_org(&submission.agent.org_id)
                        .with_endpoint("/v1/manifest/validate")
                        .with_failure_reason(format!(
                            "token is for ({}, {})",
                            ctx.agent_id, ctx.org_id
                        )),
                );
                return Err(GatewayError::Forbidden {
                    reason: "manifest identity does not match token claims".to_string(),
                });
            }
            self.record_auth_event(
                AuthEvent::new(AuthEventType::ManifestAuthOk, true)
                    .with_agent(&ctx.agent_id)
                    .with_org(&ctx.org_id)
                    .with_endpoint("/v1/manifest/validate"),
            );
        }

        let decision = self.backend.evaluate(&eval_input(submission)).await;
        if let Decision::EngineUnavailable = decision {
            tracing::warn!(
                agent_id = %submission.agent.agent_id,
                "policy engine unavailable; failing closed"
            );
        }

        let approved = decision.approved();
        let policy_version = decision.policy_version().to_string();
        let denial_reason = decision.denial_reason().map(str::to_string);

        let mut manifest = build_manifest(submission)?;
        let mut seal = self.signer.issue(
            manifest.manifest_id,
            approved,
            &policy_version,
            denial_reason.clone(),
        );

        if !submission.dry_run {
            match self.ledger.append(&manifest, &seal) {
                Ok(()) => {}
                Err(LedgerError::DuplicateManifest) => {
                    // Astronomically unlikely; regenerate once and re-sign,
                    // since the id is part of the signed payload.
                    manifest.manifest_id = Uuid::new_v4();
                    seal = self.signer.issue(
                        manifest.manifest_id,
                        approved,
                        &policy_version,
                        denial_reason.clone(),
                    );
                    match self.ledger.append(&manifest, &seal) {
                        Ok(()) => {}
                        Err(LedgerError::DuplicateManifest) => {
                            return Err(GatewayError::ManifestCollision)
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            manifest_id = %manifest.manifest_id,
            agent_id = %manifest.agent_id,
            provider = %manifest.provider,
            method = %manifest.method,
            approved,
            policy_version = %policy_version,
            dry_run = submission.dry_run,
            "manifest validated"
        );

        Ok(ValidationOutcome {
            manifest_id: manifest.manifest_id,
            approved,
            seal,
            denial_reason,
            policy_version,
        })
    }

    /// Forensics write; never fails the request it decorates.
    pub fn record_auth_event(&self, event: AuthEvent) {
        if let Err(e) = self.ledger.record_auth_event(&event) {
            tracing::warn!(error = %e, "failed to record auth event");
        }
    }
}

/// Assign server-side fields and freeze the submission into a manifest.
fn build_manifest(submission: &ManifestSubmission) -> Result<Manifest, GatewayError> {
    let raw_manifest = serde_json::to_value(submission).map_err(ag_ledger::LedgerError::Json)?;
    Ok(Manifest {
        manifest_id: Uuid::new_v4(),
        created_at: truncate_to_micros(Utc::now()),
        agent_id: submission.agent.agent_id.clone(),
        org_id: submission.agent.org_id.clone(),
        user_id: submission.agent.user_id.clone(),
        provider: submission.action.provider.clone(),
        method: submission.action.method.clone(),
        parameters: submission.action.parameters.clone(),
        reasoning: submission.justification.reasoning.clone(),
        confidence_score: submission.justification.confidence_score,
        environment: submission.environment.clone(),
        raw_manifest,
    })
}

/// The projection of a manifest the engine evaluates.
fn eval_input(submission: &ManifestSubmission) -> EvalInput {
    EvalInput {
        agent: AgentRef {
            agent_id: submission.agent.agent_id.clone(),
            org_id: submission.agent.org_id.clone(),
            user_id: submission.agent.user_id.clone(),
        },
        action: ActionRef {
            provider: submission.action.provider.clone(),
            method: submission.action.method.clone(),
            parameters: submission.action.parameters.clone(),
        },
        justification: JustificationRef {
            reasoning: submission.justification.reasoning.clone(),
            confidence_score: submission.justification.confidence_score,
        },
        environment: submission.environment.clone(),
    }
}
