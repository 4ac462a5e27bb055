// backend.rs — The policy backend seam.
//
// The orchestrator and HTTP surface depend on this trait, not on OPA
// directly, so tests can drive the whole validate path with a stub and the
// engine integration stays swappable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::decision::{Decision, EvalInput};
use crate::error::EngineError;

/// What the adapter knows about the currently loaded policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPolicy {
    /// Content-derived version id recorded on every decision.
    pub version: String,
    pub loaded_at: DateTime<Utc>,
    pub rule_count: usize,
}

/// Dependency status for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineHealth {
    pub available: bool,
    pub policy_loaded: bool,
    pub policy_version: Option<String>,
}

/// The single operation surface the gateway needs from a policy engine.
#[async_trait]
pub trait PolicyBackend: Send + Sync {
    /// Evaluate a manifest projection. Never fails — engine trouble is
    /// reported as [`Decision::EngineUnavailable`].
    async fn evaluate(&self, input: &EvalInput) -> Decision;

    /// Recompile the policy source and upload it to the engine, swapping
    /// the cached version atomically. In-flight evaluations complete
    /// against the old version; subsequent ones use the new.
    async fn reload(&self) -> Result<LoadedPolicy, EngineError>;

    /// Probe engine reachability and report the cached policy state.
    async fn health(&self) -> EngineHealth;

    /// The cached policy metadata, if a load has succeeded.
    fn loaded_policy(&self) -> Option<LoadedPolicy>;
}
