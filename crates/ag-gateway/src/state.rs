// state.rs — Process-wide shared state for the HTTP surface.
//
// Everything here is initialized once at startup and shared read-only (or
// internally synchronized) across request handlers: the signing key never
// changes after init, the policy-version cache swaps under its own lock in
// ag-engine, and the ledger serializes its own statements.

use std::sync::Arc;

use tokio::sync::Semaphore;

use ag_engine::PolicyBackend;
use ag_identity::IdentityService;
use ag_ledger::Ledger;
use ag_seal::SealSigner;

use crate::config::GatewayConfig;
use crate::orchestrator::Orchestrator;

/// Shared application state, cheap to clone per request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<Orchestrator>,
    pub backend: Arc<dyn PolicyBackend>,
    pub ledger: Arc<Ledger>,
    pub identity: Arc<IdentityService>,
    /// Bounds concurrent in-flight validations; excess requests get 503.
    pub inflight: Arc<Semaphore>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn PolicyBackend>,
        signer: Arc<SealSigner>,
        ledger: Arc<Ledger>,
        identity: Arc<IdentityService>,
    ) -> Self {
        let inflight = Arc::new(Semaphore::new(config.max_inflight_validations));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&backend),
            signer,
            Arc::clone(&ledger),
        ));
        Self {
            config: Arc::new(config),
            orchestrator,
            backend,
            ledger,
            identity,
            inflight,
        }
    }
}
