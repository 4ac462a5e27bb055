//! # ag-gateway
//!
//! The AgentGate request path: wire-contract types, the validation
//! orchestrator, and the axum REST surface.
//!
//! The hot path (`POST /v1/manifest/validate`) runs
//! schema → authenticate → policy-evaluate → sign → persist → respond,
//! failing closed at every step: an unreachable policy engine is a recorded
//! denial, and a ledger append failure means no seal reaches the client.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod routes;
pub mod state;
pub mod wire;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use orchestrator::{Orchestrator, ValidationOutcome};
pub use routes::build_router;
pub use state::AppState;
pub use wire::ManifestSubmission;
