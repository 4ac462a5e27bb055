//! # ag-engine
//!
//! The policy engine adapter: the one place AgentGate talks to the external
//! evaluator (OPA). Presents a single `evaluate(input) → Decision` operation
//! to the orchestrator, owns policy upload/reload, and caches the loaded
//! policy version behind a reader-preferring lock.
//!
//! Failure semantics are fail-closed: an unreachable engine, a malformed
//! response, or a blown evaluation deadline all come back as
//! [`Decision::EngineUnavailable`], which the orchestrator records as a
//! denial. There are no retries here — if retries belong anywhere, it is at
//! the HTTP layer.

pub mod backend;
pub mod decision;
pub mod error;
pub mod opa;

pub use backend::{EngineHealth, LoadedPolicy, PolicyBackend};
pub use decision::{
    ActionRef, AgentRef, Decision, EvalInput, JustificationRef, UNAVAILABLE_REASON,
    UNKNOWN_VERSION,
};
pub use error::EngineError;
pub use opa::{OpaBackend, OpaConfig};
