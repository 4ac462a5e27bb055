//! # ag-ledger
//!
//! Durable, queryable, append-mostly storage for AgentGate: manifests,
//! seals, auth events, organizations, and agents.
//!
//! Immutability is a property of the store, not the application. The schema
//! installs SQLite triggers that refuse UPDATE/DELETE on manifest and
//! auth-event rows, refuse any seal update other than the single
//! `(was_executed=0, NULL) → (1, t)` transition, and restrict organization
//! and agent updates to the `active` flag. A bug elsewhere in the gateway
//! cannot corrupt history.

pub mod auth_event;
pub mod error;
pub mod manifest;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;

pub use auth_event::{AuthEvent, AuthEventType};
pub use error::LedgerError;
pub use manifest::Manifest;
pub use query::{AuditRecord, LedgerStats, QueryFilters, QueryPage, MAX_PAGE_SIZE};
pub use registry::{Agent, Organization};
pub use store::{ExecutionOutcome, Ledger};
