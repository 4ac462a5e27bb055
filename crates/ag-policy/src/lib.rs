//! # ag-policy
//!
//! The declarative policy layer of AgentGate.
//!
//! Operators author policy as YAML ([`PolicySet`]): named policies holding
//! ordered rules, each rule a condition plus an `allow`/`deny` action and an
//! optional human-readable reason. The [`compiler`] turns a source document
//! into a Rego module for the external policy engine, and derives the
//! content-addressed `policy_version` that gets pinned onto every decision.
//!
//! Evaluation semantics (encoded into the generated Rego):
//! - any matching `deny` wins over any matching `allow`
//! - a manifest matching no rule at all is denied (default deny)
//! - parameter constraints are conjunctive per field; numeric comparisons
//!   are inclusive; a field absent from the manifest fails its constraints
//! - string comparisons are case-sensitive

pub mod compiler;
pub mod error;
pub mod source;

pub use compiler::{compile, policy_version, CompiledPolicy};
pub use error::PolicyError;
pub use source::{Condition, FieldConstraint, Policy, PolicySet, Rule, RuleAction};
