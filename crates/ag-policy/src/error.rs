// error.rs — Error types for policy parsing and compilation.
//
// Compilation fails cleanly with enough context to fix the source: parse
// errors carry the YAML location, semantic errors name the policy/rule/field
// involved.

use thiserror::Error;

/// Errors from parsing or compiling a policy source document.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The YAML did not match the policy source grammar.
    #[error("policy source error at line {line}, column {column}: {message}")]
    Parse {
        line: usize,
        column: usize,
        message: String,
    },

    /// Two rules share an id; versions and matched-rule reporting require
    /// ids to be unique across the whole set.
    #[error("duplicate rule id '{id}' in policy '{policy}'")]
    DuplicateRuleId { policy: String, id: String },

    /// A rule with an empty id cannot be referenced in decisions.
    #[error("policy '{policy}' contains a rule with an empty id")]
    EmptyRuleId { policy: String },

    /// A policy that contains no rules can never be referenced by a decision.
    #[error("policy '{policy}' has no rules")]
    EmptyPolicy { policy: String },

    /// `min` exceeds `max` — no value can satisfy the constraint.
    #[error("rule '{rule}': conflicting constraint on field '{field}': min {min} > max {max}")]
    ConflictingConstraint {
        rule: String,
        field: String,
        min: f64,
        max: f64,
    },

    /// A `matches` constraint is not a valid regular expression.
    #[error("rule '{rule}': invalid regex for field '{field}': {message}")]
    InvalidRegex {
        rule: String,
        field: String,
        message: String,
    },
}

impl PolicyError {
    /// Convert a serde_yaml error, preserving the source location when known.
    pub(crate) fn from_yaml(err: serde_yaml::Error) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));
        PolicyError::Parse {
            line,
            column,
            message: err.to_string(),
        }
    }
}
