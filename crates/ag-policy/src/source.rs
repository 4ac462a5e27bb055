// source.rs — The declarative policy source model.
//
// A policy source document:
//
// ```yaml
// version: "1"
// package: payments
// policies:
//   - name: payment-limits
//     rules:
//       - id: allow-small-payments
//         condition:
//           provider: stripe
//           method: create_payment
//           parameters:
//             amount: { max: 4999 }
//         action: allow
//       - id: deny-large-payments
//         condition:
//           provider: stripe
//           method: create_payment
//           parameters:
//             amount: { min: 5000 }
//         action: deny
//         reason: "Payment amount exceeds $50.00 limit"
// ```
//
// Unknown keys are rejected everywhere (`deny_unknown_fields`) so typos in
// condition fields fail at compile time with a source location rather than
// silently matching nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::PolicyError;

/// A complete policy source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PolicySet {
    /// Source format version, author-assigned.
    pub version: String,

    /// Logical grouping name. Metadata only — the compiled module always
    /// lives at the engine's fixed entrypoint package.
    pub package: String,

    pub policies: Vec<Policy>,
}

/// A named group of ordered rules.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Policy {
    pub name: String,
    pub rules: Vec<Rule>,
}

/// A single rule: condition → action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Rule {
    /// Unique across the whole set; reported back as a matched rule.
    pub id: String,

    /// All present condition fields must hold for the rule to match.
    /// An empty condition matches every manifest.
    #[serde(default)]
    pub condition: Condition,

    pub action: RuleAction,

    /// Human-readable denial reason, surfaced to the caller when a deny
    /// rule decides the manifest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// What a matching rule decides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    Allow,
    Deny,
}

/// The conjunctive match condition of a rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Condition {
    /// Exact, case-sensitive provider tag (e.g. "stripe").
    pub provider: Option<String>,

    /// Exact, case-sensitive method tag (e.g. "create_payment").
    pub method: Option<String>,

    /// Exact environment tag (e.g. "production").
    pub environment: Option<String>,

    /// Per-field constraints on `action.parameters`. BTreeMap keeps
    /// compilation output deterministic.
    pub parameters: BTreeMap<String, FieldConstraint>,
}

impl Condition {
    /// Whether this condition has no clauses at all.
    pub fn is_empty(&self) -> bool {
        self.provider.is_none()
            && self.method.is_none()
            && self.environment.is_none()
            && self.parameters.is_empty()
    }
}

/// Constraints on a single parameter field. All present constraints must
/// hold (conjunctive); numeric bounds are inclusive; a field absent from
/// the manifest fails every constraint here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct FieldConstraint {
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(rename = "in")]
    pub one_of: Option<Vec<serde_json::Value>>,
    pub not_in: Option<Vec<serde_json::Value>>,
    pub equals: Option<serde_json::Value>,
    /// Regular expression the (string) field value must match.
    pub matches: Option<String>,
}

impl PolicySet {
    /// Parse a YAML policy source document.
    pub fn from_yaml(text: &str) -> Result<Self, PolicyError> {
        serde_yaml::from_str(text).map_err(PolicyError::from_yaml)
    }

    /// All rules in declared order, paired with their owning policy name.
    pub fn rules(&self) -> impl Iterator<Item = (&str, &Rule)> {
        self.policies
            .iter()
            .flat_map(|p| p.rules.iter().map(move |r| (p.name.as_str(), r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
version: "1"
package: payments
policies:
  - name: payment-limits
    rules:
      - id: allow-small-payments
        condition:
          provider: stripe
          method: create_payment
          parameters:
            amount: { max: 4999 }
        action: allow
      - id: deny-large-payments
        condition:
          provider: stripe
          method: create_payment
          parameters:
            amount: { min: 5000 }
        action: deny
        reason: "Payment amount exceeds $50.00 limit"
"#;

    #[test]
    fn parses_sample_document() {
        let set = PolicySet::from_yaml(SAMPLE).unwrap();
        assert_eq!(set.package, "payments");
        assert_eq!(set.policies.len(), 1);
        assert_eq!(set.policies[0].rules.len(), 2);

        let (_, rule) = set.rules().nth(1).unwrap();
        assert_eq!(rule.id, "deny-large-payments");
        assert_eq!(rule.action, RuleAction::Deny);
        assert_eq!(
            rule.reason.as_deref(),
            Some("Payment amount exceeds $50.00 limit")
        );
        assert_eq!(rule.condition.parameters["amount"].min, Some(5000.0));
    }

    #[test]
    fn unknown_condition_field_is_rejected_with_location() {
        let bad = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: r1
        condition:
          providr: stripe
        action: allow
"#;
        match PolicySet::from_yaml(bad) {
            Err(PolicyError::Parse { line, message, .. }) => {
                assert!(line > 0);
                assert!(message.contains("providr"));
            }
            other => panic!("expected Parse error, got {:?}", other),
        }
    }

    #[test]
    fn unknown_constraint_key_is_rejected() {
        let bad = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: r1
        condition:
          parameters:
            amount: { maximum: 10 }
        action: allow
"#;
        assert!(matches!(
            PolicySet::from_yaml(bad),
            Err(PolicyError::Parse { .. })
        ));
    }

    #[test]
    fn missing_condition_defaults_to_match_all() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: deny-everything
        action: deny
        reason: "locked down"
"#;
        let set = PolicySet::from_yaml(doc).unwrap();
        let (_, rule) = set.rules().next().unwrap();
        assert!(rule.condition.is_empty());
    }

    #[test]
    fn in_constraint_uses_in_keyword() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: r1
        condition:
          parameters:
            currency: { in: ["usd", "eur"] }
        action: allow
"#;
        let set = PolicySet::from_yaml(doc).unwrap();
        let (_, rule) = set.rules().next().unwrap();
        let one_of = rule.condition.parameters["currency"].one_of.as_ref().unwrap();
        assert_eq!(one_of.len(), 2);
    }

    #[test]
    fn source_round_trips_through_yaml() {
        let set = PolicySet::from_yaml(SAMPLE).unwrap();
        let rendered = serde_yaml::to_string(&set).unwrap();
        let reparsed = PolicySet::from_yaml(&rendered).unwrap();
        assert_eq!(set, reparsed);
    }
}
