// compiler.rs — Policy source → Rego compilation.
//
// The compiler is deterministic: the same source text always produces the
// same Rego module and the same content-derived version id, so two manifests
// decided by the same source always record the same policy_version.
//
// The generated module encodes the decision semantics:
//   - every rule contributes to `matched_rule`
//   - deny rules contribute their reason to `deny_reason`
//   - `allow` holds only when some allow rule matched AND no deny matched
//   - `default allow := false` makes no-match a denial
//
// The module always lives at the fixed entrypoint package regardless of the
// source's `package` field, so the engine adapter queries one stable path.

use std::collections::HashSet;

use sha2::{Digest, Sha256};

use crate::error::PolicyError;
use crate::source::{Condition, PolicySet, Rule, RuleAction};

/// The package every compiled module is emitted under.
pub const ENTRYPOINT_PACKAGE: &str = "agentgate.authz";

/// The engine data path of the structured decision document.
pub const RESULT_DATA_PATH: &str = "agentgate/authz/result";

/// A compiled policy, ready for upload to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledPolicy {
    /// Content-derived version id (`sha256:<16 hex>`).
    pub version: String,
    /// The generated Rego module text.
    pub rego: String,
    /// Rule ids in declared order.
    pub rule_ids: Vec<String>,
}

/// Derive the content-addressed version id for a policy source text.
///
/// Any change to the source — even whitespace — changes the version; two
/// identical sources always share one.
pub fn policy_version(source_text: &str) -> String {
    let digest = Sha256::digest(source_text.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("sha256:{}", &hex[..16])
}

/// Compile a policy source document into a Rego module.
pub fn compile(source_text: &str) -> Result<CompiledPolicy, PolicyError> {
    let set = PolicySet::from_yaml(source_text)?;
    validate(&set)?;

    let version = policy_version(source_text);
    let rule_ids: Vec<String> = set.rules().map(|(_, r)| r.id.clone()).collect();

    let mut out = String::new();
    out.push_str(&format!(
        "# Compiled from policy source '{}' (format version {}).\n",
        set.package, set.version
    ));
    out.push_str("# Generated by ag-policy. Do not edit.\n");
    out.push_str(&format!("package {}\n\n", ENTRYPOINT_PACKAGE));
    out.push_str("default allow := false\n\n");
    out.push_str(&format!("policy_version := {}\n", rego_str(&version)));

    for (_, rule) in set.rules() {
        out.push('\n');
        emit_rule(&mut out, rule);
    }

    out.push_str("\nallow {\n\tallow_match\n\tcount(deny_reason) == 0\n}\n");
    out.push_str(
        "\nresult := {\n\
         \t\"allow\": allow,\n\
         \t\"deny_reasons\": deny_reason,\n\
         \t\"matched_rules\": matched_rule,\n\
         \t\"version\": policy_version,\n\
         }\n",
    );

    tracing::debug!(version = %version, rules = rule_ids.len(), "compiled policy source");

    Ok(CompiledPolicy {
        version,
        rego: out,
        rule_ids,
    })
}

/// Semantic validation over a parsed set. Grammar-level problems (unknown
/// fields, wrong types) are already rejected at parse time with a location.
fn validate(set: &PolicySet) -> Result<(), PolicyError> {
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for policy in &set.policies {
        if policy.rules.is_empty() {
            return Err(PolicyError::EmptyPolicy {
                policy: policy.name.clone(),
            });
        }
        for rule in &policy.rules {
            if rule.id.trim().is_empty() {
                return Err(PolicyError::EmptyRuleId {
                    policy: policy.name.clone(),
                });
            }
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(PolicyError::DuplicateRuleId {
                    policy: policy.name.clone(),
                    id: rule.id.clone(),
                });
            }
            for (field, constraint) in &rule.condition.parameters {
                if let (Some(min), Some(max)) = (constraint.min, constraint.max) {
                    if min > max {
                        return Err(PolicyError::ConflictingConstraint {
                            rule: rule.id.clone(),
                            field: field.clone(),
                            min,
                            max,
                        });
                    }
                }
                if let Some(pattern) = &constraint.matches {
                    if let Err(e) = regex::Regex::new(pattern) {
                        return Err(PolicyError::InvalidRegex {
                            rule: rule.id.clone(),
                            field: field.clone(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }
    Ok(())
}

/// Emit the Rego fragments for one rule.
fn emit_rule(out: &mut String, rule: &Rule) {
    let body = condition_body(&rule.condition);

    // Every rule reports into matched_rule, allow and deny alike, so the
    // decision trail names what was hit.
    out.push_str(&format!("matched_rule[{}] {{\n", rego_str(&rule.id)));
    for line in &body {
        out.push_str(&format!("\t{}\n", line));
    }
    out.push_str("}\n");

    match rule.action {
        RuleAction::Allow => {
            out.push_str("\nallow_match {\n");
            for line in &body {
                out.push_str(&format!("\t{}\n", line));
            }
            out.push_str("}\n");
        }
        RuleAction::Deny => {
            let reason = rule
                .reason
                .clone()
                .unwrap_or_else(|| format!("denied by rule '{}'", rule.id));
            out.push_str("\ndeny_reason[msg] {\n");
            for line in &body {
                out.push_str(&format!("\t{}\n", line));
            }
            out.push_str(&format!("\tmsg := {}\n", rego_str(&reason)));
            out.push_str("}\n");
        }
    }
}

/// Render a condition as Rego body expressions (conjunctive).
///
/// Referencing an absent parameter field leaves the body undefined, which is
/// exactly the required semantics: absent fields fail their constraints.
fn condition_body(condition: &Condition) -> Vec<String> {
    let mut lines = Vec::new();

    if let Some(provider) = &condition.provider {
        lines.push(format!("input.action.provider == {}", rego_str(provider)));
    }
    if let Some(method) = &condition.method {
        lines.push(format!("input.action.method == {}", rego_str(method)));
    }
    if let Some(environment) = &condition.environment {
        lines.push(format!("input.environment == {}", rego_str(environment)));
    }

    for (field, constraint) in &condition.parameters {
        let value = format!("input.action.parameters[{}]", rego_str(field));
        if let Some(min) = constraint.min {
            lines.push(format!("{} >= {}", value, rego_num(min)));
        }
        if let Some(max) = constraint.max {
            lines.push(format!("{} <= {}", value, rego_num(max)));
        }
        if let Some(equals) = &constraint.equals {
            lines.push(format!("{} == {}", value, rego_value(equals)));
        }
        if let Some(one_of) = &constraint.one_of {
            let array = serde_json::Value::Array(one_of.clone());
            lines.push(format!("{} == {}[_]", value, rego_value(&array)));
        }
        if let Some(not_in) = &constraint.not_in {
            for forbidden in not_in {
                lines.push(format!("{} != {}", value, rego_value(forbidden)));
            }
        }
        if let Some(pattern) = &constraint.matches {
            lines.push(format!("regex.match({}, {})", rego_str(pattern), value));
        }
    }

    if lines.is_empty() {
        // An empty condition matches every manifest.
        lines.push("true".to_string());
    }
    lines
}

/// A Rego string literal (JSON escaping rules apply).
fn rego_str(s: &str) -> String {
    serde_json::to_string(s).expect("string serialization is infallible")
}

/// A Rego numeric literal. f64 Display drops a trailing `.0` for whole
/// numbers, matching how authors wrote them in YAML.
fn rego_num(n: f64) -> String {
    format!("{}", n)
}

/// An arbitrary JSON value as a Rego literal.
fn rego_value(v: &serde_json::Value) -> String {
    serde_json::to_string(v).expect("value serialization is infallible")
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
    fn version_is_stable_for_identical_source() {
        assert_eq!(policy_version(SAMPLE), policy_version(SAMPLE));
    }

    #[test]
    fn version_changes_with_source() {
        let touched = format!("{}\n# trailing comment", SAMPLE);
        assert_ne!(policy_version(SAMPLE), policy_version(&touched));
    }

    #[test]
    fn version_has_content_address_shape() {
        let version = policy_version(SAMPLE);
        assert!(version.starts_with("sha256:"));
        assert_eq!(version.len(), "sha256:".len() + 16);
    }

    #[test]
    fn compiles_to_fixed_entrypoint_package() {
        let compiled = compile(SAMPLE).unwrap();
        assert!(compiled.rego.contains("package agentgate.authz"));
        // The source `package: payments` is metadata, not the module package.
        assert!(!compiled.rego.contains("package payments"));
    }

    #[test]
    fn compiled_module_is_default_deny() {
        let compiled = compile(SAMPLE).unwrap();
        assert!(compiled.rego.contains("default allow := false"));
    }

    #[test]
    fn deny_rule_carries_reason_literal() {
        let compiled = compile(SAMPLE).unwrap();
        assert!(compiled
            .rego
            .contains(r#"msg := "Payment amount exceeds $50.00 limit""#));
    }

    #[test]
    fn numeric_bounds_are_inclusive() {
        let compiled = compile(SAMPLE).unwrap();
        assert!(compiled
            .rego
            .contains(r#"input.action.parameters["amount"] <= 4999"#));
        assert!(compiled
            .rego
            .contains(r#"input.action.parameters["amount"] >= 5000"#));
    }

    #[test]
    fn allow_requires_no_matching_deny() {
        let compiled = compile(SAMPLE).unwrap();
        assert!(compiled.rego.contains("allow_match"));
        assert!(compiled.rego.contains("count(deny_reason) == 0"));
    }

    #[test]
    fn rule_ids_surface_in_declared_order() {
        let compiled = compile(SAMPLE).unwrap();
        assert_eq!(
            compiled.rule_ids,
            vec!["allow-small-payments", "deny-large-payments"]
        );
        assert!(compiled.rego.contains(r#"matched_rule["allow-small-payments"]"#));
        assert!(compiled.rego.contains(r#"matched_rule["deny-large-payments"]"#));
    }

    #[test]
    fn compilation_is_deterministic() {
        assert_eq!(compile(SAMPLE).unwrap(), compile(SAMPLE).unwrap());
    }

    #[test]
    fn in_and_matches_constraints_compile() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: exports
    rules:
      - id: allow-known-regions
        condition:
          parameters:
            region: { in: ["us-east-1", "eu-west-1"] }
            bucket: { matches: "^exports-" }
        action: allow
"#;
        let compiled = compile(doc).unwrap();
        assert!(compiled
            .rego
            .contains(r#"input.action.parameters["region"] == ["us-east-1","eu-west-1"][_]"#));
        assert!(compiled
            .rego
            .contains(r#"regex.match("^exports-", input.action.parameters["bucket"])"#));
    }

    #[test]
    fn not_in_expands_conjunctively() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: envs
    rules:
      - id: deny-protected-envs
        condition:
          parameters:
            target: { not_in: ["prod-db", "prod-cache"] }
        action: allow
"#;
        let compiled = compile(doc).unwrap();
        assert!(compiled
            .rego
            .contains(r#"input.action.parameters["target"] != "prod-db""#));
        assert!(compiled
            .rego
            .contains(r#"input.action.parameters["target"] != "prod-cache""#));
    }

    #[test]
    fn empty_condition_matches_everything() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: lockdown
    rules:
      - id: deny-all
        action: deny
        reason: "maintenance freeze"
"#;
        let compiled = compile(doc).unwrap();
        assert!(compiled.rego.contains("deny_reason[msg] {\n\ttrue\n"));
    }

    #[test]
    fn duplicate_rule_ids_rejected() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - { id: r1, action: allow }
      - { id: r1, action: deny }
"#;
        match compile(doc) {
            Err(PolicyError::DuplicateRuleId { id, .. }) => assert_eq!(id, "r1"),
            other => panic!("expected DuplicateRuleId, got {:?}", other),
        }
    }

    #[test]
    fn min_greater_than_max_rejected() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: r1
        condition:
          parameters:
            amount: { min: 100, max: 50 }
        action: allow
"#;
        match compile(doc) {
            Err(PolicyError::ConflictingConstraint { field, min, max, .. }) => {
                assert_eq!(field, "amount");
                assert_eq!(min, 100.0);
                assert_eq!(max, 50.0);
            }
            other => panic!("expected ConflictingConstraint, got {:?}", other),
        }
    }

    #[test]
    fn invalid_regex_rejected() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: r1
        condition:
          parameters:
            bucket: { matches: "([unclosed" }
        action: allow
"#;
        assert!(matches!(compile(doc), Err(PolicyError::InvalidRegex { .. })));
    }

    #[test]
    fn policy_without_rules_rejected() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: empty-policy
    rules: []
"#;
        match compile(doc) {
            Err(PolicyError::EmptyPolicy { policy }) => assert_eq!(policy, "empty-policy"),
            other => panic!("expected EmptyPolicy, got {:?}", other),
        }
    }

    #[test]
    fn deny_without_reason_gets_rule_id_reason() {
        let doc = r#"
version: "1"
package: p
policies:
  - name: a
    rules:
      - id: deny-unlabelled
        action: deny
"#;
        let compiled = compile(doc).unwrap();
        assert!(compiled
            .rego
            .contains(r#"msg := "denied by rule 'deny-unlabelled'""#));
    }
}
