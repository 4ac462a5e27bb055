//! # ag-canonical
//!
//! Deterministic byte encoding of JSON values for AgentGate.
//!
//! Seal signatures are computed over the canonical serialization of the seal
//! payload, and verifiers recompute that serialization from stored fields.
//! Any two encoders that disagree about byte output would invalidate
//! otherwise-good seals, so the encoding rules here are fixed:
//!
//! - object keys are emitted in strictly ascending lexicographic (byte) order
//! - arrays preserve element order
//! - integers are plain decimal with no leading zeros; floats use the
//!   shortest round-trippable decimal form (ryu, via serde_json)
//! - strings are UTF-8 with `"`, `\` and control characters escaped,
//!   control characters as `\u00XX` apart from the short forms
//! - no insignificant whitespace anywhere
//!
//! Re-encoding a parsed canonical string yields the identical string.

use serde_json::Value;
use thiserror::Error;

/// Errors from canonical encoding.
///
/// The encoder is total over [`serde_json::Value`] except for keys that
/// collide after escaping, which serde_json already prevents, so in practice
/// only parse failures surface.
#[derive(Debug, Error)]
pub enum CanonicalError {
    /// The input string was not valid JSON.
    #[error("invalid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Canonically encode a JSON value to a `String`.
pub fn to_canonical_string(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Canonically encode a JSON value to bytes (UTF-8 of [`to_canonical_string`]).
pub fn to_canonical_bytes(value: &Value) -> Vec<u8> {
    to_canonical_string(value).into_bytes()
}

/// Parse a JSON document and re-encode it canonically.
///
/// For any string already produced by [`to_canonical_string`], this returns
/// the input unchanged.
pub fn canonicalize_str(s: &str) -> Result<String, CanonicalError> {
    let value: Value = serde_json::from_str(s)?;
    Ok(to_canonical_string(&value))
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            // serde_json formats i64/u64 as plain decimal and f64 via ryu's
            // shortest round-trippable form. Both are single-form encodings,
            // which is all canonicalization needs.
            out.push_str(&n.to_string());
        }
        Value::String(s) => write_string(out, s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            // Sort keys explicitly rather than relying on the map's internal
            // ordering, so the output is stable regardless of serde_json's
            // `preserve_order` feature.
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(out, key);
                out.push(':');
                write_value(out, &map[key.as_str()]);
            }
            out.push('}');
        }
    }
}

/// Write a JSON string literal with the fixed escape policy.
fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
