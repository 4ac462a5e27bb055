// payload.rs — The signed decision payload.
//
// The payload is the exact set of fields a seal attests to:
// {manifest_id, approved, policy_version, issued_at, expires_at, denial_reason?}.
// It is serialized with ag-canonical before signing, and verifiers rebuild
// the same bytes from a stored seal's fields. Timestamps are truncated to
// microseconds at issue time so the RFC 3339 rendering round-trips exactly
// through storage.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

/// The fields covered by a seal's signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealPayload {
    pub manifest_id: Uuid,
    pub approved: bool,
    pub policy_version: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Present iff `approved` is false.
    pub denial_reason: Option<String>,
}

impl SealPayload {
    /// Render the payload as a JSON value with fixed timestamp formatting.
    ///
    /// `denial_reason` is omitted entirely when absent, not emitted as null,
    /// so approved and denied payloads never collide.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "manifest_id": self.manifest_id.to_string(),
            "approved": self.approved,
            "policy_version": self.policy_version,
            "issued_at": format_timestamp(self.issued_at),
            "expires_at": format_timestamp(self.expires_at),
        });
        if let Some(reason) = &self.denial_reason {
            value["denial_reason"] = Value::String(reason.clone());
        }
        value
    }

    /// The canonical bytes that get signed.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        ag_canonical::to_canonical_bytes(&self.to_value())
    }
}

/// Fixed timestamp rendering: RFC 3339 with microsecond precision and `Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Truncate a timestamp to microsecond precision.
///
/// `Utc::now()` carries nanoseconds on most platforms; the extra digits
/// would be lost in the RFC 3339 rendering and break payload reconstruction.
pub fn truncate_to_micros(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(ts.timestamp_micros()).unwrap_or(ts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_payload(approved: bool) -> SealPayload {
        SealPayload {
            manifest_id: Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap(),
            approved,
            policy_version: "sha256:abcd1234".to_string(),
            issued_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            expires_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 5, 0).unwrap(),
            denial_reason: if approved {
                None
            } else {
                Some("over limit".to_string())
            },
        }
    }

    #[test]
    fn canonical_bytes_are_deterministic() {
        let payload = sample_payload(true);
        assert_eq!(payload.canonical_bytes(), payload.canonical_bytes());
    }

    #[test]
    fn approved_payload_omits_denial_reason() {
        let text = String::from_utf8(sample_payload(true).canonical_bytes()).unwrap();
        assert!(!text.contains("denial_reason"));
    }

    #[test]
    fn denied_payload_carries_reason() {
        let text = String::from_utf8(sample_payload(false).canonical_bytes()).unwrap();
        assert!(text.contains("\"denial_reason\":\"over limit\""));
        assert!(text.contains("\"approved\":false"));
    }

    #[test]
    fn approved_and_denied_payloads_differ() {
        assert_ne!(
            sample_payload(true).canonical_bytes(),
            sample_payload(false).canonical_bytes()
        );
    }

    #[test]
    fn timestamps_render_with_microseconds() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2026-03-01T12:00:00.000000Z");
    }

    #[test]
    fn truncation_round_trips_through_rfc3339() {
        let now = truncate_to_micros(Utc::now());
        let rendered = format_timestamp(now);
        let parsed: DateTime<Utc> = rendered.parse().unwrap();
        assert_eq!(parsed, now);
    }
}
