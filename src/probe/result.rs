use crate::probe::spec::{fingerprint, TestSpec};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// One emitted record per (test, probed target), as published to the result
/// queue. The wire encoding is a single-line JSON object; `error` and
/// `details` serialize as `null` when absent so bridges see a stable shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Sanitized input line; secrets are already masked.
    pub input: String,
    /// Failure message. Absent on success.
    pub error: Option<String>,
    /// Multi-line diagnostic payload, used by period tests.
    pub details: Option<String>,
    /// Wall-clock seconds since epoch at emission.
    pub time: i64,
    /// The address actually probed.
    pub target: String,
    /// Protocol name.
    #[serde(rename = "type")]
    pub test_type: String,
    /// Worker-global label.
    pub tag: String,
    /// True when this alert repeats a previous alert for the same
    /// fingerprint after the dedup window elapsed.
    #[serde(rename = "isDedup", default)]
    pub is_dedup: bool,
    /// True on the first success after a tracked failure.
    #[serde(default)]
    pub recovered: bool,
}

impl ProbeResult {
    /// Builds a result for the given probed target, stamped with the current
    /// wall-clock time. The input is sanitized here so no raw secret ever
    /// reaches the queue.
    pub fn record(
        spec: &TestSpec,
        target: impl Into<String>,
        tag: impl Into<String>,
        error: Option<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            input: spec.sanitize(),
            error,
            details,
            time: unix_now(),
            target: target.into(),
            test_type: spec.test_type.clone(),
            tag: tag.into(),
            is_dedup: false,
            recovered: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Fingerprint keying the dedup state for this result.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.input)
    }

    /// Single-line JSON encoding used on the result queue.
    pub fn to_wire(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode result record")
    }
}

/// Wall-clock seconds since the unix epoch.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample() -> ProbeResult {
        let spec = TestSpec::new(
            "1.2.3.4 must run tcp with port 22",
            "tcp",
            "1.2.3.4",
            HashMap::new(),
        );
        ProbeResult::record(&spec, "1.2.3.4", "t1", None, None)
    }

    #[test]
    fn wire_encoding_is_a_single_line_with_stable_fields() {
        let wire = sample().to_wire().expect("result should encode");
        assert!(!wire.contains('\n'));
        let value: serde_json::Value = serde_json::from_str(&wire).expect("valid json");
        assert_eq!(value["type"], "tcp");
        assert_eq!(value["tag"], "t1");
        assert_eq!(value["target"], "1.2.3.4");
        assert!(value["error"].is_null());
        assert!(value["details"].is_null());
        assert_eq!(value["isDedup"], false);
        assert_eq!(value["recovered"], false);
        assert!(value["time"].as_i64().expect("time is an integer") > 0);
    }

    #[test]
    fn wire_encoding_round_trips() {
        let mut result = sample();
        result.error = Some("connection refused".to_string());
        result.is_dedup = true;
        let wire = result.to_wire().expect("result should encode");
        let decoded: ProbeResult = serde_json::from_str(&wire).expect("result should decode");
        assert_eq!(decoded, result);
    }

    #[test]
    fn record_sanitizes_the_input_line() {
        let spec = TestSpec::new(
            "db must run redis with password topsecret",
            "redis",
            "db",
            HashMap::new(),
        );
        let result = ProbeResult::record(&spec, "10.0.0.1", "", None, None);
        assert!(!result.input.contains("topsecret"));
    }
}
