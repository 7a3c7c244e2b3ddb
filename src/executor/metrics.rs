//! Per-test metric collection for the carbon sink.

use crate::probe::TestSpec;
use once_cell::sync::Lazy;
use regex::Regex;

const METRIC_PREFIX: &str = "lookout";

static NON_ALPHANUMERIC: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^A-Za-z0-9]+").expect("squash pattern should compile"));

/// Key/value pairs accumulated while one test executes, submitted to the
/// carbon sink in one batch after all targets complete.
#[derive(Debug, Default, Clone)]
pub struct MetricsBatch {
    entries: Vec<(String, String)>,
}

impl MetricsBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.push((key.into(), value.into()));
    }

    pub fn merge(&mut self, other: MetricsBatch) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(String, String)] {
        &self.entries
    }
}

/// Squashes a name into the `[A-Za-z0-9_]` alphabet carbon paths allow.
pub fn squash(input: &str) -> String {
    NON_ALPHANUMERIC.replace_all(input, "_").into_owned()
}

/// Metric key for one test execution measurement.
///
/// DNS tests key on the looked-up name rather than the nameserver target,
/// which is what an operator graphs.
pub fn test_metric_key(spec: &TestSpec, key: &str) -> String {
    if spec.test_type == "dns" {
        let lookup = spec
            .arguments
            .get("lookup")
            .map(String::as_str)
            .unwrap_or(&spec.target);
        return format!("{METRIC_PREFIX}.test.dns.{}.{key}", squash(lookup));
    }
    format!(
        "{METRIC_PREFIX}.test.{}.{}.{key}",
        spec.test_type,
        squash(&spec.target)
    )
}

/// Metric key for the name-resolution latency of a hostname.
pub fn resolution_metric_key(host: &str) -> String {
    format!("{METRIC_PREFIX}.dns.{}.duration", squash(host))
}
