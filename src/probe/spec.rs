use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// Argument names whose values are masked before a test line leaves the
/// worker in any result record.
pub const SENSITIVE_ARGUMENTS: &[&str] = &["password"];

const MASK: &str = "**redacted**";

static SANITIZE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    let keys = SENSITIVE_ARGUMENTS.join("|");
    Regex::new(&format!(r#"\b({keys})\s+('[^']*'|"[^"]*"|\S+)"#))
        .expect("sanitize pattern should compile")
});

/// One parsed probe definition: the payload of a single job-queue element.
///
/// Immutable once parsed. The executor clones it per probed target with the
/// `target` field overwritten by the concrete address.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSpec {
    /// The original input line, exactly as pulled from the queue.
    pub input: String,
    /// Protocol name, e.g. `tcp` or `http`.
    pub test_type: String,
    /// Hostname, URL, or IP literal to probe.
    pub target: String,
    /// Handler arguments, validated against the handler schema at parse time.
    pub arguments: HashMap<String, String>,
    /// Per-test probe timeout, overriding the worker default.
    pub timeout: Option<Duration>,
    /// Per-test retry budget, overriding the worker retry policy.
    pub max_retries: Option<u32>,
    /// Deduplication window. `None` disables deduplication for this test.
    pub dedup_duration: Option<Duration>,
    /// Upper bound on probed targets after resolution. Zero means unlimited.
    pub max_targets: usize,
    /// Marks a period test and bounds its sampling window.
    pub period_duration: Option<Duration>,
    /// Sleep between period-test iterations.
    pub period_sleep: Option<Duration>,
    /// Failure-rate threshold above which a period test alerts.
    pub period_threshold: Option<f32>,
}

impl TestSpec {
    pub fn new(
        input: impl Into<String>,
        test_type: impl Into<String>,
        target: impl Into<String>,
        arguments: HashMap<String, String>,
    ) -> Self {
        Self {
            input: input.into(),
            test_type: test_type.into(),
            target: target.into(),
            arguments,
            timeout: None,
            max_retries: None,
            dedup_duration: None,
            max_targets: 0,
            period_duration: None,
            period_sleep: None,
            period_threshold: None,
        }
    }

    pub fn is_period_test(&self) -> bool {
        self.period_duration.is_some()
    }

    /// Returns the input line with every sensitive argument value masked.
    ///
    /// Idempotent; the ordering of non-sensitive arguments is untouched.
    pub fn sanitize(&self) -> String {
        SANITIZE_PATTERN
            .replace_all(&self.input, format!("$1 {MASK}").as_str())
            .into_owned()
    }
}

/// Options handed to every handler invocation.
#[derive(Debug, Clone, Copy)]
pub struct ProbeOptions {
    /// Upper bound on the wall-clock duration of one handler invocation.
    pub timeout: Duration,
    /// Whether handlers may emit extra diagnostic logging.
    pub verbose: bool,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            verbose: false,
        }
    }
}

/// Stable fingerprint over a sanitized input line, keying dedup state.
pub fn fingerprint(sanitized_input: &str) -> String {
    hex::encode(Sha256::digest(sanitized_input.as_bytes()))
}
