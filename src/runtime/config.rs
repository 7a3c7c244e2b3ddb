use crate::probe::parse_percentage;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the optional JSON configuration file whose
/// fields mirror the CLI flags. Explicit CLI flags override the file.
pub const CONFIG_ENV: &str = "LOOKOUT";

const DEFAULT_RETRY_COUNT: u32 = 5;
const DEFAULT_RETRY_DELAY_SECS: u64 = 5;
const DEFAULT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_REDIS_HOST: &str = "localhost:6379";
const DEFAULT_REDIS_TIMEOUT_SECS: u64 = 5;
const DEFAULT_PERIOD_SLEEP_SECS: u64 = 5;

/// Runtime configuration for one worker process.
///
/// All instances are constructed via [`WorkerConfig::builder`] so invariants
/// are validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    parallel: usize,
    ipv4: bool,
    ipv6: bool,
    retry: bool,
    retry_count: u32,
    retry_delay: Duration,
    dedup_duration: Option<Duration>,
    timeout: Duration,
    tag: String,
    verbose: bool,
    redis_host: String,
    redis_db: i64,
    redis_password: Option<String>,
    redis_socket: Option<String>,
    redis_timeout: Duration,
    period_sleep: Duration,
    period_threshold: f32,
}

impl WorkerConfig {
    pub fn builder() -> WorkerConfigBuilder {
        WorkerConfigBuilder::default()
    }

    /// Number of parallel worker slots.
    pub fn parallel(&self) -> usize {
        self.parallel
    }

    pub fn ipv4(&self) -> bool {
        self.ipv4
    }

    pub fn ipv6(&self) -> bool {
        self.ipv6
    }

    pub fn retry(&self) -> bool {
        self.retry
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Default dedup window applied to tests without their own.
    pub fn dedup_duration(&self) -> Option<Duration> {
        self.dedup_duration
    }

    /// Default upper bound on one handler invocation.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Label stamped on every result this worker emits.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    pub fn redis_host(&self) -> &str {
        &self.redis_host
    }

    pub fn redis_db(&self) -> i64 {
        self.redis_db
    }

    pub fn redis_password(&self) -> Option<&str> {
        self.redis_password.as_deref()
    }

    pub fn redis_socket(&self) -> Option<&str> {
        self.redis_socket.as_deref()
    }

    pub fn redis_timeout(&self) -> Duration {
        self.redis_timeout
    }

    pub fn period_sleep(&self) -> Duration {
        self.period_sleep
    }

    pub fn period_threshold(&self) -> f32 {
        self.period_threshold
    }

    pub fn validate(&self) -> Result<()> {
        if self.parallel == 0 {
            bail!("parallel must be greater than 0");
        }
        if self.timeout.is_zero() {
            bail!("timeout must be greater than 0");
        }
        if self.redis_timeout.is_zero() {
            bail!("redis-timeout must be greater than 0");
        }
        if self.period_sleep.is_zero() {
            bail!("period-test-sleep must be greater than 0");
        }
        if !(0.0..=1.0).contains(&self.period_threshold) {
            bail!("period-test-threshold must be between 0 and 100%");
        }
        if self.redis_socket.is_none() && self.redis_host.trim().is_empty() {
            bail!("redis-host cannot be empty");
        }
        Ok(())
    }
}

/// JSON file counterpart of the CLI flags. Durations are humantime strings
/// and the threshold accepts the same spellings as the flag.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FileConfig {
    pub parallel: Option<usize>,
    pub ipv4: Option<bool>,
    pub ipv6: Option<bool>,
    pub retry: Option<bool>,
    pub retry_count: Option<u32>,
    pub retry_delay: Option<String>,
    pub dedup: Option<String>,
    pub timeout: Option<String>,
    pub tag: Option<String>,
    pub verbose: Option<bool>,
    pub redis_host: Option<String>,
    pub redis_pass: Option<String>,
    pub redis_db: Option<i64>,
    pub redis_socket: Option<String>,
    pub redis_timeout: Option<String>,
    pub period_test_sleep: Option<String>,
    pub period_test_threshold: Option<String>,
}

impl FileConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid configuration file {}", path.display()))
    }
}

#[derive(Debug, Default, Clone)]
pub struct WorkerConfigBuilder {
    parallel: Option<usize>,
    ipv4: Option<bool>,
    ipv6: Option<bool>,
    retry: Option<bool>,
    retry_count: Option<u32>,
    retry_delay: Option<Duration>,
    dedup_duration: Option<Duration>,
    timeout: Option<Duration>,
    tag: Option<String>,
    verbose: Option<bool>,
    redis_host: Option<String>,
    redis_db: Option<i64>,
    redis_password: Option<String>,
    redis_socket: Option<String>,
    redis_timeout: Option<Duration>,
    period_sleep: Option<Duration>,
    period_threshold: Option<f32>,
}

impl WorkerConfigBuilder {
    pub fn parallel(mut self, parallel: usize) -> Self {
        self.parallel = Some(parallel);
        self
    }

    pub fn ipv4(mut self, enabled: bool) -> Self {
        self.ipv4 = Some(enabled);
        self
    }

    pub fn ipv6(mut self, enabled: bool) -> Self {
        self.ipv6 = Some(enabled);
        self
    }

    pub fn retry(mut self, enabled: bool) -> Self {
        self.retry = Some(enabled);
        self
    }

    pub fn retry_count(mut self, count: u32) -> Self {
        self.retry_count = Some(count);
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = Some(delay);
        self
    }

    /// Sets the default dedup window; a zero duration disables it.
    pub fn dedup_duration(mut self, window: Duration) -> Self {
        self.dedup_duration = (!window.is_zero()).then_some(window);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn redis_host(mut self, host: impl Into<String>) -> Self {
        self.redis_host = Some(host.into());
        self
    }

    pub fn redis_db(mut self, db: i64) -> Self {
        self.redis_db = Some(db);
        self
    }

    pub fn redis_password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.redis_password = (!password.is_empty()).then_some(password);
        self
    }

    pub fn redis_socket(mut self, socket: impl Into<String>) -> Self {
        let socket = socket.into();
        self.redis_socket = (!socket.is_empty()).then_some(socket);
        self
    }

    pub fn redis_timeout(mut self, timeout: Duration) -> Self {
        self.redis_timeout = Some(timeout);
        self
    }

    pub fn period_sleep(mut self, sleep: Duration) -> Self {
        self.period_sleep = Some(sleep);
        self
    }

    pub fn period_threshold(mut self, threshold: f32) -> Self {
        self.period_threshold = Some(threshold);
        self
    }

    /// Applies file-level defaults. Builder fields set afterwards (the CLI
    /// flags) override anything from the file.
    pub fn apply_file(mut self, file: &FileConfig) -> Result<Self> {
        if let Some(parallel) = file.parallel {
            self.parallel = Some(parallel);
        }
        if let Some(ipv4) = file.ipv4 {
            self.ipv4 = Some(ipv4);
        }
        if let Some(ipv6) = file.ipv6 {
            self.ipv6 = Some(ipv6);
        }
        if let Some(retry) = file.retry {
            self.retry = Some(retry);
        }
        if let Some(count) = file.retry_count {
            self.retry_count = Some(count);
        }
        if let Some(delay) = &file.retry_delay {
            self.retry_delay = Some(parse_file_duration("retry-delay", delay)?);
        }
        if let Some(dedup) = &file.dedup {
            let window = parse_file_duration("dedup", dedup)?;
            self.dedup_duration = (!window.is_zero()).then_some(window);
        }
        if let Some(timeout) = &file.timeout {
            self.timeout = Some(parse_file_duration("timeout", timeout)?);
        }
        if let Some(tag) = &file.tag {
            self.tag = Some(tag.clone());
        }
        if let Some(verbose) = file.verbose {
            self.verbose = Some(verbose);
        }
        if let Some(host) = &file.redis_host {
            self.redis_host = Some(host.clone());
        }
        if let Some(password) = &file.redis_pass {
            self.redis_password = (!password.is_empty()).then(|| password.clone());
        }
        if let Some(db) = file.redis_db {
            self.redis_db = Some(db);
        }
        if let Some(socket) = &file.redis_socket {
            self.redis_socket = (!socket.is_empty()).then(|| socket.clone());
        }
        if let Some(timeout) = &file.redis_timeout {
            self.redis_timeout = Some(parse_file_duration("redis-timeout", timeout)?);
        }
        if let Some(sleep) = &file.period_test_sleep {
            self.period_sleep = Some(parse_file_duration("period-test-sleep", sleep)?);
        }
        if let Some(threshold) = &file.period_test_threshold {
            self.period_threshold = Some(
                parse_percentage(threshold)
                    .with_context(|| format!("invalid period-test-threshold '{threshold}'"))?,
            );
        }
        Ok(self)
    }

    pub fn build(self) -> Result<WorkerConfig> {
        let config = WorkerConfig {
            parallel: self.parallel.unwrap_or_else(default_parallelism),
            ipv4: self.ipv4.unwrap_or(true),
            ipv6: self.ipv6.unwrap_or(true),
            retry: self.retry.unwrap_or(true),
            retry_count: self.retry_count.unwrap_or(DEFAULT_RETRY_COUNT),
            retry_delay: self
                .retry_delay
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RETRY_DELAY_SECS)),
            dedup_duration: self.dedup_duration,
            timeout: self
                .timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TIMEOUT_SECS)),
            tag: self.tag.unwrap_or_default(),
            verbose: self.verbose.unwrap_or(false),
            redis_host: self
                .redis_host
                .unwrap_or_else(|| DEFAULT_REDIS_HOST.to_string()),
            redis_db: self.redis_db.unwrap_or(0),
            redis_password: self.redis_password,
            redis_socket: self.redis_socket,
            redis_timeout: self
                .redis_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REDIS_TIMEOUT_SECS)),
            period_sleep: self
                .period_sleep
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_PERIOD_SLEEP_SECS)),
            period_threshold: self.period_threshold.unwrap_or(0.0),
        };

        config.validate()?;
        Ok(config)
    }
}

fn parse_file_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value).with_context(|| format!("invalid {field} value '{value}'"))
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}
