//! The test execution engine: carries one parsed test through target
//! derivation, per-target fan-out, retry smoothing or period aggregation,
//! dedup decisions, and result emission.

use crate::executor::dedup::{self, AlertDecision};
use crate::executor::metrics::{resolution_metric_key, test_metric_key, MetricsBatch};
use crate::executor::resolve::{filter_families, probe_host, Resolve};
use crate::probe::{ProbeOptions, ProbeResult, ProtocolHandler, ProtocolRegistry, TestSpec};
use crate::queue::ResultStore;
use crate::runtime::carbon::CarbonSink;
use crate::runtime::config::WorkerConfig;
use crate::runtime::telemetry::Telemetry;
use anyhow::{anyhow, Result};
use futures::future::{self, BoxFuture, FutureExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

/// Worker-level execution defaults applied to every test that does not
/// override them.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub ipv4: bool,
    pub ipv6: bool,
    pub retry: bool,
    pub retry_count: u32,
    pub retry_delay: Duration,
    pub dedup_duration: Option<Duration>,
    pub period_sleep: Duration,
    pub period_threshold: f32,
    pub timeout: Duration,
    pub tag: String,
    pub verbose: bool,
}

impl ExecutorSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            ipv4: config.ipv4(),
            ipv6: config.ipv6(),
            retry: config.retry(),
            retry_count: config.retry_count(),
            retry_delay: config.retry_delay(),
            dedup_duration: config.dedup_duration(),
            period_sleep: config.period_sleep(),
            period_threshold: config.period_threshold(),
            timeout: config.timeout(),
            tag: config.tag().to_string(),
            verbose: config.verbose(),
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            retry: true,
            retry_count: 5,
            retry_delay: Duration::from_secs(5),
            dedup_duration: None,
            period_sleep: Duration::from_secs(5),
            period_threshold: 0.0,
            timeout: Duration::from_secs(10),
            tag: String::new(),
            verbose: false,
        }
    }
}

pub struct ExecutorParams {
    pub registry: Arc<ProtocolRegistry>,
    pub results: Arc<dyn ResultStore>,
    pub resolver: Arc<dyn Resolve>,
    pub carbon: Option<Arc<CarbonSink>>,
    pub telemetry: Arc<Telemetry>,
    pub settings: ExecutorSettings,
}

pub struct Executor {
    registry: Arc<ProtocolRegistry>,
    results: Arc<dyn ResultStore>,
    resolver: Arc<dyn Resolve>,
    carbon: Option<Arc<CarbonSink>>,
    telemetry: Arc<Telemetry>,
    settings: ExecutorSettings,
}

impl Executor {
    pub fn new(params: ExecutorParams) -> Self {
        Self {
            registry: params.registry,
            results: params.results,
            resolver: params.resolver,
            carbon: params.carbon,
            telemetry: params.telemetry,
            settings: params.settings,
        }
    }

    /// Runs one test to completion, emitting zero or more result records.
    ///
    /// Handler and store failures surface as result records or log lines,
    /// never as an error from this method.
    #[tracing::instrument(name = "test", skip_all, fields(worker = worker_id, test_type = %spec.test_type))]
    pub async fn execute(&self, worker_id: usize, mut spec: TestSpec) -> Result<()> {
        self.telemetry.record_test_executed();

        // Period tests aggregate failures themselves and never receive an
        // implicit dedup window.
        if spec.dedup_duration.is_none() && !spec.is_period_test() {
            spec.dedup_duration = self.settings.dedup_duration;
        }

        let Some(handler) = self.registry.create(&spec.test_type) else {
            tracing::warn!(test_type = %spec.test_type, "no handler registered for protocol");
            let target = spec.target.clone();
            let error = format!("unknown protocol {}", spec.test_type);
            self.notify(&spec, &target, Some(error), None).await;
            return Ok(());
        };

        let options = ProbeOptions {
            timeout: spec.timeout.unwrap_or(self.settings.timeout),
            verbose: self.settings.verbose,
        };

        let mut batch = MetricsBatch::new();
        let Some(targets) = self
            .derive_targets(&spec, handler.as_ref(), &mut batch)
            .await
        else {
            self.submit_metrics(batch);
            return Ok(());
        };

        tracing::debug!(resolved = targets.len(), input = %spec.target, "probing targets");

        let probes = targets
            .iter()
            .map(|target| self.run_target(&spec, handler.as_ref(), target, &options));
        for target_batch in future::join_all(probes).await {
            batch.merge(target_batch);
        }

        self.submit_metrics(batch);
        Ok(())
    }

    /// Resolves the probed-target set, or `None` when a failure result was
    /// already emitted.
    async fn derive_targets(
        &self,
        spec: &TestSpec,
        handler: &dyn ProtocolHandler,
        batch: &mut MetricsBatch,
    ) -> Option<Vec<String>> {
        if !handler.should_resolve_hostname() {
            return Some(vec![spec.target.clone()]);
        }

        let host = match probe_host(&spec.target) {
            Ok(host) => host,
            Err(err) => {
                self.telemetry.record_resolution_failure();
                tracing::warn!(input = %spec.target, error = %err, "unusable test target");
                self.notify(spec, &spec.target, Some(format!("{err:#}")), None)
                    .await;
                return None;
            }
        };

        let started = Instant::now();
        let ips = match self.resolver.lookup(&host).await {
            Ok(ips) => ips,
            Err(err) => {
                self.telemetry.record_resolution_failure();
                tracing::warn!(host = %host, error = %err, "name resolution failed");
                self.notify(
                    spec,
                    &spec.target,
                    Some(format!("failed to resolve name {host}")),
                    None,
                )
                .await;
                return None;
            }
        };
        batch.record(
            resolution_metric_key(&host),
            format_millis(started.elapsed()),
        );

        let mut targets = filter_families(ips, self.settings.ipv4, self.settings.ipv6);
        if spec.max_targets > 0 && targets.len() > spec.max_targets {
            targets.truncate(spec.max_targets);
        }
        Some(targets)
    }

    async fn run_target(
        &self,
        spec: &TestSpec,
        handler: &dyn ProtocolHandler,
        target: &str,
        options: &ProbeOptions,
    ) -> MetricsBatch {
        if spec.is_period_test() {
            self.run_period(spec, handler, target, options).await
        } else {
            self.run_single(spec, handler, target, options).await
        }
    }

    /// One probed target of a regular test: retry until success or the
    /// attempt budget runs out, then emit exactly one result.
    async fn run_single(
        &self,
        spec: &TestSpec,
        handler: &dyn ProtocolHandler,
        target: &str,
        options: &ProbeOptions,
    ) -> MetricsBatch {
        let mut batch = MetricsBatch::new();
        let max_attempts = self.max_attempts(spec);
        let started = Instant::now();
        let mut attempts = 0u32;

        let error = loop {
            attempts += 1;
            match self.invoke(handler, spec, target, options).await {
                Ok(()) => {
                    tracing::debug!(addr = target, attempt = attempts, max_attempts, "probe passed");
                    break None;
                }
                Err(err) => {
                    tracing::debug!(
                        addr = target,
                        attempt = attempts,
                        max_attempts,
                        error = %err,
                        "probe failed"
                    );
                    if attempts >= max_attempts {
                        break Some(format!("{err:#}"));
                    }
                    sleep(self.settings.retry_delay).await;
                }
            }
        };

        batch.record(
            test_metric_key(spec, "duration"),
            format_millis(started.elapsed()),
        );
        batch.record(test_metric_key(spec, "attempts"), attempts.to_string());

        self.notify(spec, target, error, None).await;
        batch
    }

    /// One probed target of a period test: single-shot invocations until the
    /// deadline, then one aggregated result against the failure threshold.
    async fn run_period(
        &self,
        spec: &TestSpec,
        handler: &dyn ProtocolHandler,
        target: &str,
        options: &ProbeOptions,
    ) -> MetricsBatch {
        let mut batch = MetricsBatch::new();
        let duration = spec.period_duration.unwrap_or_default();
        let pause = spec.period_sleep.unwrap_or(self.settings.period_sleep);
        let threshold = spec.period_threshold.unwrap_or(self.settings.period_threshold);

        tracing::debug!(
            addr = target,
            duration = ?duration,
            pause = ?pause,
            threshold,
            "starting period test"
        );

        let started = Instant::now();
        let deadline = started + duration;
        let mut passed = 0u32;
        let mut failed = 0u32;
        let mut iteration = 0u32;
        let mut failures: Vec<String> = Vec::new();

        while Instant::now() < deadline {
            iteration += 1;
            let attempt_started = Instant::now();
            let outcome = self.invoke(handler, spec, target, options).await;
            let elapsed = format_millis(attempt_started.elapsed());
            match outcome {
                Ok(()) => {
                    passed += 1;
                    tracing::debug!(addr = target, iteration, "period iteration passed");
                }
                Err(err) => {
                    failed += 1;
                    tracing::debug!(addr = target, iteration, error = %err, "period iteration failed");
                    failures.push(format!("test {iteration} failed, took {elapsed}ms: {err:#}"));
                }
            }
            sleep(pause).await;
        }

        // A window too short for a single iteration counts as a pass.
        let total = passed + failed;
        let error_rate = if total == 0 {
            0.0
        } else {
            failed as f32 / total as f32
        };

        let details = (!failures.is_empty()).then(|| {
            let lines: Vec<String> = failures.iter().map(|line| format!("- {line}")).collect();
            format!("Period-test errors:\n{}", lines.join("\n"))
        });
        let error = (error_rate > threshold).then(|| {
            format!(
                "{failed} tests failed out of {total} ({:.2}%)",
                error_rate * 100.0
            )
        });

        batch.record(
            test_metric_key(spec, "duration"),
            format_millis(started.elapsed()),
        );
        batch.record(test_metric_key(spec, "attempts"), total.to_string());

        self.notify(spec, target, error, details).await;
        batch
    }

    fn max_attempts(&self, spec: &TestSpec) -> u32 {
        match spec.max_retries {
            // A per-test budget wins even when worker retries are disabled.
            Some(retries) => retries.saturating_add(1),
            None if self.settings.retry => self.settings.retry_count.saturating_add(1),
            None => 1,
        }
        .max(1)
    }

    /// Invokes the handler once, converting a panic into a plain failure so
    /// one bad probe cannot take down the worker.
    async fn invoke(
        &self,
        handler: &dyn ProtocolHandler,
        spec: &TestSpec,
        target: &str,
        options: &ProbeOptions,
    ) -> Result<()> {
        match AssertUnwindSafe(handler.run_test(spec, target, options))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => Err(anyhow!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            )),
        }
    }

    /// Finalizes one result: dedup decision, state writes, and publication.
    async fn notify(
        &self,
        spec: &TestSpec,
        target: &str,
        error: Option<String>,
        details: Option<String>,
    ) {
        let mut result =
            ProbeResult::record(spec, target, self.settings.tag.clone(), error, details);
        if result.is_failure() {
            self.telemetry.record_probe_failure();
        }

        if let Some(window) = spec.dedup_duration {
            let fingerprint = result.fingerprint();
            let cache_time = self
                .read_state(self.results.dedup_cache_time(&fingerprint))
                .await;
            let last_alert = self
                .read_state(self.results.last_alert_time(&fingerprint))
                .await;

            let outcome = dedup::decide(
                result.is_failure(),
                Some(window),
                result.time,
                cache_time,
                last_alert,
            );
            let ttl = dedup::state_ttl(window);

            if outcome.refresh_cache {
                self.apply_state(
                    self.results
                        .set_dedup_cache_time(&fingerprint, result.time, ttl),
                )
                .await;
            }
            if outcome.set_last_alert {
                self.apply_state(
                    self.results
                        .set_last_alert_time(&fingerprint, result.time, ttl),
                )
                .await;
            }
            if outcome.clear_state {
                self.apply_state(self.results.clear_dedup_cache_time(&fingerprint))
                    .await;
                self.apply_state(self.results.clear_last_alert_time(&fingerprint))
                    .await;
            }

            match outcome.decision {
                AlertDecision::Suppress => {
                    tracing::debug!(addr = target, input = %result.input, "suppressing duplicate alert");
                    self.telemetry.record_result_suppressed();
                    return;
                }
                AlertDecision::EmitNothing => {
                    self.telemetry.record_result_suppressed();
                    return;
                }
                AlertDecision::EmitDedupedAlert => result.is_dedup = true,
                AlertDecision::EmitRecovery => {
                    result.recovered = true;
                    self.telemetry.record_recovery();
                    tracing::info!(addr = target, input = %result.input, "test recovered");
                }
                AlertDecision::EmitAlert => {}
            }
        }

        match self.results.publish(&result).await {
            Ok(()) => self.telemetry.record_result_published(),
            Err(err) => {
                self.telemetry.record_store_error();
                tracing::warn!(error = %err, "failed to publish result");
            }
        }
    }

    async fn read_state(&self, read: BoxFuture<'_, Result<Option<i64>>>) -> Option<i64> {
        match read.await {
            Ok(value) => value,
            Err(err) => {
                self.telemetry.record_store_error();
                tracing::warn!(error = %err, "failed to read dedup state");
                None
            }
        }
    }

    async fn apply_state(&self, write: BoxFuture<'_, Result<()>>) {
        if let Err(err) = write.await {
            self.telemetry.record_store_error();
            tracing::warn!(error = %err, "failed to update dedup state");
        }
    }

    fn submit_metrics(&self, batch: MetricsBatch) {
        if batch.is_empty() {
            return;
        }
        if let Some(carbon) = &self.carbon {
            carbon.submit(batch);
        }
    }
}

fn format_millis(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64() * 1_000.0)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
