use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the telemetry reporter task.
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls
/// back to `debug` in verbose mode and `info` elsewhere. Calling this
/// function multiple times is harmless.
pub fn init_tracing(verbose: bool) {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Lightweight rolling counters describing what the worker has done.
#[derive(Default, Debug)]
pub struct Telemetry {
    jobs_popped: AtomicU64,
    parse_errors: AtomicU64,
    tests_executed: AtomicU64,
    probe_failures: AtomicU64,
    resolution_failures: AtomicU64,
    results_published: AtomicU64,
    results_suppressed: AtomicU64,
    recoveries: AtomicU64,
    store_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_job_popped(&self) {
        self.jobs_popped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_test_executed(&self) {
        self.tests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolution_failure(&self) {
        self.resolution_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_published(&self) {
        self.results_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_result_suppressed(&self) {
        self.results_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_error(&self) {
        self.store_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn jobs_popped(&self) -> u64 {
        self.jobs_popped.load(Ordering::Relaxed)
    }

    pub fn results_published(&self) -> u64 {
        self.results_published.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            jobs_popped: self.jobs_popped.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
            tests_executed: self.tests_executed.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            resolution_failures: self.resolution_failures.load(Ordering::Relaxed),
            results_published: self.results_published.load(Ordering::Relaxed),
            results_suppressed: self.results_suppressed.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub jobs_popped: u64,
    pub parse_errors: u64,
    pub tests_executed: u64,
    pub probe_failures: u64,
    pub resolution_failures: u64,
    pub results_published: u64,
    pub results_suppressed: u64,
    pub recoveries: u64,
    pub store_errors: u64,
}

/// Spawns a background task that periodically logs a counter snapshot.
pub fn spawn_telemetry_reporter(
    telemetry: Arc<Telemetry>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first report
        // covers a full interval.
        ticker.tick().await;

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "lookout::metrics", "telemetry reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let snapshot = telemetry.snapshot();
                    tracing::info!(
                        target: "lookout::metrics",
                        jobs = snapshot.jobs_popped,
                        executed = snapshot.tests_executed,
                        failures = snapshot.probe_failures,
                        published = snapshot.results_published,
                        suppressed = snapshot.results_suppressed,
                        recoveries = snapshot.recoveries,
                        parse_errors = snapshot.parse_errors,
                        store_errors = snapshot.store_errors,
                        "worker counters"
                    );
                }
            }
        }
    })
}
