//! Worker binary: pulls probe jobs from the shared Redis queue and executes
//! them until interrupted.
//!
//! Defaults come from the built-in configuration, overridden by the JSON
//! file named in `LOOKOUT`, overridden by explicit CLI flags.

use anyhow::{Context, Result};
use clap::Parser as _;
use lookout::executor::{Executor, ExecutorParams, ExecutorSettings, SystemResolver};
use lookout::probe::{parse_percentage, Parser, ProtocolRegistry};
use lookout::queue::{JobQueue, RedisSettings, RedisStore, ResultStore};
use lookout::runtime::carbon::CarbonSink;
use lookout::runtime::config::{FileConfig, WorkerConfig, CONFIG_ENV};
use lookout::runtime::telemetry::{
    init_tracing, spawn_telemetry_reporter, Telemetry, DEFAULT_REPORT_INTERVAL,
};
use lookout::runtime::Runner;
use lookout::worker::{WorkerPool, WorkerPoolParams};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(clap::Parser, Debug)]
#[command(
    name = "lookout",
    version,
    about = "Execute probe jobs pulled from the shared queue, until terminated"
)]
struct Cli {
    /// Number of tests executed in parallel.
    #[arg(long)]
    parallel: Option<usize>,

    /// Probe resolved IPv4 addresses.
    #[arg(short = '4', long = "ipv4", num_args = 0..=1, default_missing_value = "true")]
    ipv4: Option<bool>,

    /// Probe resolved IPv6 addresses.
    #[arg(short = '6', long = "ipv6", num_args = 0..=1, default_missing_value = "true")]
    ipv6: Option<bool>,

    /// Retry failing tests before raising an alert.
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    retry: Option<bool>,

    /// How many times to retry a failing test.
    #[arg(long)]
    retry_count: Option<u32>,

    /// Pause between retries of a failing test.
    #[arg(long, value_parser = humantime::parse_duration)]
    retry_delay: Option<Duration>,

    /// Default dedup window applied to tests without their own.
    #[arg(long, value_parser = humantime::parse_duration)]
    dedup: Option<Duration>,

    /// Upper bound on one probe invocation.
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Label stamped on every emitted result.
    #[arg(long)]
    tag: Option<String>,

    /// Show more output.
    #[arg(long)]
    verbose: bool,

    /// Address of the redis queue, as host or host:port.
    #[arg(long)]
    redis_host: Option<String>,

    /// Password for the redis queue.
    #[arg(long = "redis-pass")]
    redis_password: Option<String>,

    /// Redis database number.
    #[arg(long)]
    redis_db: Option<i64>,

    /// Unix socket for the redis connection, replacing the host.
    #[arg(long)]
    redis_socket: Option<String>,

    /// Redis connection timeout.
    #[arg(long, value_parser = humantime::parse_duration)]
    redis_timeout: Option<Duration>,

    /// Default sleep between period-test iterations.
    #[arg(long, value_parser = humantime::parse_duration)]
    period_test_sleep: Option<Duration>,

    /// Default failure percentage that makes a period test alert.
    #[arg(long, value_parser = parse_percentage)]
    period_test_threshold: Option<f32>,
}

impl Cli {
    fn into_config(self) -> Result<WorkerConfig> {
        let mut builder = WorkerConfig::builder();

        if let Ok(path) = std::env::var(CONFIG_ENV) {
            let file = FileConfig::load(&path)?;
            builder = builder.apply_file(&file)?;
        }

        if let Some(parallel) = self.parallel {
            builder = builder.parallel(parallel);
        }
        if let Some(ipv4) = self.ipv4 {
            builder = builder.ipv4(ipv4);
        }
        if let Some(ipv6) = self.ipv6 {
            builder = builder.ipv6(ipv6);
        }
        if let Some(retry) = self.retry {
            builder = builder.retry(retry);
        }
        if let Some(count) = self.retry_count {
            builder = builder.retry_count(count);
        }
        if let Some(delay) = self.retry_delay {
            builder = builder.retry_delay(delay);
        }
        if let Some(window) = self.dedup {
            builder = builder.dedup_duration(window);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(tag) = self.tag {
            builder = builder.tag(tag);
        }
        if self.verbose {
            builder = builder.verbose(true);
        }
        if let Some(host) = self.redis_host {
            builder = builder.redis_host(host);
        }
        if let Some(password) = self.redis_password {
            builder = builder.redis_password(password);
        }
        if let Some(db) = self.redis_db {
            builder = builder.redis_db(db);
        }
        if let Some(socket) = self.redis_socket {
            builder = builder.redis_socket(socket);
        }
        if let Some(timeout) = self.redis_timeout {
            builder = builder.redis_timeout(timeout);
        }
        if let Some(sleep) = self.period_test_sleep {
            builder = builder.period_sleep(sleep);
        }
        if let Some(threshold) = self.period_test_threshold {
            builder = builder.period_threshold(threshold);
        }

        builder.build()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Cli::parse().into_config()?;
    init_tracing(config.verbose());

    let store = Arc::new(
        RedisStore::connect(&RedisSettings {
            host: config.redis_host().to_string(),
            db: config.redis_db(),
            password: config.redis_password().map(str::to_string),
            socket: config.redis_socket().map(str::to_string),
            connect_timeout: config.redis_timeout(),
        })
        .await
        .context("failed to connect to the queue store")?,
    );

    let telemetry = Arc::new(Telemetry::default());
    let registry = Arc::new(ProtocolRegistry::with_builtins());
    let parser = Arc::new(Parser::new(registry.clone()));

    let executor = Arc::new(Executor::new(ExecutorParams {
        registry,
        results: store.clone() as Arc<dyn ResultStore>,
        resolver: Arc::new(SystemResolver),
        carbon: CarbonSink::from_environment().map(Arc::new),
        telemetry: telemetry.clone(),
        settings: ExecutorSettings::from_config(&config),
    }));

    let shutdown = CancellationToken::new();
    let reporter = spawn_telemetry_reporter(
        telemetry.clone(),
        shutdown.clone(),
        DEFAULT_REPORT_INTERVAL,
    );

    let pool = WorkerPool::new(WorkerPoolParams {
        parallel: config.parallel(),
        queue: store as Arc<dyn JobQueue>,
        parser,
        executor,
        telemetry,
        shutdown: shutdown.clone(),
    });

    tracing::info!(
        parallel = config.parallel(),
        tag = config.tag(),
        "starting worker"
    );
    let outcome = Runner::new(pool).run_until_signal().await;

    shutdown.cancel();
    let _ = reporter.await;
    outcome
}
