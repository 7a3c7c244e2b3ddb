//! Distributed remote-protocol prober.
//!
//! Stateless workers pull test lines from a shared Redis queue, probe each
//! resolved target across the enabled address families, and publish one
//! JSON result record per probed target to a result queue, with bounded
//! retries, period-test aggregation, and at-most-one deduplicated alert per
//! fingerprint.

pub mod executor;
pub mod probe;
pub mod queue;
pub mod runtime;
pub mod worker;

pub use executor::{AlertDecision, DedupOutcome, Executor, ExecutorParams, ExecutorSettings};
pub use executor::{Resolve, SystemResolver};
pub use probe::{
    fingerprint, Parser, ProbeOptions, ProbeResult, ProtocolHandler, ProtocolRegistry, TestSpec,
};
pub use queue::{Job, JobQueue, MemoryStore, NullStore, RedisSettings, RedisStore, ResultStore};
pub use runtime::{
    init_tracing, CarbonSink, FileConfig, Runner, Telemetry, TelemetrySnapshot, WorkerConfig,
    WorkerConfigBuilder,
};
pub use worker::{WorkerPool, WorkerPoolParams};
