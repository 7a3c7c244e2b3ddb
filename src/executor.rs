//! Test execution: dedup decisions, target derivation, metric collection,
//! and the per-test engine.

pub mod dedup;
pub mod metrics;
pub mod resolve;
pub mod run;

pub use dedup::{decide, state_ttl, AlertDecision, DedupOutcome};
pub use metrics::MetricsBatch;
pub use resolve::{filter_families, probe_host, Resolve, SystemResolver};
pub use run::{Executor, ExecutorParams, ExecutorSettings};
