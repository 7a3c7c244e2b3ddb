//! Worker runtime: configuration, telemetry, metric publication, and the
//! signal-driven lifecycle.

pub mod carbon;
pub mod config;
pub mod runner;
pub mod telemetry;

pub use carbon::CarbonSink;
pub use config::{FileConfig, WorkerConfig, WorkerConfigBuilder, CONFIG_ENV};
pub use runner::Runner;
pub use telemetry::{init_tracing, Telemetry, TelemetrySnapshot};
