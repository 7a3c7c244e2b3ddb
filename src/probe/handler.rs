use crate::probe::spec::{ProbeOptions, TestSpec};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;

/// Contract implemented by every protocol probe.
///
/// Handlers are registered through the [`ProtocolRegistry`] and invoked by
/// the executor, possibly concurrently for distinct targets of the same
/// test. Implementations must keep per-invocation state on the stack, must
/// never mutate the spec, and must honour `options.timeout` as an upper
/// bound on wall-clock execution.
///
/// [`ProtocolRegistry`]: crate::probe::registry::ProtocolRegistry
pub trait ProtocolHandler: Send + Sync {
    /// Argument names this probe understands, mapped to regular expressions
    /// that validate their values. The parser rejects lines carrying
    /// arguments outside this schema.
    fn arguments(&self) -> HashMap<&'static str, &'static str>;

    /// Whether the executor should resolve the test target to concrete IP
    /// addresses before invoking the probe. When false the raw target
    /// string is passed through unchanged.
    fn should_resolve_hostname(&self) -> bool;

    /// Self-documenting usage text.
    fn example(&self) -> &'static str;

    /// Runs one probe against one concrete target. A returned error is the
    /// human-readable failure that ends up in the result record.
    fn run_test<'a>(
        &'a self,
        spec: &'a TestSpec,
        target: &'a str,
        options: &'a ProbeOptions,
    ) -> BoxFuture<'a, Result<()>>;
}
