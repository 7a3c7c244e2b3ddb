use crate::probe::ProbeResult;
use anyhow::Result;
use futures::future::{self, BoxFuture, FutureExt};
use std::time::Duration;

/// List the producers append test lines to and the workers pop from.
pub const JOBS_QUEUE: &str = "lookout.jobs";

/// List the workers publish result records to and the bridges drain.
pub const RESULTS_QUEUE: &str = "lookout.results";

/// Key holding the failing-state timestamp for a fingerprint.
pub fn dedup_cache_key(fingerprint: &str) -> String {
    format!("lookout.dedup-cache.{fingerprint}")
}

/// Key holding the last-alert timestamp for a fingerprint.
pub fn last_alert_key(fingerprint: &str) -> String {
    format!("lookout.dedup-last-alert.{fingerprint}")
}

/// One element popped from the job queue: the list it came from and the raw
/// test line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub queue: String,
    pub payload: String,
}

/// Worker-side view of the job list.
///
/// `pop` waits at most `wait` for an element; the slot loop turns repeated
/// bounded waits into the logically-unbounded blocking pop, re-checking the
/// shutdown signal between slices so an in-flight pop is never abandoned
/// with a job in transit.
pub trait JobQueue: Send + Sync {
    fn ping(&self) -> BoxFuture<'_, Result<()>>;

    fn pop(&self, wait: Duration) -> BoxFuture<'_, Result<Option<Job>>>;

    /// Appends a popped-but-unstarted payload back to the tail of the job
    /// list so a shutdown never silently drops work.
    fn requeue<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// Worker-side view of the result list and the dedup key space.
///
/// Every operation is best effort: a store failure is logged by the caller
/// and never panics the worker.
pub trait ResultStore: Send + Sync {
    fn publish<'a>(&'a self, result: &'a ProbeResult) -> BoxFuture<'a, Result<()>>;

    fn dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>>;

    fn set_dedup_cache_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>>;

    fn clear_dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>>;

    fn last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>>;

    fn set_last_alert_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>>;

    fn clear_last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>>;
}

/// No-op store for dry runs: every operation succeeds without touching
/// anything, reads find nothing, and pops report an empty queue.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullStore;

impl JobQueue for NullStore {
    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn pop(&self, wait: Duration) -> BoxFuture<'_, Result<Option<Job>>> {
        async move {
            tokio::time::sleep(wait).await;
            Ok(None)
        }
        .boxed()
    }

    fn requeue<'a>(&'a self, _payload: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }
}

impl ResultStore for NullStore {
    fn publish<'a>(&'a self, _result: &'a ProbeResult) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn dedup_cache_time<'a>(&'a self, _fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        future::ready(Ok(None)).boxed()
    }

    fn set_dedup_cache_time<'a>(
        &'a self,
        _fingerprint: &'a str,
        _at: i64,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn clear_dedup_cache_time<'a>(&'a self, _fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn last_alert_time<'a>(&'a self, _fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        future::ready(Ok(None)).boxed()
    }

    fn set_last_alert_time<'a>(
        &'a self,
        _fingerprint: &'a str,
        _at: i64,
        _ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }

    fn clear_last_alert_time<'a>(&'a self, _fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        future::ready(Ok(())).boxed()
    }
}
