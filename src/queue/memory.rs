//! In-process store used by the test suites and for local experiments.

use crate::probe::ProbeResult;
use crate::queue::store::{Job, JobQueue, ResultStore, JOBS_QUEUE};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::timeout;

#[derive(Default)]
struct MemoryInner {
    jobs: VecDeque<String>,
    results: Vec<ProbeResult>,
    keys: HashMap<String, TimestampEntry>,
}

struct TimestampEntry {
    value: i64,
    expires_at: Instant,
}

/// FIFO job list, result list, and TTL'd timestamp keys backed by process
/// memory. Satisfies the same contract as the shared store, minus the
/// sharing.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    job_added: Notify,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one raw test line to the job list.
    pub fn push_job(&self, payload: impl Into<String>) {
        self.inner
            .lock()
            .expect("memory store lock")
            .jobs
            .push_back(payload.into());
        self.job_added.notify_waiters();
    }

    pub fn job_count(&self) -> usize {
        self.inner.lock().expect("memory store lock").jobs.len()
    }

    pub fn jobs(&self) -> Vec<String> {
        self.inner
            .lock()
            .expect("memory store lock")
            .jobs
            .iter()
            .cloned()
            .collect()
    }

    /// Every result published so far, in publish order.
    pub fn published(&self) -> Vec<ProbeResult> {
        self.inner
            .lock()
            .expect("memory store lock")
            .results
            .clone()
    }

    /// Reads a raw timestamp key, honouring its TTL.
    pub fn timestamp(&self, key: &str) -> Option<i64> {
        let mut inner = self.inner.lock().expect("memory store lock");
        let now = Instant::now();
        let expired = match inner.keys.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.value),
            Some(_) => true,
            None => false,
        };
        if expired {
            inner.keys.remove(key);
        }
        None
    }

    /// Writes a raw timestamp key with a TTL, bypassing the trait surface.
    pub fn set_timestamp(&self, key: impl Into<String>, value: i64, ttl: Duration) {
        self.inner.lock().expect("memory store lock").keys.insert(
            key.into(),
            TimestampEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn remove_key(&self, key: &str) {
        self.inner
            .lock()
            .expect("memory store lock")
            .keys
            .remove(key);
    }

    fn take_job(&self) -> Option<Job> {
        self.inner
            .lock()
            .expect("memory store lock")
            .jobs
            .pop_front()
            .map(|payload| Job {
                queue: JOBS_QUEUE.to_string(),
                payload,
            })
    }
}

impl JobQueue for MemoryStore {
    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        futures::future::ready(Ok(())).boxed()
    }

    fn pop(&self, wait: Duration) -> BoxFuture<'_, Result<Option<Job>>> {
        async move {
            let deadline = Instant::now() + wait;
            loop {
                if let Some(job) = self.take_job() {
                    return Ok(Some(job));
                }
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                if timeout(remaining, self.job_added.notified()).await.is_err() {
                    return Ok(self.take_job());
                }
            }
        }
        .boxed()
    }

    fn requeue<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            self.push_job(payload);
            Ok(())
        }
        .boxed()
    }
}

impl ResultStore for MemoryStore {
    fn publish<'a>(&'a self, result: &'a ProbeResult) -> BoxFuture<'a, Result<()>> {
        async move {
            self.inner
                .lock()
                .expect("memory store lock")
                .results
                .push(result.clone());
            Ok(())
        }
        .boxed()
    }

    fn dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        let key = super::store::dedup_cache_key(fingerprint);
        async move { Ok(self.timestamp(&key)) }.boxed()
    }

    fn set_dedup_cache_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        let key = super::store::dedup_cache_key(fingerprint);
        async move {
            self.set_timestamp(key, at, ttl);
            Ok(())
        }
        .boxed()
    }

    fn clear_dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        let key = super::store::dedup_cache_key(fingerprint);
        async move {
            self.remove_key(&key);
            Ok(())
        }
        .boxed()
    }

    fn last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        let key = super::store::last_alert_key(fingerprint);
        async move { Ok(self.timestamp(&key)) }.boxed()
    }

    fn set_last_alert_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        let key = super::store::last_alert_key(fingerprint);
        async move {
            self.set_timestamp(key, at, ttl);
            Ok(())
        }
        .boxed()
    }

    fn clear_last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        let key = super::store::last_alert_key(fingerprint);
        async move {
            self.remove_key(&key);
            Ok(())
        }
        .boxed()
    }
}
