//! Redis-backed implementation of the queue store contract.
//!
//! Non-blocking operations share one multiplexed connection. Blocking pops
//! run on dedicated connections drawn from a small checkout pool so a
//! `BLPOP` in flight never stalls result publication from other slots.

use crate::probe::ProbeResult;
use crate::queue::store::{
    dedup_cache_key, last_alert_key, Job, JobQueue, ResultStore, JOBS_QUEUE, RESULTS_QUEUE,
};
use anyhow::{Context, Result};
use futures::future::{BoxFuture, FutureExt};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::timeout;

const DEFAULT_REDIS_PORT: u16 = 6379;

/// Connection settings for the shared queue store.
#[derive(Debug, Clone)]
pub struct RedisSettings {
    /// `host` or `host:port`; ignored when `socket` is set.
    pub host: String,
    pub db: i64,
    pub password: Option<String>,
    /// Unix socket path, taking precedence over `host`.
    pub socket: Option<String>,
    pub connect_timeout: Duration,
}

pub struct RedisStore {
    client: Client,
    connection: MultiplexedConnection,
    poppers: Mutex<Vec<MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(settings: &RedisSettings) -> Result<Self> {
        let info = connection_info(settings)?;
        let client = Client::open(info).context("invalid redis connection settings")?;
        let connection = timeout(
            settings.connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .context("redis connection timed out")?
        .context("redis connection failed")?;

        Ok(Self {
            client,
            connection,
            poppers: Mutex::new(Vec::new()),
            connect_timeout: settings.connect_timeout,
        })
    }

    fn connection(&self) -> MultiplexedConnection {
        self.connection.clone()
    }

    async fn checkout_popper(&self) -> Result<MultiplexedConnection> {
        if let Some(connection) = self.poppers.lock().expect("popper pool lock").pop() {
            return Ok(connection);
        }
        timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .context("redis connection timed out")?
        .context("redis connection failed")
    }

    fn checkin_popper(&self, connection: MultiplexedConnection) {
        self.poppers
            .lock()
            .expect("popper pool lock")
            .push(connection);
    }

    async fn read_timestamp(&self, key: String) -> Result<Option<i64>> {
        let mut connection = self.connection();
        let value: Option<i64> = connection
            .get(&key)
            .await
            .with_context(|| format!("failed to read {key}"))?;
        Ok(value)
    }

    async fn write_timestamp(&self, key: String, at: i64, ttl: Duration) -> Result<()> {
        let mut connection = self.connection();
        let _: () = connection
            .set_ex(&key, at, ttl.as_secs().max(1))
            .await
            .with_context(|| format!("failed to set {key}"))?;
        Ok(())
    }

    async fn delete_key(&self, key: String) -> Result<()> {
        let mut connection = self.connection();
        let _: () = connection
            .del(&key)
            .await
            .with_context(|| format!("failed to delete {key}"))?;
        Ok(())
    }
}

impl JobQueue for RedisStore {
    fn ping(&self) -> BoxFuture<'_, Result<()>> {
        let mut connection = self.connection();
        async move {
            let pong: String = redis::cmd("PING")
                .query_async(&mut connection)
                .await
                .context("redis ping failed")?;
            anyhow::ensure!(pong == "PONG", "unexpected ping reply: {pong}");
            Ok(())
        }
        .boxed()
    }

    fn pop(&self, wait: Duration) -> BoxFuture<'_, Result<Option<Job>>> {
        async move {
            let mut connection = self.checkout_popper().await?;
            let popped: Option<(String, String)> = connection
                .blpop(JOBS_QUEUE, wait.as_secs_f64().max(0.1))
                .await
                .context("failed to pop from the job queue")?;
            self.checkin_popper(connection);
            Ok(popped.map(|(queue, payload)| Job { queue, payload }))
        }
        .boxed()
    }

    fn requeue<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<()>> {
        let mut connection = self.connection();
        async move {
            let _: () = connection
                .rpush(JOBS_QUEUE, payload)
                .await
                .context("failed to requeue job")?;
            Ok(())
        }
        .boxed()
    }
}

impl ResultStore for RedisStore {
    fn publish<'a>(&'a self, result: &'a ProbeResult) -> BoxFuture<'a, Result<()>> {
        let mut connection = self.connection();
        async move {
            let wire = result.to_wire()?;
            let _: () = connection
                .rpush(RESULTS_QUEUE, wire)
                .await
                .context("failed to publish result")?;
            Ok(())
        }
        .boxed()
    }

    fn dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        self.read_timestamp(dedup_cache_key(fingerprint)).boxed()
    }

    fn set_dedup_cache_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        self.write_timestamp(dedup_cache_key(fingerprint), at, ttl)
            .boxed()
    }

    fn clear_dedup_cache_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        self.delete_key(dedup_cache_key(fingerprint)).boxed()
    }

    fn last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        self.read_timestamp(last_alert_key(fingerprint)).boxed()
    }

    fn set_last_alert_time<'a>(
        &'a self,
        fingerprint: &'a str,
        at: i64,
        ttl: Duration,
    ) -> BoxFuture<'a, Result<()>> {
        self.write_timestamp(last_alert_key(fingerprint), at, ttl)
            .boxed()
    }

    fn clear_last_alert_time<'a>(&'a self, fingerprint: &'a str) -> BoxFuture<'a, Result<()>> {
        self.delete_key(last_alert_key(fingerprint)).boxed()
    }
}

fn connection_info(settings: &RedisSettings) -> Result<ConnectionInfo> {
    let addr = match &settings.socket {
        Some(path) => ConnectionAddr::Unix(path.into()),
        None => {
            let (host, port) = split_host_port(&settings.host);
            ConnectionAddr::Tcp(host, port)
        }
    };

    Ok(ConnectionInfo {
        addr,
        redis: RedisConnectionInfo {
            db: settings.db,
            username: None,
            password: settings.password.clone(),
            ..Default::default()
        },
    })
}

fn split_host_port(host: &str) -> (String, u16) {
    if let Some((name, port)) = host.rsplit_once(':') {
        if let Ok(port) = port.parse() {
            return (name.to_string(), port);
        }
    }
    (host.to_string(), DEFAULT_REDIS_PORT)
}
