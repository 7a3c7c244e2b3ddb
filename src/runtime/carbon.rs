//! Fire-and-forget metric publication to a carbon collector.
//!
//! Configured from the environment: `METRICS_HOST` (or `METRICS`) names the
//! collector as `host` or `host:port`, `METRICS_PROTOCOL` picks `udp` or
//! `tcp`. Metrics use the plaintext protocol, one `<key> <value> <time>`
//! line per sample. Send failures are logged and never reach the result
//! pipeline.

use crate::executor::metrics::MetricsBatch;
use crate::probe::unix_now;
use anyhow::{bail, Context, Result};
use std::fmt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};

const DEFAULT_CARBON_PORT: u16 = 2003;

pub const METRICS_HOST_ENV: &str = "METRICS_HOST";
pub const METRICS_ENV: &str = "METRICS";
pub const METRICS_PROTOCOL_ENV: &str = "METRICS_PROTOCOL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "udp"),
            Transport::Tcp => write!(f, "tcp"),
        }
    }
}

/// Handle to a carbon collector.
#[derive(Debug, Clone)]
pub struct CarbonSink {
    host: String,
    port: u16,
    transport: Transport,
}

impl CarbonSink {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: Transport::Udp,
        }
    }

    /// Builds a sink from the environment, or `None` when no collector is
    /// configured. A malformed configuration is logged and treated as
    /// unconfigured; missing metrics should never stop the worker.
    pub fn from_environment() -> Option<Self> {
        let host = std::env::var(METRICS_HOST_ENV)
            .or_else(|_| std::env::var(METRICS_ENV))
            .ok()
            .filter(|value| !value.trim().is_empty())?;

        match Self::from_settings(&host, std::env::var(METRICS_PROTOCOL_ENV).ok().as_deref()) {
            Ok(sink) => Some(sink),
            Err(err) => {
                tracing::warn!(error = %err, "ignoring metrics configuration");
                None
            }
        }
    }

    fn from_settings(host: &str, protocol: Option<&str>) -> Result<Self> {
        let (name, port) = match host.rsplit_once(':') {
            Some((name, port)) => (
                name.to_string(),
                port.parse()
                    .with_context(|| format!("invalid metrics port '{port}'"))?,
            ),
            None => (host.to_string(), DEFAULT_CARBON_PORT),
        };

        let transport = match protocol.unwrap_or("udp") {
            "udp" => Transport::Udp,
            "tcp" => Transport::Tcp,
            other => bail!("unsupported metrics protocol '{other}'"),
        };

        Ok(Self {
            host: name,
            port,
            transport,
        })
    }

    /// Ships one batch on a background task; the caller never waits.
    pub fn submit(&self, batch: MetricsBatch) {
        if batch.is_empty() {
            return;
        }
        let sink = self.clone();
        tokio::spawn(async move {
            if let Err(err) = sink.send(&batch).await {
                tracing::debug!(
                    collector = %format!("{}:{}", sink.host, sink.port),
                    transport = %sink.transport,
                    error = %err,
                    "failed to ship metrics batch"
                );
            }
        });
    }

    async fn send(&self, batch: &MetricsBatch) -> Result<()> {
        let payload = render(batch);
        let address = format!("{}:{}", self.host, self.port);

        match self.transport {
            Transport::Udp => {
                let socket = UdpSocket::bind("0.0.0.0:0")
                    .await
                    .context("failed to bind metrics socket")?;
                socket
                    .send_to(payload.as_bytes(), &address)
                    .await
                    .with_context(|| format!("failed to send metrics to {address}"))?;
            }
            Transport::Tcp => {
                let mut stream = TcpStream::connect(&address)
                    .await
                    .with_context(|| format!("failed to connect to {address}"))?;
                stream
                    .write_all(payload.as_bytes())
                    .await
                    .with_context(|| format!("failed to send metrics to {address}"))?;
            }
        }
        Ok(())
    }
}

fn render(batch: &MetricsBatch) -> String {
    let now = unix_now();
    let mut payload = String::new();
    for (key, value) in batch.entries() {
        payload.push_str(key);
        payload.push(' ');
        payload.push_str(value);
        payload.push(' ');
        payload.push_str(&now.to_string());
        payload.push('\n');
    }
    payload
}
