//! TCP connect probe.
//!
//! Considers the target healthy when it accepts a TCP connection on the
//! given port within the probe timeout:
//!
//! ```text
//! mail.example.com must run tcp with port 25
//! ```

use crate::probe::handler::ProtocolHandler;
use crate::probe::spec::{ProbeOptions, TestSpec};
use anyhow::{anyhow, Context, Result};
use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::time::timeout;

pub struct TcpProbe;

impl TcpProbe {
    async fn connect(&self, spec: &TestSpec, target: &str, options: &ProbeOptions) -> Result<()> {
        let port: u16 = spec
            .arguments
            .get("port")
            .ok_or_else(|| anyhow!("tcp probe requires a port argument"))?
            .parse()
            .context("invalid port argument")?;

        // IPv6 literals need brackets in the authority form.
        let address = if target.contains(':') {
            format!("[{target}]:{port}")
        } else {
            format!("{target}:{port}")
        };

        match timeout(options.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(err)) => Err(anyhow!("connection to {address} failed: {err}")),
            Err(_) => Err(anyhow!(
                "connection to {address} timed out after {:?}",
                options.timeout
            )),
        }
    }
}

impl ProtocolHandler for TcpProbe {
    fn arguments(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([("port", r"^\d+$")])
    }

    fn should_resolve_hostname(&self) -> bool {
        true
    }

    fn example(&self) -> &'static str {
        "\
TCP Tester
----------
 The TCP tester confirms that the remote host accepts connections on the
 given port:

   mail.example.com must run tcp with port 25
"
    }

    fn run_test<'a>(
        &'a self,
        spec: &'a TestSpec,
        target: &'a str,
        options: &'a ProbeOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.connect(spec, target, options))
    }
}
