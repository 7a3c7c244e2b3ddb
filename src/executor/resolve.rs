//! Target derivation: URL host extraction, name resolution, and address
//! family filtering.

use anyhow::{anyhow, Context, Result};
use futures::future::{BoxFuture, FutureExt};
use std::net::IpAddr;
use url::{Host, Url};

/// Name-resolution seam so tests can script address sets.
pub trait Resolve: Send + Sync {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>>>;
}

/// Resolver backed by the operating system.
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>>> {
        async move {
            let addrs = tokio::net::lookup_host((host, 0))
                .await
                .with_context(|| format!("lookup of {host} failed"))?;
            let mut ips: Vec<IpAddr> = addrs.map(|addr| addr.ip()).collect();
            ips.dedup();
            Ok(ips)
        }
        .boxed()
    }
}

/// Extracts the host to resolve from a test target. Targets containing a
/// scheme are parsed as URLs; everything else passes through as-is.
pub fn probe_host(target: &str) -> Result<String> {
    if !target.contains("://") {
        return Ok(target.to_string());
    }

    let url = Url::parse(target).with_context(|| format!("invalid target URL {target}"))?;
    match url.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(addr)) => Ok(addr.to_string()),
        Some(Host::Ipv6(addr)) => Ok(addr.to_string()),
        None => Err(anyhow!("target URL {target} has no host")),
    }
}

/// Filters resolved addresses by the enabled families and renders them as
/// probe targets. IPv4-mapped IPv6 addresses count as IPv4 and are rendered
/// in dotted form.
pub fn filter_families(ips: Vec<IpAddr>, ipv4: bool, ipv6: bool) -> Vec<String> {
    let mut targets = Vec::with_capacity(ips.len());
    for ip in ips {
        match ip {
            IpAddr::V4(addr) => {
                if ipv4 {
                    targets.push(addr.to_string());
                }
            }
            IpAddr::V6(addr) => match addr.to_ipv4_mapped() {
                Some(mapped) => {
                    if ipv4 {
                        targets.push(mapped.to_string());
                    }
                }
                None => {
                    if ipv6 {
                        targets.push(addr.to_string());
                    }
                }
            },
        }
    }
    targets
}
