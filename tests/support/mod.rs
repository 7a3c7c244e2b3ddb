//! Shared fixtures for the integration suites: scripted handlers, static
//! resolvers, and an executor wired to an in-memory store.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use futures::future::{BoxFuture, FutureExt};
use lookout::executor::{Executor, ExecutorParams, ExecutorSettings, Resolve};
use lookout::probe::{ProbeOptions, ProtocolHandler, ProtocolRegistry, TestSpec};
use lookout::queue::MemoryStore;
use lookout::runtime::Telemetry;
use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Probe with scripted outcomes, consumed one per invocation. Once the
/// script runs dry every further invocation yields `exhausted`.
pub struct ScriptedHandler {
    outcomes: Mutex<VecDeque<Option<String>>>,
    exhausted: Option<String>,
    delay: Duration,
    resolve_hostname: bool,
    invocations: AtomicU32,
}

impl ScriptedHandler {
    pub fn passing(resolve_hostname: bool) -> Self {
        Self::scripted(resolve_hostname, Vec::new())
    }

    pub fn failing(resolve_hostname: bool, message: &str) -> Self {
        let mut handler = Self::scripted(resolve_hostname, Vec::new());
        handler.exhausted = Some(message.to_string());
        handler
    }

    /// `None` entries pass, `Some(message)` entries fail with that message.
    pub fn scripted(resolve_hostname: bool, outcomes: Vec<Option<String>>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            exhausted: None,
            delay: Duration::ZERO,
            resolve_hostname,
            invocations: AtomicU32::new(0),
        }
    }

    /// Adds a pause inside every invocation, for shutdown-timing tests.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

impl ProtocolHandler for ScriptedHandler {
    fn arguments(&self) -> HashMap<&'static str, &'static str> {
        HashMap::from([("note", ".*")])
    }

    fn should_resolve_hostname(&self) -> bool {
        self.resolve_hostname
    }

    fn example(&self) -> &'static str {
        "target must run scripted"
    }

    fn run_test<'a>(
        &'a self,
        _spec: &'a TestSpec,
        _target: &'a str,
        _options: &'a ProbeOptions,
    ) -> BoxFuture<'a, Result<()>> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let outcome = {
            let mut script = self.outcomes.lock().expect("script lock");
            match script.pop_front() {
                Some(outcome) => outcome,
                None => self.exhausted.clone(),
            }
        };
        let delay = self.delay;
        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match outcome {
                Some(message) => Err(anyhow!(message)),
                None => Ok(()),
            }
        }
        .boxed()
    }
}

/// Probe that always panics, for the panic-isolation tests.
pub struct PanickingHandler;

impl ProtocolHandler for PanickingHandler {
    fn arguments(&self) -> HashMap<&'static str, &'static str> {
        HashMap::new()
    }

    fn should_resolve_hostname(&self) -> bool {
        false
    }

    fn example(&self) -> &'static str {
        "target must run panicking"
    }

    fn run_test<'a>(
        &'a self,
        _spec: &'a TestSpec,
        _target: &'a str,
        _options: &'a ProbeOptions,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { panic!("wires crossed") })
    }
}

/// Resolver returning a fixed address set, or a scripted failure.
pub struct StaticResolver {
    ips: Vec<IpAddr>,
    fail: bool,
}

impl Resolve for StaticResolver {
    fn lookup<'a>(&'a self, host: &'a str) -> BoxFuture<'a, Result<Vec<IpAddr>>> {
        let outcome = if self.fail {
            Err(anyhow!("no address records for {host}"))
        } else {
            Ok(self.ips.clone())
        };
        futures::future::ready(outcome).boxed()
    }
}

pub fn static_resolver(ips: &[&str]) -> Arc<StaticResolver> {
    Arc::new(StaticResolver {
        ips: ips
            .iter()
            .map(|ip| ip.parse().expect("fixture address parses"))
            .collect(),
        fail: false,
    })
}

pub fn failing_resolver() -> Arc<StaticResolver> {
    Arc::new(StaticResolver {
        ips: Vec::new(),
        fail: true,
    })
}

pub fn registry_with(handlers: Vec<(&str, Arc<dyn ProtocolHandler>)>) -> Arc<ProtocolRegistry> {
    let mut registry = ProtocolRegistry::new();
    for (name, handler) in handlers {
        registry.register(name, move || handler.clone());
    }
    Arc::new(registry)
}

/// Worker defaults tuned for tests: no retry pauses, short period sleeps,
/// and a recognizable tag.
pub fn quick_settings() -> ExecutorSettings {
    ExecutorSettings {
        retry_delay: Duration::ZERO,
        period_sleep: Duration::from_millis(50),
        tag: "test-tag".to_string(),
        ..ExecutorSettings::default()
    }
}

pub fn executor_for(
    registry: Arc<ProtocolRegistry>,
    store: Arc<MemoryStore>,
    resolver: Arc<dyn Resolve>,
    settings: ExecutorSettings,
) -> Arc<Executor> {
    Arc::new(Executor::new(ExecutorParams {
        registry,
        results: store,
        resolver,
        carbon: None,
        telemetry: Arc::new(Telemetry::default()),
        settings,
    }))
}

/// Executor plus the store it publishes to, with one scripted handler
/// registered as `scripted`.
pub struct Rig {
    pub store: Arc<MemoryStore>,
    pub handler: Arc<ScriptedHandler>,
    pub executor: Arc<Executor>,
    pub registry: Arc<ProtocolRegistry>,
}

pub fn rig(
    handler: ScriptedHandler,
    resolver: Arc<dyn Resolve>,
    settings: ExecutorSettings,
) -> Rig {
    let handler = Arc::new(handler);
    let registered: Arc<dyn ProtocolHandler> = handler.clone();
    let registry = registry_with(vec![("scripted", registered)]);
    let store = Arc::new(MemoryStore::new());
    let executor = executor_for(registry.clone(), store.clone(), resolver, settings);
    Rig {
        store,
        handler,
        executor,
        registry,
    }
}

/// A spec for the scripted handler with hostname resolution in play.
pub fn resolving_spec(input: &str, target: &str) -> TestSpec {
    TestSpec::new(input, "scripted", target, HashMap::new())
}
