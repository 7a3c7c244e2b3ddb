use crate::probe::handler::ProtocolHandler;
use crate::probe::tcp::TcpProbe;
use std::collections::HashMap;
use std::sync::Arc;

type HandlerFactory = Box<dyn Fn() -> Arc<dyn ProtocolHandler> + Send + Sync>;

/// Process-wide mapping from protocol name to handler factory.
///
/// Populated during startup before the worker pool begins and read-only
/// thereafter; consumers hold it behind an `Arc`.
#[derive(Default)]
pub struct ProtocolRegistry {
    handlers: HashMap<String, HandlerFactory>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the probes shipped in this crate.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("tcp", || Arc::new(TcpProbe));
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn ProtocolHandler> + Send + Sync + 'static,
    {
        self.handlers.insert(name.into(), Box::new(factory));
    }

    /// Returns a fresh handler for the named protocol, if registered.
    pub fn create(&self, name: &str) -> Option<Arc<dyn ProtocolHandler>> {
        self.handlers.get(name).map(|factory| factory())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered protocol names, sorted for stable presentation.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
