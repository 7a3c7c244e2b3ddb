//! Probe data model, protocol-handler contract, registry, and DSL parser.

pub mod handler;
pub mod parser;
pub mod registry;
pub mod result;
pub mod spec;
pub mod tcp;

pub use handler::ProtocolHandler;
pub use parser::{parse_percentage, Parser};
pub use registry::ProtocolRegistry;
pub use result::{unix_now, ProbeResult};
pub use spec::{fingerprint, ProbeOptions, TestSpec, SENSITIVE_ARGUMENTS};
pub use tcp::TcpProbe;
