//! tcpexpose daemon library
//!
//! Correlates TCP lifecycle events captured by the eBPF probe into
//! per-connection traces and serves them to local clients.

pub mod actor;
pub mod config;
pub mod decoder;
pub mod events;
pub mod loader;
pub mod protocol;
pub mod server;
pub mod service;
pub mod stats;
pub mod store;
pub mod types;

pub use actor::{CorrelationActor, MailboxSender};
pub use config::ServiceConfig;
pub use events::EventProcessor;
pub use loader::ProbeLoader;
pub use server::ControlServer;
pub use service::{Service, ShutdownReport};
pub use stats::{ServiceStats, StatsSnapshot};
pub use store::TraceStore;
pub use types::*;
