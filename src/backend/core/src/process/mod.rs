//! Starting services and freeing ports.
//!
//! Both concerns are traits so the orchestrator can run against the real OS
//! ([`OsProcessLauncher`], [`OsPortReleaser`]) or against an in-memory
//! [`SimulatedHost`].

mod os;
mod simulated;

pub use os::{OsPortReleaser, OsProcessLauncher};
pub use simulated::SimulatedHost;

use async_trait::async_trait;

use crate::error::Result;
use crate::registry::ServiceDescriptor;

/// Spawns a service process that outlives the caller.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Start `service` detached from the current session; returns its pid when known.
    async fn launch(&self, service: &ServiceDescriptor) -> Result<Option<u32>>;
}

/// Terminates whatever is listening on a port.
#[async_trait]
pub trait PortReleaser: Send + Sync {
    /// Signal every listener on `port`; returns the pids that were signalled.
    async fn release(&self, port: u16) -> Result<Vec<u32>>;
}
