use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{PortReleaser, ProcessLauncher};
use crate::error::{ErrorCode, GuardError, Result};
use crate::probe::PortProber;
use crate::registry::ServiceDescriptor;

#[derive(Debug, Default)]
struct HostState {
    /// port -> pid of the listener
    bound: HashMap<u16, u32>,
    unkillable: HashSet<u16>,
    unprobeable: HashSet<u16>,
    failing_launches: HashSet<String>,
    panicking_launches: HashSet<String>,
    launch_writes: HashMap<String, (PathBuf, String)>,
    launches: Vec<String>,
    released: Vec<u16>,
    next_pid: u32,
}

impl HostState {
    fn allocate_pid(&mut self) -> u32 {
        self.next_pid += 1;
        40_000 + self.next_pid
    }
}

/// An in-memory host: a port table shared by a prober, a launcher and a releaser.
///
/// Cloning yields another handle onto the same host.
#[derive(Debug, Clone, Default)]
pub struct SimulatedHost {
    state: Arc<Mutex<HostState>>,
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `port` with a foreign process.
    pub fn occupy(&self, port: u16) -> u32 {
        let mut state = self.state.lock();
        let pid = state.allocate_pid();
        state.bound.insert(port, pid);
        pid
    }

    pub fn vacate(&self, port: u16) {
        self.state.lock().bound.remove(&port);
    }

    pub fn is_bound(&self, port: u16) -> bool {
        self.state.lock().bound.contains_key(&port)
    }

    /// The listener on `port` survives release attempts.
    pub fn make_unkillable(&self, port: u16) {
        self.state.lock().unkillable.insert(port);
    }

    /// Probing `port` fails with PortProbeFailed.
    pub fn make_unprobeable(&self, port: u16) {
        self.state.lock().unprobeable.insert(port);
    }

    /// Launching `service` reports a spawn error.
    pub fn fail_launch(&self, service: &str) {
        self.state.lock().failing_launches.insert(service.to_string());
    }

    /// Launching `service` panics.
    pub fn panic_on_launch(&self, service: &str) {
        self.state.lock().panicking_launches.insert(service.to_string());
    }

    /// Launching `service` first overwrites `path`, like a service that
    /// rewrites its own configuration on startup.
    pub fn write_on_launch(&self, service: &str, path: impl Into<PathBuf>, contents: impl Into<String>) {
        self.state
            .lock()
            .launch_writes
            .insert(service.to_string(), (path.into(), contents.into()));
    }

    /// Names of the services launched so far, in order.
    pub fn launches(&self) -> Vec<String> {
        self.state.lock().launches.clone()
    }

    /// Ports released so far, in order.
    pub fn released(&self) -> Vec<u16> {
        self.state.lock().released.clone()
    }
}

#[async_trait]
impl PortProber for SimulatedHost {
    async fn is_port_bound(&self, port: u16) -> Result<bool> {
        let state = self.state.lock();
        if state.unprobeable.contains(&port) {
            return Err(GuardError::port_probe_failed(port, "simulated probe failure"));
        }
        Ok(state.bound.contains_key(&port))
    }
}

#[async_trait]
impl ProcessLauncher for SimulatedHost {
    async fn launch(&self, service: &ServiceDescriptor) -> Result<Option<u32>> {
        let (write, should_panic) = {
            let state = self.state.lock();
            (
                state.launch_writes.get(&service.name).cloned(),
                state.panicking_launches.contains(&service.name),
            )
        };
        if let Some((path, contents)) = write {
            tokio::fs::write(&path, contents).await?;
        }
        if should_panic {
            panic!("simulated crash while launching {}", service.name);
        }

        let mut state = self.state.lock();
        if service.launch_command.is_empty() {
            return Err(GuardError::new(
                ErrorCode::LaunchCommandInvalid,
                format!("Service '{}' has an empty launch command", service.name),
            ));
        }
        if state.failing_launches.contains(&service.name) {
            return Err(GuardError::launch_failed(&service.name, "simulated spawn failure"));
        }

        let pid = state.allocate_pid();
        state.launches.push(service.name.clone());
        // A service that finds its port taken exits without binding.
        state.bound.entry(service.port).or_insert(pid);
        Ok(Some(pid))
    }
}

#[async_trait]
impl PortReleaser for SimulatedHost {
    async fn release(&self, port: u16) -> Result<Vec<u32>> {
        let mut state = self.state.lock();
        state.released.push(port);
        if state.unkillable.contains(&port) {
            return Ok(state.bound.get(&port).copied().into_iter().collect());
        }
        Ok(state.bound.remove(&port).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_launch_binds_port() {
        let host = SimulatedHost::new();
        let svc = ServiceDescriptor::new("api", 3000, vec!["node".into()]);

        assert!(!host.is_port_bound(3000).await.unwrap());
        host.launch(&svc).await.unwrap();
        assert!(host.is_port_bound(3000).await.unwrap());
        assert_eq!(host.launches(), vec!["api".to_string()]);
    }

    #[tokio::test]
    async fn test_release_respects_unkillable() {
        let host = SimulatedHost::new();
        host.occupy(3001);
        host.occupy(3002);
        host.make_unkillable(3002);

        assert_eq!(host.release(3001).await.unwrap().len(), 1);
        assert!(!host.is_bound(3001));

        host.release(3002).await.unwrap();
        assert!(host.is_bound(3002));
        assert_eq!(host.released(), vec![3001, 3002]);
    }

    #[tokio::test]
    async fn test_failing_launch() {
        let host = SimulatedHost::new();
        host.fail_launch("web");
        let svc = ServiceDescriptor::new("web", 5000, vec!["node".into()]);

        let err = host.launch(&svc).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessLaunchFailed);
        assert!(!host.is_bound(5000));
    }

    #[tokio::test]
    async fn test_unprobeable_port() {
        let host = SimulatedHost::new();
        host.make_unprobeable(4000);
        let err = host.is_port_bound(4000).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::PortProbeFailed);
    }
}
