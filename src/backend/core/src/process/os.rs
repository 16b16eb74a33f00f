use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{PortReleaser, ProcessLauncher};
use crate::error::{ErrorCode, GuardError, Result};
use crate::registry::ServiceDescriptor;

/// Launches services with `setsid` so they survive the server.
#[derive(Debug, Clone, Default)]
pub struct OsProcessLauncher;

impl OsProcessLauncher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessLauncher for OsProcessLauncher {
    async fn launch(&self, service: &ServiceDescriptor) -> Result<Option<u32>> {
        let (program, args) = service.launch_command.split_first().ok_or_else(|| {
            GuardError::new(
                ErrorCode::LaunchCommandInvalid,
                format!("Service '{}' has an empty launch command", service.name),
            )
        })?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&service.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(ref dir) = service.working_dir {
            cmd.current_dir(dir);
        }

        // Own session so the service outlives us and can be signalled as a group.
        #[cfg(unix)]
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd
            .spawn()
            .map_err(|e| GuardError::launch_failed(&service.name, e.to_string()).with_source(e))?;
        let pid = child.id();
        info!(service = %service.name, port = service.port, pid = ?pid, "launched service");

        // Dropping the handle detaches; tokio reaps the child in the background.
        drop(child);
        Ok(pid)
    }
}

/// Finds listeners with `lsof` and terminates them, escalating to SIGKILL.
#[derive(Debug, Clone)]
pub struct OsPortReleaser {
    term_timeout: Duration,
}

impl OsPortReleaser {
    pub fn new(term_timeout: Duration) -> Self {
        Self { term_timeout }
    }

    async fn listeners(&self, port: u16) -> Result<Vec<u32>> {
        let output = Command::new("lsof")
            .arg("-t")
            .arg(format!("-iTCP:{}", port))
            .arg("-sTCP:LISTEN")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| GuardError::port_release_failed(port, format!("lsof: {}", e)))?;

        // lsof exits 1 with no output when nothing matches
        let own_pid = std::process::id();
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .filter(|pid| *pid != own_pid)
            .collect())
    }
}

impl Default for OsPortReleaser {
    fn default() -> Self {
        Self::new(Duration::from_secs(3))
    }
}

#[cfg(unix)]
fn signal(pid: u32, sig: libc::c_int) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, sig) == 0 }
}

#[cfg(unix)]
fn is_alive(pid: u32) -> bool {
    signal(pid, 0)
}

#[async_trait]
impl PortReleaser for OsPortReleaser {
    #[cfg(unix)]
    async fn release(&self, port: u16) -> Result<Vec<u32>> {
        let pids = self.listeners(port).await?;
        if pids.is_empty() {
            debug!(port, "no listener found");
            return Ok(pids);
        }

        for &pid in &pids {
            if !signal(pid, libc::SIGTERM) {
                let err = std::io::Error::last_os_error();
                if is_alive(pid) {
                    return Err(GuardError::port_release_failed(
                        port,
                        format!("SIGTERM to pid {}: {}", pid, err),
                    ));
                }
            }
        }

        let deadline = Instant::now() + self.term_timeout;
        while Instant::now() < deadline && pids.iter().any(|&pid| is_alive(pid)) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for &pid in pids.iter().filter(|&&pid| is_alive(pid)) {
            warn!(port, pid, "listener ignored SIGTERM; sending SIGKILL");
            signal(pid, libc::SIGKILL);
        }

        info!(port, pids = ?pids, "released port");
        Ok(pids)
    }

    #[cfg(not(unix))]
    async fn release(&self, port: u16) -> Result<Vec<u32>> {
        Err(GuardError::port_release_failed(
            port,
            "port release is only supported on unix",
        ))
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_launch_command_rejected() {
        let service = ServiceDescriptor::new("broken", 4999, vec![]);
        let err = OsProcessLauncher::new().launch(&service).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::LaunchCommandInvalid);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let service = ServiceDescriptor::new(
            "ghost",
            4998,
            vec!["/nonexistent/portguard-test-binary".into()],
        );
        let err = OsProcessLauncher::new().launch(&service).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProcessLaunchFailed);
        assert!(err.is_remediation_failure());
    }

    #[tokio::test]
    async fn test_launch_returns_pid() {
        let service = ServiceDescriptor::new("sleeper", 4997, vec!["sleep".into(), "0".into()]);
        let pid = OsProcessLauncher::new().launch(&service).await.unwrap();
        assert!(pid.is_some());
    }
}
