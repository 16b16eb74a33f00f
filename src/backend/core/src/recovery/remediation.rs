//! Remediation actions, one per diagnostic kind.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::session::RecoveryStep;
use crate::db::DatabaseConnector;
use crate::diagnostics::{DiagnosticContext, DiagnosticError, RemediationAction};
use crate::error::{GuardError, Result};
use crate::probe::PortProber;
use crate::process::{PortReleaser, ProcessLauncher};
use crate::registry::{ServiceDescriptor, ServiceRegistry};

/// Progress callback; values are percentages.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

#[derive(Debug, Clone)]
pub struct RemediationSettings {
    pub grace_period: Duration,
    pub port_release_wait: Duration,
    pub resync_tick: Duration,
}

/// Executes the action table against a host and a database.
pub struct Remediator {
    prober: Arc<dyn PortProber>,
    launcher: Arc<dyn ProcessLauncher>,
    releaser: Arc<dyn PortReleaser>,
    db: Arc<dyn DatabaseConnector>,
    registry: Arc<ServiceRegistry>,
    settings: RemediationSettings,
}

impl Remediator {
    pub fn new(
        prober: Arc<dyn PortProber>,
        launcher: Arc<dyn ProcessLauncher>,
        releaser: Arc<dyn PortReleaser>,
        db: Arc<dyn DatabaseConnector>,
        registry: Arc<ServiceRegistry>,
        settings: RemediationSettings,
    ) -> Self {
        Self {
            prober,
            launcher,
            releaser,
            db,
            registry,
            settings,
        }
    }

    /// Build the pending step that will remediate `error`.
    pub fn plan(index: usize, error: &DiagnosticError) -> RecoveryStep {
        let (title, description) = match &error.context {
            DiagnosticContext::Port { port, .. } => (
                format!("Release port {}", port),
                format!("Terminate the process bound to port {} and confirm it is free", port),
            ),
            DiagnosticContext::Service { service } => (
                format!("Restart {}", service.name),
                format!(
                    "Launch `{}` and wait for port {}",
                    service.launch_command.join(" "),
                    service.port
                ),
            ),
            DiagnosticContext::Database { .. } => (
                "Reapply database schema".to_string(),
                "Run schema migrations, then re-check connectivity".to_string(),
            ),
            DiagnosticContext::Dependency {
                dependency,
                failover_service,
            } => (
                format!("Resync {}", dependency),
                match failover_service {
                    Some(failover) => format!("Activate failover '{}' and resynchronise", failover),
                    None => "Resynchronise dependency state".to_string(),
                },
            ),
        };
        RecoveryStep::new(index, &error.id, title, description)
    }

    /// Run the action for `error`. `Ok` carries a one-line outcome.
    pub async fn execute(&self, error: &DiagnosticError, progress: ProgressFn<'_>) -> Result<String> {
        debug!(error_id = %error.id, action = %error.remediation_action, "executing remediation");
        match (&error.remediation_action, &error.context) {
            (RemediationAction::ReleasePort, DiagnosticContext::Port { port, .. }) => {
                self.release_port(*port, progress).await
            }
            (RemediationAction::RestartService, DiagnosticContext::Service { service }) => {
                // Prefer the registry entry; the diagnostic may predate a reload.
                let service = self.registry.find(&service.name).unwrap_or(service);
                self.restart_service(service, progress).await
            }
            (RemediationAction::ReapplySchema, DiagnosticContext::Database { .. }) => {
                self.reapply_schema(progress).await
            }
            (
                RemediationAction::ResyncDependency,
                DiagnosticContext::Dependency {
                    dependency,
                    failover_service,
                },
            ) => {
                self.resync_dependency(dependency, failover_service.as_deref(), progress)
                    .await
            }
            (action, _) => Err(GuardError::internal(format!(
                "diagnostic {} carries a context that does not match action {}",
                error.id, action
            ))),
        }
    }

    async fn release_port(&self, port: u16, progress: ProgressFn<'_>) -> Result<String> {
        progress(10);
        let pids = self.releaser.release(port).await?;
        progress(50);

        tokio::time::sleep(self.settings.port_release_wait).await;
        progress(80);

        if self.prober.is_port_bound(port).await? {
            return Err(GuardError::remediation_failed(
                "ReleasePort",
                format!("port {} is still bound after release", port),
            ));
        }
        info!(port, pids = ?pids, "port released");
        Ok(format!("Port {} released", port))
    }

    async fn restart_service(
        &self,
        service: &ServiceDescriptor,
        progress: ProgressFn<'_>,
    ) -> Result<String> {
        progress(10);
        let pid = self.launcher.launch(service).await?;
        progress(40);

        tokio::time::sleep(self.settings.grace_period).await;
        progress(80);

        if !self.prober.is_port_bound(service.port).await? {
            return Err(GuardError::remediation_failed(
                "RestartService",
                format!(
                    "service '{}' did not bind port {} within {:?}",
                    service.name, service.port, self.settings.grace_period
                ),
            ));
        }
        info!(service = %service.name, port = service.port, pid = ?pid, "service restarted");
        Ok(format!("Service '{}' is listening on port {}", service.name, service.port))
    }

    async fn reapply_schema(&self, progress: ProgressFn<'_>) -> Result<String> {
        progress(20);
        self.db.migrate().await?;
        progress(70);
        self.db.ping().await?;
        Ok("Database schema reapplied and connectivity confirmed".to_string())
    }

    async fn resync_dependency(
        &self,
        dependency: &str,
        failover: Option<&str>,
        progress: ProgressFn<'_>,
    ) -> Result<String> {
        if let Some(name) = failover {
            let service = self.registry.find(name).ok_or_else(|| {
                GuardError::remediation_failed(
                    "ResyncDependency",
                    format!("failover service '{}' is not registered", name),
                )
            })?;
            if !self.prober.is_port_bound(service.port).await? {
                self.launcher.launch(service).await?;
                tokio::time::sleep(self.settings.grace_period).await;
                if !self.prober.is_port_bound(service.port).await? {
                    return Err(GuardError::remediation_failed(
                        "ResyncDependency",
                        format!("failover '{}' did not bind port {}", name, service.port),
                    ));
                }
            }
            progress(20);
        }

        let mut pct = 20u8;
        while pct < 100 {
            tokio::time::sleep(self.settings.resync_tick).await;
            pct = (pct + 20).min(100);
            progress(pct);
        }
        info!(dependency, failover = ?failover, "dependency resynchronised");
        Ok(format!("Dependency '{}' resynchronised", dependency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SimulatedDatabase, SimulatedDbState};
    use crate::error::ErrorCode;
    use crate::process::SimulatedHost;
    use crate::registry::ServiceRole;
    use parking_lot::Mutex;

    fn settings() -> RemediationSettings {
        RemediationSettings {
            grace_period: Duration::from_millis(5),
            port_release_wait: Duration::from_millis(5),
            resync_tick: Duration::from_millis(1),
        }
    }

    fn remediator(host: &SimulatedHost, db: SimulatedDatabase) -> Remediator {
        let registry = ServiceRegistry::new(vec![
            ServiceDescriptor::new("api", 3000, vec!["node".into(), "server.js".into()]),
            ServiceDescriptor::new("node-standby", 8546, vec!["geth".into()])
                .with_role(ServiceRole::Failover),
        ])
        .unwrap();
        Remediator::new(
            Arc::new(host.clone()),
            Arc::new(host.clone()),
            Arc::new(host.clone()),
            Arc::new(db),
            Arc::new(registry),
            settings(),
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |p| sink.lock().push(p))
    }

    #[tokio::test]
    async fn test_release_port() {
        let host = SimulatedHost::new();
        host.occupy(3001);
        let (seen, cb) = recorder();

        let outcome = remediator(&host, SimulatedDatabase::healthy())
            .execute(&DiagnosticError::port_conflict(3001, true), &cb)
            .await
            .unwrap();

        assert_eq!(outcome, "Port 3001 released");
        assert!(!host.is_bound(3001));
        assert_eq!(*seen.lock(), vec![10, 50, 80]);
    }

    #[tokio::test]
    async fn test_release_port_unkillable() {
        let host = SimulatedHost::new();
        host.occupy(3001);
        host.make_unkillable(3001);
        let (_, cb) = recorder();

        let err = remediator(&host, SimulatedDatabase::healthy())
            .execute(&DiagnosticError::port_conflict(3001, true), &cb)
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::RemediationFailed);
    }

    #[tokio::test]
    async fn test_restart_service() {
        let host = SimulatedHost::new();
        let (_, cb) = recorder();
        let svc = ServiceDescriptor::new("api", 3000, vec!["node".into(), "server.js".into()]);

        remediator(&host, SimulatedDatabase::healthy())
            .execute(&DiagnosticError::service_down(&svc), &cb)
            .await
            .unwrap();
        assert!(host.is_bound(3000));
        assert_eq!(host.launches(), vec!["api".to_string()]);
    }

    #[tokio::test]
    async fn test_reapply_schema_without_database() {
        let host = SimulatedHost::new();
        let (_, cb) = recorder();
        let err = remediator(&host, SimulatedDatabase::new(SimulatedDbState::Unconfigured))
            .execute(&DiagnosticError::database("missing"), &cb)
            .await
            .unwrap_err();
        assert!(err.is_remediation_failure());
    }

    #[tokio::test]
    async fn test_resync_launches_failover_and_reaches_100() {
        let host = SimulatedHost::new();
        let (seen, cb) = recorder();
        let error = DiagnosticError::sync_lag("blockchain-node", Some("node-standby".into()));

        remediator(&host, SimulatedDatabase::healthy())
            .execute(&error, &cb)
            .await
            .unwrap();

        assert!(host.is_bound(8546));
        let seen = seen.lock().clone();
        assert_eq!(seen.last(), Some(&100));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_plan_titles() {
        let step = Remediator::plan(0, &DiagnosticError::port_conflict(3001, true));
        assert_eq!(step.title, "Release port 3001");
        assert_eq!(step.error_id, "port-conflict-3001");
        assert_eq!(step.id, "step-1");
    }
}
