use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{DiagnosticCheck, DiagnosticError};
use crate::config::CriticalPort;
use crate::db::DatabaseConnector;
use crate::error::Result;
use crate::probe::PortProber;
use crate::registry::ServiceRegistry;

/// Reports critical ports that must stay free but are bound.
pub struct PortConflictCheck {
    prober: Arc<dyn PortProber>,
    ports: Vec<CriticalPort>,
}

impl PortConflictCheck {
    pub fn new(prober: Arc<dyn PortProber>, mut ports: Vec<CriticalPort>) -> Self {
        ports.sort_by_key(|p| p.port);
        Self { prober, ports }
    }
}

#[async_trait]
impl DiagnosticCheck for PortConflictCheck {
    fn name(&self) -> &str {
        "port-conflicts"
    }

    async fn run(&self) -> Result<Vec<DiagnosticError>> {
        let mut errors = Vec::new();
        for critical in self.ports.iter().filter(|p| p.must_stay_free) {
            match self.prober.is_port_bound(critical.port).await {
                Ok(true) => errors.push(DiagnosticError::port_conflict(critical.port, critical.critical)),
                Ok(false) => {}
                Err(e) => warn!(port = critical.port, error = %e, "could not probe critical port"),
            }
        }
        Ok(errors)
    }
}

/// Reports primary services whose port is not bound.
pub struct ServiceLivenessCheck {
    prober: Arc<dyn PortProber>,
    registry: Arc<ServiceRegistry>,
}

impl ServiceLivenessCheck {
    pub fn new(prober: Arc<dyn PortProber>, registry: Arc<ServiceRegistry>) -> Self {
        Self { prober, registry }
    }
}

#[async_trait]
impl DiagnosticCheck for ServiceLivenessCheck {
    fn name(&self) -> &str {
        "service-liveness"
    }

    async fn run(&self) -> Result<Vec<DiagnosticError>> {
        let mut services: Vec<_> = self.registry.primary().collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));

        let mut errors = Vec::new();
        for service in services {
            match self.prober.is_port_bound(service.port).await {
                Ok(true) => {}
                Ok(false) => errors.push(DiagnosticError::service_down(service)),
                Err(e) => warn!(service = %service.name, error = %e, "could not probe service port"),
            }
        }
        Ok(errors)
    }
}

/// Round-trips the database; a missing connection string counts as a failure.
pub struct DatabaseCheck {
    db: Arc<dyn DatabaseConnector>,
}

impl DatabaseCheck {
    pub fn new(db: Arc<dyn DatabaseConnector>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl DiagnosticCheck for DatabaseCheck {
    fn name(&self) -> &str {
        "database"
    }

    async fn run(&self) -> Result<Vec<DiagnosticError>> {
        if !self.db.is_configured() {
            return Ok(vec![DiagnosticError::database("no connection string configured")]);
        }
        match self.db.ping().await {
            Ok(()) => Ok(Vec::new()),
            Err(e) => Ok(vec![DiagnosticError::database(e.summary())]),
        }
    }
}

/// Point-in-time view of the fleet used for stats and verification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetStatus {
    pub services_online: usize,
    pub total_services: usize,
    pub port_conflicts: usize,
}

impl FleetStatus {
    /// Share of primary services reachable; an empty fleet counts as fully online.
    pub fn online_ratio(&self) -> f64 {
        if self.total_services == 0 {
            1.0
        } else {
            self.services_online as f64 / self.total_services as f64
        }
    }
}

/// Probe every critical port and primary service once.
///
/// Ports that cannot be probed count as neither conflicting nor online.
pub async fn fleet_status(
    prober: &dyn PortProber,
    registry: &ServiceRegistry,
    critical_ports: &[CriticalPort],
) -> FleetStatus {
    let mut status = FleetStatus {
        total_services: registry.primary_count(),
        ..FleetStatus::default()
    };

    for critical in critical_ports.iter().filter(|p| p.must_stay_free) {
        if let Ok(true) = prober.is_port_bound(critical.port).await {
            status.port_conflicts += 1;
        }
    }
    for service in registry.primary() {
        if let Ok(true) = prober.is_port_bound(service.port).await {
            status.services_online += 1;
        }
    }
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SimulatedDatabase, SimulatedDbState};
    use crate::diagnostics::{DiagnosticKind, Severity};
    use crate::process::SimulatedHost;
    use crate::registry::{ServiceDescriptor, ServiceRole};

    fn registry() -> Arc<ServiceRegistry> {
        Arc::new(
            ServiceRegistry::new(vec![
                ServiceDescriptor::new("web", 5000, vec!["node".into()]),
                ServiceDescriptor::new("api", 3000, vec!["node".into()]),
                ServiceDescriptor::new("standby", 8546, vec!["geth".into()])
                    .with_role(ServiceRole::Failover),
            ])
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_port_conflicts_sorted_and_filtered() {
        let host = SimulatedHost::new();
        host.occupy(3003);
        host.occupy(3001);
        host.occupy(3002);
        let mut ignored = CriticalPort::new(3002);
        ignored.must_stay_free = false;
        let mut minor = CriticalPort::new(3003);
        minor.critical = false;

        let check = PortConflictCheck::new(
            Arc::new(host),
            vec![minor, ignored, CriticalPort::new(3001)],
        );
        let errors = check.run().await.unwrap();

        let ids: Vec<_> = errors.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["port-conflict-3001", "port-conflict-3003"]);
        assert_eq!(errors[0].severity, Severity::High);
        assert_eq!(errors[1].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_probe_failure_skips_port() {
        let host = SimulatedHost::new();
        host.make_unprobeable(3001);
        host.occupy(3002);
        let check = PortConflictCheck::new(
            Arc::new(host),
            vec![CriticalPort::new(3001), CriticalPort::new(3002)],
        );
        let errors = check.run().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, "port-conflict-3002");
    }

    #[tokio::test]
    async fn test_failover_services_never_reported_down() {
        let host = SimulatedHost::new();
        let check = ServiceLivenessCheck::new(Arc::new(host), registry());
        let ids: Vec<_> = check.run().await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["service-down-api", "service-down-web"]);
    }

    #[tokio::test]
    async fn test_database_check_missing_url() {
        let check = DatabaseCheck::new(Arc::new(SimulatedDatabase::new(
            SimulatedDbState::Unconfigured,
        )));
        let errors = check.run().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::DatabaseError);
        assert_eq!(errors[0].severity, Severity::High);
    }

    #[tokio::test]
    async fn test_database_check_healthy() {
        let check = DatabaseCheck::new(Arc::new(SimulatedDatabase::healthy()));
        assert!(check.run().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fleet_status() {
        let host = SimulatedHost::new();
        host.occupy(3001);
        host.occupy(3000);
        let status = fleet_status(&host, &registry(), &[CriticalPort::new(3001)]).await;
        assert_eq!(
            status,
            FleetStatus {
                services_online: 1,
                total_services: 2,
                port_conflicts: 1,
            }
        );
        assert_eq!(status.online_ratio(), 0.5);
    }
}
