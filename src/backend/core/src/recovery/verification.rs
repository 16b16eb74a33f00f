//! Post-remediation verification pass.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::CriticalPort;
use crate::db::DatabaseConnector;
use crate::diagnostics::{fleet_status, FleetStatus};
use crate::probe::PortProber;
use crate::registry::ServiceRegistry;

/// Outcome of re-running the port, service and database checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub passed: bool,
    pub fleet: FleetStatus,
    pub service_ratio: f64,
    pub threshold: f64,
    pub database_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_error: Option<String>,
    /// One entry per failed criterion.
    pub warnings: Vec<String>,
}

pub struct Verifier<'a> {
    pub prober: &'a dyn PortProber,
    pub registry: &'a ServiceRegistry,
    pub critical_ports: &'a [CriticalPort],
    pub db: &'a dyn DatabaseConnector,
    pub threshold: f64,
}

impl Verifier<'_> {
    /// Pass requires every critical port free, at least `threshold` of the
    /// services reachable, and a successful database round-trip.
    pub async fn verify(&self) -> VerificationReport {
        let fleet = fleet_status(self.prober, self.registry, self.critical_ports).await;
        let ratio = fleet.online_ratio();
        let mut warnings = Vec::new();

        if fleet.port_conflicts > 0 {
            warnings.push(format!(
                "{} critical port(s) still in use",
                fleet.port_conflicts
            ));
        }
        if ratio < self.threshold {
            warnings.push(format!(
                "only {}/{} services reachable ({:.0}% < {:.0}%)",
                fleet.services_online,
                fleet.total_services,
                ratio * 100.0,
                self.threshold * 100.0
            ));
        }

        let database_error = if !self.db.is_configured() {
            Some("no connection string configured".to_string())
        } else {
            self.db.ping().await.err().map(|e| e.summary())
        };
        if let Some(ref reason) = database_error {
            warnings.push(format!("database unreachable: {}", reason));
        }

        let report = VerificationReport {
            passed: warnings.is_empty(),
            fleet,
            service_ratio: ratio,
            threshold: self.threshold,
            database_ok: database_error.is_none(),
            database_error,
            warnings,
        };
        info!(
            passed = report.passed,
            services_online = fleet.services_online,
            total_services = fleet.total_services,
            port_conflicts = fleet.port_conflicts,
            database_ok = report.database_ok,
            "verification complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SimulatedDatabase, SimulatedDbState};
    use crate::process::SimulatedHost;
    use crate::registry::ServiceDescriptor;

    fn registry(n: u16) -> ServiceRegistry {
        ServiceRegistry::new(
            (0..n)
                .map(|i| ServiceDescriptor::new(format!("svc-{}", i), 4000 + i, vec!["x".into()]))
                .collect(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_pass_when_everything_healthy() {
        let host = SimulatedHost::new();
        for i in 0..5 {
            host.occupy(4000 + i);
        }
        let registry = registry(5);
        let db = SimulatedDatabase::healthy();
        let report = Verifier {
            prober: &host,
            registry: &registry,
            critical_ports: &[CriticalPort::new(3001)],
            db: &db,
            threshold: 0.8,
        }
        .verify()
        .await;

        assert!(report.passed);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let host = SimulatedHost::new();
        for i in 0..4 {
            host.occupy(4000 + i);
        }
        let registry = registry(5);
        let db = SimulatedDatabase::healthy();
        let verifier = Verifier {
            prober: &host,
            registry: &registry,
            critical_ports: &[],
            db: &db,
            threshold: 0.8,
        };
        assert!(verifier.verify().await.passed);

        host.vacate(4003);
        let report = verifier.verify().await;
        assert!(!report.passed);
        assert_eq!(report.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_port_and_database_failures_reported() {
        let host = SimulatedHost::new();
        host.occupy(3001);
        let registry = registry(0);
        let db = SimulatedDatabase::new(SimulatedDbState::Unconfigured);
        let report = Verifier {
            prober: &host,
            registry: &registry,
            critical_ports: &[CriticalPort::new(3001)],
            db: &db,
            threshold: 0.8,
        }
        .verify()
        .await;

        assert!(!report.passed);
        assert!(!report.database_ok);
        assert_eq!(report.warnings.len(), 2);
    }
}
