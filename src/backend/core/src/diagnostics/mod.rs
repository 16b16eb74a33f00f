//! Diagnostics engine.
//!
//! Runs a fixed battery of [`DiagnosticCheck`]s in registration order and
//! collects the problems they report as [`DiagnosticError`]s. When test mode
//! is on, registered [`FaultInjector`]s add synthetic problems after the real
//! checks.
//!
//! A failing, panicking or timed-out check is logged and skipped; it never
//! aborts the remaining checks.

mod checks;
mod faults;

pub use checks::{fleet_status, DatabaseCheck, FleetStatus, PortConflictCheck, ServiceLivenessCheck};
pub use faults::{DependencySyncLagInjector, FaultInjector};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{GuardError, Result};
use crate::registry::ServiceDescriptor;
use crate::telemetry::RecoveryMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Diagnostic Types
// ═══════════════════════════════════════════════════════════════════════════════

/// Kind of detected problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticKind {
    PortConflict,
    ServiceDown,
    DatabaseError,
    BlockchainSyncLag,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PortConflict => "PortConflict",
            Self::ServiceDown => "ServiceDown",
            Self::DatabaseError => "DatabaseError",
            Self::BlockchainSyncLag => "BlockchainSyncLag",
        }
    }

    /// The action the orchestrator dispatches for this kind.
    pub fn remediation(&self) -> RemediationAction {
        match self {
            Self::PortConflict => RemediationAction::ReleasePort,
            Self::ServiceDown => RemediationAction::RestartService,
            Self::DatabaseError => RemediationAction::ReapplySchema,
            Self::BlockchainSyncLag => RemediationAction::ResyncDependency,
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemediationAction {
    ReleasePort,
    RestartService,
    ReapplySchema,
    ResyncDependency,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReleasePort => "ReleasePort",
            Self::RestartService => "RestartService",
            Self::ReapplySchema => "ReapplySchema",
            Self::ResyncDependency => "ResyncDependency",
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific payload of a [`DiagnosticError`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiagnosticContext {
    #[serde(rename_all = "camelCase")]
    Port { port: u16, critical: bool },
    #[serde(rename_all = "camelCase")]
    Service { service: ServiceDescriptor },
    #[serde(rename_all = "camelCase")]
    Database { reason: String },
    #[serde(rename_all = "camelCase")]
    Dependency {
        dependency: String,
        failover_service: Option<String>,
    },
}

/// One detected problem. Ids are derived from kind and resource, so the same
/// problem always gets the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticError {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub remediation_action: RemediationAction,
    pub context: DiagnosticContext,
    pub message: String,
    pub detected_at: DateTime<Utc>,
}

impl DiagnosticError {
    fn new(
        id: String,
        kind: DiagnosticKind,
        severity: Severity,
        context: DiagnosticContext,
        message: String,
    ) -> Self {
        Self {
            id,
            kind,
            severity,
            remediation_action: kind.remediation(),
            context,
            message,
            detected_at: Utc::now(),
        }
    }

    pub fn port_conflict(port: u16, critical: bool) -> Self {
        let severity = if critical { Severity::High } else { Severity::Medium };
        Self::new(
            format!("port-conflict-{}", port),
            DiagnosticKind::PortConflict,
            severity,
            DiagnosticContext::Port { port, critical },
            format!("Port {} is in use but must stay free", port),
        )
    }

    pub fn service_down(service: &ServiceDescriptor) -> Self {
        Self::new(
            format!("service-down-{}", service.name),
            DiagnosticKind::ServiceDown,
            Severity::High,
            DiagnosticContext::Service {
                service: service.clone(),
            },
            format!(
                "Service '{}' is not listening on port {}",
                service.name, service.port
            ),
        )
    }

    pub fn database(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            "database-error".to_string(),
            DiagnosticKind::DatabaseError,
            Severity::High,
            DiagnosticContext::Database {
                reason: reason.clone(),
            },
            format!("Database check failed: {}", reason),
        )
    }

    pub fn sync_lag(dependency: impl Into<String>, failover_service: Option<String>) -> Self {
        let dependency = dependency.into();
        Self::new(
            format!("sync-lag-{}", dependency),
            DiagnosticKind::BlockchainSyncLag,
            Severity::Medium,
            DiagnosticContext::Dependency {
                dependency: dependency.clone(),
                failover_service,
            },
            format!("Dependency '{}' is lagging behind", dependency),
        )
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Check Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A single diagnostic check.
#[async_trait]
pub trait DiagnosticCheck: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Run the check; results must be ordered by resource.
    async fn run(&self) -> Result<Vec<DiagnosticError>>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════════════════════════════════════════

/// Runs registered checks sequentially, then fault injectors in test mode.
pub struct DiagnosticsEngine {
    checks: Vec<Arc<dyn DiagnosticCheck>>,
    injectors: Vec<Arc<dyn FaultInjector>>,
    check_timeout: Duration,
}

impl DiagnosticsEngine {
    pub fn new(check_timeout: Duration) -> Self {
        Self {
            checks: Vec::new(),
            injectors: Vec::new(),
            check_timeout,
        }
    }

    /// Register a check; checks run in registration order.
    pub fn register_check(&mut self, check: Arc<dyn DiagnosticCheck>) {
        info!(check = check.name(), "registered diagnostic check");
        self.checks.push(check);
    }

    pub fn register_injector(&mut self, injector: Arc<dyn FaultInjector>) {
        info!(injector = injector.name(), "registered fault injector");
        self.injectors.push(injector);
    }

    pub fn check_names(&self) -> Vec<String> {
        self.checks.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn injector_names(&self) -> Vec<String> {
        self.injectors.iter().map(|i| i.name().to_string()).collect()
    }

    /// Run every check and, in test mode, every injector.
    pub async fn run(&self, test_mode: bool) -> Vec<DiagnosticError> {
        let mut errors = Vec::new();

        for check in &self.checks {
            let name = check.name().to_string();
            let task_check = Arc::clone(check);
            let timeout = self.check_timeout;
            let handle =
                tokio::spawn(async move { tokio::time::timeout(timeout, task_check.run()).await });

            match handle.await {
                Ok(Ok(Ok(found))) => {
                    debug!(check = %name, found = found.len(), "check finished");
                    errors.extend(found);
                }
                Ok(Ok(Err(e))) => {
                    warn!(check = %name, error = %e, "check failed; continuing");
                }
                Ok(Err(elapsed)) => {
                    let e = GuardError::from(elapsed);
                    warn!(check = %name, timeout = ?timeout, code = %e.code(), "check timed out; continuing");
                }
                Err(join_error) => {
                    error!(check = %name, error = %join_error, "check panicked; continuing");
                }
            }
        }

        if test_mode {
            for injector in &self.injectors {
                let injected = injector.inject();
                debug!(injector = injector.name(), injected = injected.len(), "fault injected");
                errors.extend(injected);
            }
        }

        for e in &errors {
            RecoveryMetrics::diagnostic_error(e.kind.as_str(), e.severity.as_str());
        }
        info!(errors = errors.len(), test_mode, "diagnostics complete");
        errors
    }
}

impl fmt::Debug for DiagnosticsEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsEngine")
            .field("checks", &self.check_names())
            .field("injectors", &self.injector_names())
            .field("check_timeout", &self.check_timeout)
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GuardError;

    struct Fixed(Vec<DiagnosticError>);

    #[async_trait]
    impl DiagnosticCheck for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn run(&self) -> Result<Vec<DiagnosticError>> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl DiagnosticCheck for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn run(&self) -> Result<Vec<DiagnosticError>> {
            Err(GuardError::internal("boom"))
        }
    }

    struct Panicking;

    #[async_trait]
    impl DiagnosticCheck for Panicking {
        fn name(&self) -> &str {
            "panicking"
        }

        async fn run(&self) -> Result<Vec<DiagnosticError>> {
            panic!("check exploded");
        }
    }

    struct Slow;

    #[async_trait]
    impl DiagnosticCheck for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        async fn run(&self) -> Result<Vec<DiagnosticError>> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(vec![DiagnosticError::database("never reported")])
        }
    }

    #[test]
    fn test_ids_are_stable() {
        assert_eq!(DiagnosticError::port_conflict(3001, true).id, "port-conflict-3001");
        assert_eq!(DiagnosticError::database("x").id, "database-error");
        assert_eq!(DiagnosticError::sync_lag("eth", None).id, "sync-lag-eth");
        let svc = ServiceDescriptor::new("api", 3000, vec!["node".into()]);
        assert_eq!(DiagnosticError::service_down(&svc).id, "service-down-api");
    }

    #[test]
    fn test_severity_and_action() {
        let conflict = DiagnosticError::port_conflict(3001, false);
        assert_eq!(conflict.severity, Severity::Medium);
        assert_eq!(conflict.remediation_action, RemediationAction::ReleasePort);
        assert_eq!(
            DiagnosticError::sync_lag("eth", None).remediation_action,
            RemediationAction::ResyncDependency
        );
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(DiagnosticError::port_conflict(3001, true)).unwrap();
        assert_eq!(json["type"], "PortConflict");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["remediationAction"], "ReleasePort");
        assert_eq!(json["context"]["type"], "port");
        assert_eq!(json["context"]["port"], 3001);
        assert!(json["detectedAt"].is_string());
    }

    #[tokio::test]
    async fn test_failures_do_not_abort_remaining_checks() {
        let mut engine = DiagnosticsEngine::new(Duration::from_millis(100));
        engine.register_check(Arc::new(Failing));
        engine.register_check(Arc::new(Panicking));
        engine.register_check(Arc::new(Slow));
        engine.register_check(Arc::new(Fixed(vec![DiagnosticError::database("down")])));

        let errors = engine.run(false).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].id, "database-error");
    }

    #[tokio::test]
    async fn test_injectors_only_in_test_mode() {
        let mut engine = DiagnosticsEngine::new(Duration::from_secs(1));
        engine.register_injector(Arc::new(DependencySyncLagInjector::new("eth", None)));

        assert!(engine.run(false).await.is_empty());
        let errors = engine.run(true).await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, DiagnosticKind::BlockchainSyncLag);
        assert_eq!(errors[0].severity, Severity::Medium);
    }

    #[tokio::test]
    async fn test_output_follows_check_order() {
        let mut engine = DiagnosticsEngine::new(Duration::from_secs(1));
        engine.register_check(Arc::new(Fixed(vec![DiagnosticError::port_conflict(3001, true)])));
        engine.register_check(Arc::new(Fixed(vec![DiagnosticError::database("down")])));
        engine.register_injector(Arc::new(DependencySyncLagInjector::new("eth", None)));

        let ids: Vec<_> = engine.run(true).await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["port-conflict-3001", "database-error", "sync-lag-eth"]);
    }
}
