use super::DiagnosticError;

/// Named hook contributing synthetic problems while test mode is on.
pub trait FaultInjector: Send + Sync {
    fn name(&self) -> &str;

    fn inject(&self) -> Vec<DiagnosticError>;
}

/// Reports an external dependency as out of sync (`dependency-sync-lag`).
#[derive(Debug, Clone)]
pub struct DependencySyncLagInjector {
    dependency: String,
    failover_service: Option<String>,
}

impl DependencySyncLagInjector {
    pub const NAME: &'static str = "dependency-sync-lag";

    pub fn new(dependency: impl Into<String>, failover_service: Option<String>) -> Self {
        Self {
            dependency: dependency.into(),
            failover_service,
        }
    }
}

impl FaultInjector for DependencySyncLagInjector {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn inject(&self) -> Vec<DiagnosticError> {
        vec![DiagnosticError::sync_lag(
            &self.dependency,
            self.failover_service.clone(),
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosticContext;

    #[test]
    fn test_sync_lag_carries_failover() {
        let injector = DependencySyncLagInjector::new("blockchain-node", Some("node-standby".into()));
        assert_eq!(injector.name(), "dependency-sync-lag");

        let errors = injector.inject();
        assert_eq!(errors[0].id, "sync-lag-blockchain-node");
        assert_eq!(
            errors[0].context,
            DiagnosticContext::Dependency {
                dependency: "blockchain-node".into(),
                failover_service: Some("node-standby".into()),
            }
        );
    }
}
