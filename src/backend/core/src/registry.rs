//! Static table of the services Portguard keeps alive.
//!
//! The registry is built once from configuration and never mutated afterwards.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Whether a service is part of the normal fleet or a standby instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    #[default]
    Primary,
    /// Launched only by dependency resync; never reported as down.
    Failover,
}

/// A locally spawned service and how to start it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDescriptor {
    pub name: String,
    pub port: u16,
    /// Program followed by its arguments.
    #[serde(alias = "launch_command")]
    pub launch_command: Vec<String>,
    #[serde(default, alias = "working_dir", skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub role: ServiceRole,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, port: u16, launch_command: Vec<String>) -> Self {
        Self {
            name: name.into(),
            port,
            launch_command,
            working_dir: None,
            env: BTreeMap::new(),
            role: ServiceRole::Primary,
        }
    }

    pub fn with_role(mut self, role: ServiceRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn is_failover(&self) -> bool {
        self.role == ServiceRole::Failover
    }
}

/// Lookup over the configured services, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    services: Vec<ServiceDescriptor>,
}

impl ServiceRegistry {
    /// Build the registry, rejecting duplicate names and zero ports.
    pub fn new(services: Vec<ServiceDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for service in &services {
            if service.name.trim().is_empty() {
                return Err(GuardError::configuration("service name must not be empty"));
            }
            if service.port == 0 {
                return Err(GuardError::configuration(format!(
                    "service '{}' has port 0",
                    service.name
                )));
            }
            if !seen.insert(service.name.as_str()) {
                return Err(GuardError::configuration(format!(
                    "duplicate service name '{}'",
                    service.name
                )));
            }
        }
        Ok(Self { services })
    }

    pub fn list(&self) -> &[ServiceDescriptor] {
        &self.services
    }

    pub fn find(&self, name: &str) -> Option<&ServiceDescriptor> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Services expected to be running at all times.
    pub fn primary(&self) -> impl Iterator<Item = &ServiceDescriptor> {
        self.services.iter().filter(|s| !s.is_failover())
    }

    pub fn primary_count(&self) -> usize {
        self.primary().count()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn svc(name: &str, port: u16) -> ServiceDescriptor {
        ServiceDescriptor::new(name, port, vec!["true".into()])
    }

    #[test]
    fn test_find_and_list_preserve_order() {
        let registry = ServiceRegistry::new(vec![svc("api", 3000), svc("web", 5000)]).unwrap();
        let names: Vec<_> = registry.list().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["api", "web"]);
        assert_eq!(registry.find("web").map(|s| s.port), Some(5000));
        assert!(registry.find("ledger").is_none());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ServiceRegistry::new(vec![svc("api", 3000), svc("api", 3001)]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_zero_port_rejected() {
        assert!(ServiceRegistry::new(vec![svc("api", 0)]).is_err());
    }

    #[test]
    fn test_primary_excludes_failover() {
        let registry = ServiceRegistry::new(vec![
            svc("api", 3000),
            svc("node-backup", 8546).with_role(ServiceRole::Failover),
        ])
        .unwrap();
        assert_eq!(registry.primary_count(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_descriptor_serializes_camel_case() {
        let json = serde_json::to_value(svc("api", 3000).with_working_dir("/srv/api")).unwrap();
        assert_eq!(json["launchCommand"][0], "true");
        assert_eq!(json["workingDir"], "/srv/api");
        assert_eq!(json["role"], "primary");
    }

    #[test]
    fn test_descriptor_reads_back_what_it_writes() {
        let original = svc("api", 3000)
            .with_working_dir("/srv/api")
            .with_env("RUST_LOG", "info");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ServiceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_descriptor_accepts_snake_case_keys() {
        let parsed: ServiceDescriptor = serde_json::from_str(
            r#"{"name": "api", "port": 3000, "launch_command": ["true"], "working_dir": "/srv/api"}"#,
        )
        .unwrap();
        assert_eq!(parsed.launch_command, vec!["true".to_string()]);
        assert_eq!(parsed.working_dir, Some(PathBuf::from("/srv/api")));
    }
}
