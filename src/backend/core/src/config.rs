//! Configuration management.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};
use crate::registry::{ServiceDescriptor, ServiceRegistry};
use crate::telemetry::logging::LoggingConfig;

/// Environment variable prefix, e.g. `PORTGUARD__SERVER__PORT=7070`.
pub const ENV_PREFIX: &str = "PORTGUARD";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Critical ports and managed services
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Recovery orchestrator configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL. Unset means every database check fails.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long to wait for a connection before giving up
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

/// A port that is probed on every diagnostic run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalPort {
    pub port: u16,

    /// A bound port is reported as a conflict.
    #[serde(default = "default_true")]
    pub must_stay_free: bool,

    /// On the hard-coded critical list: conflicts are high severity.
    #[serde(default = "default_true")]
    pub critical: bool,

    #[serde(default)]
    pub label: Option<String>,
}

impl CriticalPort {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            must_stay_free: true,
            critical: true,
            label: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_critical_ports")]
    pub critical_ports: Vec<CriticalPort>,

    #[serde(default = "default_services")]
    pub services: Vec<ServiceDescriptor>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            critical_ports: default_critical_ports(),
            services: default_services(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FaultInjectionConfig {
    /// Register the built-in injectors (they only fire in test mode)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Name of the external dependency the sync-lag injector reports
    #[serde(default = "default_dependency")]
    pub dependency: String,

    /// Service launched when that dependency is resynced
    #[serde(default)]
    pub failover_service: Option<String>,
}

impl Default for FaultInjectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dependency: default_dependency(),
            failover_service: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Wait after launching a service before re-probing it
    #[serde(default = "default_grace_period", with = "humantime_serde")]
    pub grace_period: Duration,

    /// Fraction of services that must be reachable for verification to pass
    #[serde(default = "default_verification_threshold")]
    pub verification_threshold: f64,

    /// A failed verification ends the session as `failed` instead of warning
    #[serde(default)]
    pub strict_verification: bool,

    /// Wait after signalling a port holder before re-probing
    #[serde(default = "default_port_release_wait", with = "humantime_serde")]
    pub port_release_wait: Duration,

    /// Delay between dependency resync progress increments
    #[serde(default = "default_resync_tick", with = "humantime_serde")]
    pub resync_tick: Duration,

    /// Connect timeout of a single port probe
    #[serde(default = "default_probe_timeout", with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Upper bound for one diagnostic check
    #[serde(default = "default_check_timeout", with = "humantime_serde")]
    pub check_timeout: Duration,

    /// Where timestamped backups are written
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,

    /// Files copied into each backup
    #[serde(default = "default_backup_files")]
    pub backup_files: Vec<PathBuf>,

    /// Number of backup directories kept
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,

    #[serde(default)]
    pub fault_injection: FaultInjectionConfig,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            grace_period: default_grace_period(),
            verification_threshold: default_verification_threshold(),
            strict_verification: false,
            port_release_wait: default_port_release_wait(),
            resync_tick: default_resync_tick(),
            probe_timeout: default_probe_timeout(),
            check_timeout: default_check_timeout(),
            backup_dir: default_backup_dir(),
            backup_files: default_backup_files(),
            max_backups: default_max_backups(),
            fault_injection: FaultInjectionConfig::default(),
        }
    }
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 7070 }
fn default_max_connections() -> u32 { 5 }
fn default_connect_timeout() -> Duration { Duration::from_secs(3) }
fn default_true() -> bool { true }
fn default_dependency() -> String { "blockchain-node".to_string() }
fn default_grace_period() -> Duration { Duration::from_secs(2) }
fn default_verification_threshold() -> f64 { 0.8 }
fn default_port_release_wait() -> Duration { Duration::from_millis(500) }
fn default_resync_tick() -> Duration { Duration::from_millis(250) }
fn default_probe_timeout() -> Duration { Duration::from_secs(1) }
fn default_check_timeout() -> Duration { Duration::from_secs(10) }
fn default_backup_dir() -> PathBuf { PathBuf::from("backups") }
fn default_max_backups() -> usize { 10 }

fn default_backup_files() -> Vec<PathBuf> {
    vec![
        PathBuf::from("portguard.toml"),
        PathBuf::from(".env"),
        PathBuf::from("migrations/0001_recovery_sessions.sql"),
    ]
}

fn default_critical_ports() -> Vec<CriticalPort> {
    [3001, 3002, 3003].into_iter().map(CriticalPort::new).collect()
}

fn default_services() -> Vec<ServiceDescriptor> {
    vec![
        ServiceDescriptor::new("api", 3000, vec!["node".into(), "server.js".into()]),
        ServiceDescriptor::new("dashboard", 5000, vec!["node".into(), "dashboard.js".into()]),
        ServiceDescriptor::new("gateway", 8080, vec!["node".into(), "gateway.js".into()]),
    ]
}

impl Config {
    /// Load configuration from the environment, optionally layered over a file.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject configurations the orchestrator cannot act on.
    pub fn validate(&self) -> Result<()> {
        let threshold = self.recovery.verification_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(GuardError::configuration(format!(
                "recovery.verification_threshold must be within 0.0..=1.0, got {}",
                threshold
            )));
        }
        if self.recovery.max_backups == 0 {
            return Err(GuardError::configuration("recovery.max_backups must be at least 1"));
        }

        let mut seen = HashSet::new();
        for critical in &self.registry.critical_ports {
            if critical.port == 0 {
                return Err(GuardError::configuration("critical port 0 is not probeable"));
            }
            if !seen.insert(critical.port) {
                return Err(GuardError::configuration(format!(
                    "critical port {} listed twice",
                    critical.port
                )));
            }
        }

        let registry = self.service_registry()?;
        if let Some(ref failover) = self.recovery.fault_injection.failover_service {
            if registry.find(failover).is_none() {
                return Err(GuardError::configuration(format!(
                    "failover service '{}' is not registered",
                    failover
                )));
            }
        }
        Ok(())
    }

    /// Build the service registry from the `registry.services` table.
    pub fn service_registry(&self) -> Result<ServiceRegistry> {
        ServiceRegistry::new(self.registry.services.clone())
    }
}
