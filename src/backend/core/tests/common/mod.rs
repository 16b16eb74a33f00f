//! Shared fixtures: a simulated host, a simulated database and a config with
//! short timings.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use portguard_core::config::Config;
use portguard_core::db::{DatabaseConnector, SimulatedDatabase};
use portguard_core::events::EventBroadcaster;
use portguard_core::process::SimulatedHost;
use portguard_core::recovery::{HostBindings, RecoveryOrchestrator};
use tempfile::TempDir;

pub struct Harness {
    pub host: SimulatedHost,
    pub db: SimulatedDatabase,
    pub orchestrator: RecoveryOrchestrator,
    pub events: Arc<EventBroadcaster>,
    pub workdir: TempDir,
}

/// Critical ports 3001-3003 and services api:3000, dashboard:5000, gateway:8080.
pub fn config(workdir: &TempDir) -> Config {
    let mut config = Config::default();
    let recovery = &mut config.recovery;
    recovery.grace_period = Duration::from_millis(5);
    recovery.port_release_wait = Duration::from_millis(5);
    recovery.resync_tick = Duration::from_millis(1);
    recovery.probe_timeout = Duration::from_millis(100);
    recovery.check_timeout = Duration::from_secs(2);
    recovery.backup_dir = workdir.path().join("backups");
    recovery.backup_files = vec![workdir.path().join("portguard.toml")];
    std::fs::write(workdir.path().join("portguard.toml"), "[server]\nport = 7070\n").unwrap();
    config
}

pub fn harness_with(config_fn: impl FnOnce(&mut Config), db: SimulatedDatabase) -> Harness {
    let workdir = tempfile::tempdir().unwrap();
    let mut config = config(&workdir);
    config_fn(&mut config);

    let host = SimulatedHost::new();
    let shared_db: Arc<dyn DatabaseConnector> = Arc::new(db.clone());
    let events = Arc::new(EventBroadcaster::new(1024));
    let orchestrator =
        RecoveryOrchestrator::new(&config, HostBindings::simulated(host.clone(), shared_db), Arc::clone(&events))
            .unwrap();

    Harness {
        host,
        db,
        orchestrator,
        events,
        workdir,
    }
}

pub fn harness() -> Harness {
    harness_with(|_| {}, SimulatedDatabase::healthy())
}

/// Bind every registered service so the fleet starts healthy.
pub fn bring_up_all(host: &SimulatedHost) {
    for port in [3000, 5000, 8080] {
        host.occupy(port);
    }
}
