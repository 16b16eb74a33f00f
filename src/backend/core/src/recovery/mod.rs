//! Recovery orchestrator.
//!
//! Owns the session slot and drives one [`RecoverySession`] at a time:
//!
//! ```text
//! idle ──► diagnosing ──► completed            (no problems found)
//!               │
//!               ▼
//!          recovering ──► verifying ──► completed (with or without warnings)
//!               │              │
//!               └──────────────┴──────► failed  (unexpected error, panic, strict verification)
//! ```
//!
//! Remediation failures are recorded on their step and never stop the
//! sequence. Anything else that goes wrong while recovering or verifying
//! fails the session and restores the pre-remediation backup.

pub mod backup;
pub mod remediation;
pub mod session;
pub mod verification;

pub use backup::{BackupManager, BackupManifest, BackupRecoveryInfo, BackupSummary};
pub use remediation::{RemediationSettings, Remediator};
pub use session::{RecoverySession, RecoveryState, RecoveryStats, RecoveryStep, StepStatus};
pub use verification::{VerificationReport, Verifier};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, CriticalPort};
use crate::db::{DatabaseConnector, PgDatabase, SessionRecord};
use crate::diagnostics::{
    fleet_status, DatabaseCheck, DependencySyncLagInjector, DiagnosticError, DiagnosticsEngine,
    PortConflictCheck, ServiceLivenessCheck,
};
use crate::error::{GuardError, Result};
use crate::events::{EventBroadcaster, EventLevel, RecoveryEvent};
use crate::probe::{PortProber, TcpPortProber};
use crate::process::{OsPortReleaser, OsProcessLauncher, PortReleaser, ProcessLauncher, SimulatedHost};
use crate::registry::ServiceRegistry;
use crate::telemetry::RecoveryMetrics;

// ═══════════════════════════════════════════════════════════════════════════════
// Dependencies
// ═══════════════════════════════════════════════════════════════════════════════

/// The host and database the orchestrator acts on.
#[derive(Clone)]
pub struct HostBindings {
    pub prober: Arc<dyn PortProber>,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub releaser: Arc<dyn PortReleaser>,
    pub db: Arc<dyn DatabaseConnector>,
}

impl HostBindings {
    /// Real TCP probes, detached processes and PostgreSQL.
    pub fn os(config: &Config) -> Result<Self> {
        Ok(Self {
            prober: Arc::new(TcpPortProber::new(config.recovery.probe_timeout)),
            launcher: Arc::new(OsProcessLauncher::new()),
            releaser: Arc::new(OsPortReleaser::default()),
            db: Arc::new(PgDatabase::new(&config.database)?),
        })
    }

    /// Everything backed by one simulated host.
    pub fn simulated(host: SimulatedHost, db: Arc<dyn DatabaseConnector>) -> Self {
        Self {
            prober: Arc::new(host.clone()),
            launcher: Arc::new(host.clone()),
            releaser: Arc::new(host),
            db,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status Snapshot
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub state: RecoveryState,
    pub message: String,
    pub test_mode: bool,
    pub stats: RecoveryStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<DiagnosticError>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_steps: Option<Vec<RecoveryStep>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════════

struct Inner {
    registry: Arc<ServiceRegistry>,
    critical_ports: Vec<CriticalPort>,
    bindings: HostBindings,
    engine: DiagnosticsEngine,
    remediator: Remediator,
    backups: BackupManager,
    events: Arc<EventBroadcaster>,
    verification_threshold: f64,
    strict_verification: bool,
    active: AtomicBool,
    test_mode: AtomicBool,
    session: RwLock<Option<RecoverySession>>,
    last_diagnostics: RwLock<Vec<DiagnosticError>>,
}

/// Cheap to clone; all clones share one session slot.
#[derive(Clone)]
pub struct RecoveryOrchestrator {
    inner: Arc<Inner>,
}

/// Holds the session slot; releases it on drop.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.active.store(false, Ordering::SeqCst);
    }
}

impl RecoveryOrchestrator {
    pub fn new(config: &Config, bindings: HostBindings, events: Arc<EventBroadcaster>) -> Result<Self> {
        let registry = Arc::new(config.service_registry()?);
        let recovery = &config.recovery;

        let mut engine = DiagnosticsEngine::new(recovery.check_timeout);
        engine.register_check(Arc::new(PortConflictCheck::new(
            Arc::clone(&bindings.prober),
            config.registry.critical_ports.clone(),
        )));
        engine.register_check(Arc::new(ServiceLivenessCheck::new(
            Arc::clone(&bindings.prober),
            Arc::clone(&registry),
        )));
        engine.register_check(Arc::new(DatabaseCheck::new(Arc::clone(&bindings.db))));
        if recovery.fault_injection.enabled {
            engine.register_injector(Arc::new(DependencySyncLagInjector::new(
                &recovery.fault_injection.dependency,
                recovery.fault_injection.failover_service.clone(),
            )));
        }

        let remediator = Remediator::new(
            Arc::clone(&bindings.prober),
            Arc::clone(&bindings.launcher),
            Arc::clone(&bindings.releaser),
            Arc::clone(&bindings.db),
            Arc::clone(&registry),
            RemediationSettings {
                grace_period: recovery.grace_period,
                port_release_wait: recovery.port_release_wait,
                resync_tick: recovery.resync_tick,
            },
        );

        let backups = BackupManager::new(
            &recovery.backup_dir,
            recovery.backup_files.clone(),
            recovery.max_backups,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                critical_ports: config.registry.critical_ports.clone(),
                bindings,
                engine,
                remediator,
                backups,
                events,
                verification_threshold: recovery.verification_threshold,
                strict_verification: recovery.strict_verification,
                active: AtomicBool::new(false),
                test_mode: AtomicBool::new(false),
                session: RwLock::new(None),
                last_diagnostics: RwLock::new(Vec::new()),
            }),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn events(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.inner.events)
    }

    pub fn registry(&self) -> &ServiceRegistry {
        &self.inner.registry
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn test_mode(&self) -> bool {
        self.inner.test_mode.load(Ordering::SeqCst)
    }

    /// Copy of the current (or last) session.
    pub fn session(&self) -> Option<RecoverySession> {
        self.inner.session.read().clone()
    }

    pub fn state(&self) -> RecoveryState {
        self.inner
            .session
            .read()
            .as_ref()
            .map_or(RecoveryState::Idle, |s| s.state)
    }

    /// Snapshot for `/api/status`. Before the first session the fleet is
    /// probed so the counts reflect the host as it is now.
    pub async fn status(&self) -> StatusSnapshot {
        let test_mode = self.test_mode();
        let current = self.inner.session.read().clone();
        match current {
            Some(mut session) => {
                session.refresh_timing();
                StatusSnapshot {
                    state: session.state,
                    message: session.message,
                    test_mode,
                    stats: session.stats,
                    diagnostics: non_empty(session.diagnostics),
                    recovery_steps: non_empty(session.steps),
                    warnings: non_empty(session.warnings),
                    session_id: Some(session.id),
                }
            }
            None => {
                let mut stats = RecoveryStats::default();
                stats.apply_fleet(self.fleet().await);
                StatusSnapshot {
                    state: RecoveryState::Idle,
                    message: "Ready".to_string(),
                    test_mode,
                    stats,
                    diagnostics: non_empty(self.inner.last_diagnostics.read().clone()),
                    recovery_steps: None,
                    warnings: None,
                    session_id: None,
                }
            }
        }
    }

    pub async fn backups(&self) -> Result<Vec<BackupSummary>> {
        self.inner.backups.list().await
    }

    pub fn set_test_mode(&self, enabled: bool) -> bool {
        let previous = self.inner.test_mode.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(test_mode = enabled, "test mode toggled");
            self.notify(
                EventLevel::Info,
                "Test mode",
                if enabled { "Test mode enabled" } else { "Test mode disabled" },
            );
        }
        enabled
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Session Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn claim(&self) -> Result<SlotGuard> {
        self.inner
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| GuardError::session_conflict())?;
        Ok(SlotGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    fn open_session(&self, test_mode: Option<bool>) -> Result<(SlotGuard, Uuid)> {
        let guard = self.claim()?;
        if let Some(enabled) = test_mode {
            self.set_test_mode(enabled);
        }
        let session = RecoverySession::begin(self.test_mode());
        let id = session.id;
        let message = session.message.clone();
        *self.inner.session.write() = Some(session);

        RecoveryMetrics::session_started(self.test_mode());
        info!(session_id = %id, test_mode = self.test_mode(), "recovery session started");
        self.publish_state(RecoveryState::Diagnosing, &message);
        Ok((guard, id))
    }

    /// Start a session in the background; returns its id immediately.
    pub fn start(&self, test_mode: Option<bool>) -> Result<Uuid> {
        let (guard, id) = self.open_session(test_mode)?;
        let this = self.clone();
        tokio::spawn(async move { this.drive(guard).await });
        Ok(id)
    }

    /// Run a whole session and return its final state.
    pub async fn run(&self, test_mode: Option<bool>) -> Result<RecoverySession> {
        let (guard, _) = self.open_session(test_mode)?;
        self.drive(guard).await;
        self.session()
            .ok_or_else(|| GuardError::internal("session missing after run"))
    }

    /// Wait until no session holds the slot.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.is_active() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        true
    }

    async fn drive(&self, guard: SlotGuard) {
        let this = self.clone();
        let outcome = tokio::spawn(async move { this.execute().await }).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                e.log();
                self.abort(format!("Recovery failed: {}", e.summary())).await;
            }
            Err(join_error) => {
                let reason = if join_error.is_panic() {
                    "a remediation task panicked".to_string()
                } else {
                    join_error.to_string()
                };
                let e = GuardError::catastrophic(reason);
                e.log();
                self.abort(format!("Recovery failed: {}", e.summary())).await;
            }
        }

        self.finish().await;
        drop(guard);
    }

    async fn execute(&self) -> Result<()> {
        let test_mode = self.with_session(|s| s.test_mode)?;

        // ── diagnosing ──
        self.log(EventLevel::Info, "Running diagnostics");
        let diagnostics = self.inner.engine.run(test_mode).await;
        *self.inner.last_diagnostics.write() = diagnostics.clone();
        let fleet = self.fleet().await;
        self.with_session(|s| {
            s.diagnostics = diagnostics.clone();
            s.stats.apply_fleet(fleet);
            s.refresh_timing();
        })?;
        self.inner
            .events
            .publish(RecoveryEvent::diagnostics_update(&diagnostics));
        self.publish_stats();

        if diagnostics.is_empty() {
            self.transition(RecoveryState::Completed, "No issues detected")?;
            self.notify(EventLevel::Success, "Diagnostics", "No issues detected");
            return Ok(());
        }
        self.log(
            EventLevel::Warning,
            format!("Diagnostics found {} issue(s)", diagnostics.len()),
        );

        // ── recovering ──
        let steps: Vec<_> = diagnostics
            .iter()
            .enumerate()
            .map(|(i, e)| Remediator::plan(i, e))
            .collect();
        self.with_session(|s| s.steps = steps)?;
        self.transition(
            RecoveryState::Recovering,
            format!("Remediating {} issue(s)", diagnostics.len()),
        )?;
        self.publish_steps();

        self.take_backup().await?;

        for (index, error) in diagnostics.iter().enumerate() {
            self.run_step(index, error).await?;
        }

        // ── verifying ──
        self.transition(RecoveryState::Verifying, "Verifying recovery")?;
        let report = Verifier {
            prober: self.inner.bindings.prober.as_ref(),
            registry: &self.inner.registry,
            critical_ports: &self.inner.critical_ports,
            db: self.inner.bindings.db.as_ref(),
            threshold: self.inner.verification_threshold,
        }
        .verify()
        .await;

        let passed = report.passed;
        let fleet = report.fleet;
        let warnings = report.warnings.clone();
        self.with_session(|s| {
            s.stats.apply_fleet(fleet);
            s.warnings.extend(warnings.iter().cloned());
            s.verification = Some(report);
        })?;
        self.publish_stats();
        RecoveryMetrics::services_online(fleet.services_online);

        let has_warnings = self.with_session(|s| s.has_warnings())?;
        if passed && !has_warnings {
            self.transition(RecoveryState::Completed, "Recovery completed successfully")?;
            self.notify(EventLevel::Success, "Recovery", "Recovery completed successfully");
        } else if !passed && self.inner.strict_verification {
            self.transition(RecoveryState::Failed, "Verification failed")?;
            self.notify(EventLevel::Error, "Recovery", warnings.join("; "));
        } else {
            self.transition(RecoveryState::Completed, "Recovery completed with warnings")?;
            self.notify(EventLevel::Warning, "Recovery", "Recovery completed with warnings");
        }
        Ok(())
    }

    async fn take_backup(&self) -> Result<()> {
        let info = self.with_session(|s| BackupRecoveryInfo {
            state: s.state,
            diagnostic_results: s.diagnostics.clone(),
            stats: s.stats,
        })?;

        match self.inner.backups.create(info).await {
            Ok((dir, manifest)) => {
                self.with_session(|s| s.backup = Some(dir.clone()))?;
                self.inner.events.publish(RecoveryEvent::backup_update(serde_json::json!({
                    "path": dir,
                    "timestamp": manifest.timestamp,
                    "files": manifest.files.len(),
                })));
                self.log(
                    EventLevel::Info,
                    format!("Backup created at {}", dir.display()),
                );
            }
            Err(e) => {
                let message = format!("Backup failed: {}", e.summary());
                self.log(EventLevel::Warning, &message);
                self.with_session(|s| s.warnings.push(message))?;
            }
        }
        Ok(())
    }

    async fn run_step(&self, index: usize, error: &DiagnosticError) -> Result<()> {
        let title = self.with_session(|s| -> Result<String> {
            let step = s
                .step_mut(index)
                .ok_or_else(|| GuardError::internal(format!("no step {}", index)))?;
            step.start()?;
            Ok(step.title.clone())
        })??;
        self.publish_steps();
        self.log(EventLevel::Info, format!("Starting: {}", title));

        let this = self.clone();
        let progress = move |pct: u8| {
            let updated = this.with_session(|s| {
                if let Some(step) = s.step_mut(index) {
                    step.advance(pct);
                }
                s.refresh_timing();
            });
            if updated.is_ok() {
                this.publish_steps();
            }
        };

        let result = self.inner.remediator.execute(error, &progress).await;
        RecoveryMetrics::remediation(error.remediation_action.as_str(), result.is_ok());

        match result {
            Ok(outcome) => {
                self.with_session(|s| -> Result<()> {
                    if let Some(step) = s.step_mut(index) {
                        step.complete()?;
                    }
                    s.refresh_timing();
                    Ok(())
                })??;
                self.log(EventLevel::Success, outcome);
            }
            Err(e) if e.is_remediation_failure() => {
                let reason = e.summary();
                self.with_session(|s| -> Result<()> {
                    if let Some(step) = s.step_mut(index) {
                        step.fail(&reason)?;
                    }
                    s.warnings.push(format!("{}: {}", title, reason));
                    s.refresh_timing();
                    Ok(())
                })??;
                self.log(EventLevel::Error, format!("{} failed: {}", title, reason));
            }
            Err(e) => {
                let reason = e.summary();
                self.with_session(|s| {
                    if let Some(step) = s.step_mut(index) {
                        let _ = step.fail(&reason);
                    }
                })?;
                self.publish_steps();
                return Err(e);
            }
        }

        self.publish_steps();
        self.publish_stats();
        Ok(())
    }

    /// Fail the session and restore the backup, if one was taken.
    async fn abort(&self, message: String) {
        let backup = self
            .with_session(|s| {
                s.fail(&message);
                s.backup.clone()
            })
            .ok()
            .flatten();
        self.publish_steps();
        self.publish_state(RecoveryState::Failed, &message);
        self.notify(EventLevel::Error, "Recovery", &message);

        if let Some(dir) = backup {
            match self.inner.backups.restore(&dir).await {
                Ok(files) => self.log(
                    EventLevel::Warning,
                    format!("Restored {} file(s) from {}", files.len(), dir.display()),
                ),
                Err(e) => {
                    error!(backup = %dir.display(), error = %e, "restore failed");
                    self.log(EventLevel::Error, format!("Restore failed: {}", e.summary()));
                }
            }
        }
    }

    /// Audit, metrics and the final state broadcast.
    async fn finish(&self) {
        let Some(session) = self.session() else {
            return;
        };
        RecoveryMetrics::session_finished(
            session.state.as_str(),
            Duration::from_millis(session.stats.elapsed_time),
        );
        info!(
            session_id = %session.id,
            state = %session.state,
            errors_found = session.stats.errors_found,
            errors_fixed = session.stats.errors_fixed,
            warnings = session.warnings.len(),
            "recovery session finished"
        );
        self.publish_stats();

        // Fixed errors are no longer candidates for fix_error.
        let fixed: Vec<&str> = session
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| s.error_id.as_str())
            .collect();
        self.inner
            .last_diagnostics
            .write()
            .retain(|e| !fixed.contains(&e.id.as_str()));

        if self.inner.bindings.db.is_configured() {
            let record = SessionRecord {
                id: session.id,
                state: session.state.as_str().to_string(),
                test_mode: session.test_mode,
                started_at: session.started_at,
                finished_at: session.finished_at,
                errors_found: session.stats.errors_found as i32,
                errors_fixed: session.stats.errors_fixed as i32,
                message: Some(session.message.clone()),
                warnings: serde_json::json!(session.warnings),
                stats: serde_json::to_value(session.stats).unwrap_or_default(),
            };
            if let Err(e) = self.inner.bindings.db.record_session(&record).await {
                debug!(error = %e, "session audit not recorded");
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Out-of-band Fix
    // ─────────────────────────────────────────────────────────────────────────

    /// Remediate a single error from the latest diagnostics.
    pub async fn fix_error(&self, error_id: &str) -> Result<RecoveryStep> {
        let _guard = self.claim()?;

        if self.inner.last_diagnostics.read().is_empty() {
            let diagnostics = self.inner.engine.run(self.test_mode()).await;
            *self.inner.last_diagnostics.write() = diagnostics;
        }
        let error = self
            .inner
            .last_diagnostics
            .read()
            .iter()
            .find(|e| e.id == error_id)
            .cloned()
            .ok_or_else(|| GuardError::diagnostic_not_found(error_id))?;

        let mut step = Remediator::plan(0, &error);
        step.start()?;
        self.log(EventLevel::Info, format!("Fixing {}: {}", error.id, step.title));

        let this = self.clone();
        let task_error = error.clone();
        let outcome = tokio::spawn(async move {
            let progress = |_: u8| {};
            this.inner.remediator.execute(&task_error, &progress).await
        })
        .await
        .map_err(|e| GuardError::catastrophic(format!("fix task failed: {}", e)))?;
        RecoveryMetrics::remediation(error.remediation_action.as_str(), outcome.is_ok());

        match outcome {
            Ok(message) => {
                step.complete()?;
                self.inner.last_diagnostics.write().retain(|e| e.id != error.id);
                self.log(EventLevel::Success, &message);
                self.notify(EventLevel::Success, "Fix", message);
            }
            Err(e) if e.is_remediation_failure() => {
                step.fail(e.summary())?;
                self.log(EventLevel::Error, format!("Fix for {} failed: {}", error.id, e.summary()));
            }
            Err(e) => return Err(e),
        }

        let fleet = self.fleet().await;
        self.inner
            .events
            .publish(RecoveryEvent::stats_update(fleet));
        Ok(step)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn with_session<R>(&self, f: impl FnOnce(&mut RecoverySession) -> R) -> Result<R> {
        let mut slot = self.inner.session.write();
        let session = slot
            .as_mut()
            .ok_or_else(|| GuardError::internal("no recovery session"))?;
        Ok(f(session))
    }

    fn transition(&self, next: RecoveryState, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.with_session(|s| s.transition(next, message.clone()))??;
        info!(state = %next, message = %message, "recovery state changed");
        self.publish_state(next, &message);
        Ok(())
    }

    async fn fleet(&self) -> crate::diagnostics::FleetStatus {
        fleet_status(
            self.inner.bindings.prober.as_ref(),
            &self.inner.registry,
            &self.inner.critical_ports,
        )
        .await
    }

    fn publish_state(&self, state: RecoveryState, message: &str) {
        self.inner
            .events
            .publish(RecoveryEvent::state_change(state, message));
    }

    fn publish_steps(&self) {
        if let Ok(steps) = self.with_session(|s| s.steps.clone()) {
            self.inner.events.publish(RecoveryEvent::recovery_update(steps));
        }
    }

    fn publish_stats(&self) {
        if let Ok(stats) = self.with_session(|s| {
            s.refresh_timing();
            s.stats
        }) {
            self.inner.events.publish(RecoveryEvent::stats_update(stats));
        }
    }

    /// Log through tracing and mirror the line onto the event stream.
    fn log(&self, level: EventLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            EventLevel::Info | EventLevel::Success => info!("{}", message),
            EventLevel::Warning => warn!("{}", message),
            EventLevel::Error => error!("{}", message),
        }
        self.inner.events.publish(RecoveryEvent::log(level, message));
    }

    fn notify(&self, level: EventLevel, title: &str, message: impl Into<String>) {
        self.inner
            .events
            .publish(RecoveryEvent::notification(level, title, message));
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("active", &self.is_active())
            .field("test_mode", &self.test_mode())
            .field("engine", &self.inner.engine)
            .finish()
    }
}
