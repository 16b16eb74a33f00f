//! Recovery session model: state machine, steps and stats.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::verification::VerificationReport;
use crate::diagnostics::{DiagnosticError, FleetStatus};
use crate::error::{GuardError, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Session State
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryState {
    #[default]
    Idle,
    Diagnosing,
    Recovering,
    Verifying,
    Completed,
    Failed,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Diagnosing => "diagnosing",
            Self::Recovering => "recovering",
            Self::Verifying => "verifying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// A session in this state holds the session slot.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Diagnosing | Self::Recovering | Self::Verifying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: RecoveryState) -> bool {
        use RecoveryState::*;
        matches!(
            (self, next),
            (Idle | Completed | Failed, Diagnosing)
                | (Diagnosing, Completed | Recovering | Failed)
                | (Recovering, Verifying | Failed)
                | (Verifying, Completed | Failed)
        )
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Recovery Step
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl StepStatus {
    /// Forward-only: pending -> in-progress -> completed | failed.
    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress) | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One remediation action, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStep {
    pub id: String,
    pub title: String,
    pub description: String,
    pub error_id: String,
    pub status: StepStatus,
    /// 0-100, never decreases.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RecoveryStep {
    pub fn new(
        index: usize,
        error_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: format!("step-{}", index + 1),
            title: title.into(),
            description: description.into(),
            error_id: error_id.into(),
            status: StepStatus::Pending,
            progress: 0,
            failure_reason: None,
            started_at: None,
            finished_at: None,
        }
    }

    fn move_to(&mut self, next: StepStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(GuardError::invalid_state_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.move_to(StepStatus::InProgress)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Raise progress; lower values are ignored.
    pub fn advance(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
    }

    pub fn complete(&mut self) -> Result<()> {
        self.move_to(StepStatus::Completed)?;
        self.advance(100);
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<()> {
        self.move_to(StepStatus::Failed)?;
        self.failure_reason = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Stats
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub services_online: usize,
    pub total_services: usize,
    pub port_conflicts: usize,
    /// Milliseconds since the session started.
    pub elapsed_time: u64,
    /// Overall progress, 0-100.
    pub progress: u8,
    pub errors_found: usize,
    pub errors_fixed: usize,
}

impl RecoveryStats {
    pub fn apply_fleet(&mut self, fleet: FleetStatus) {
        self.services_online = fleet.services_online;
        self.total_services = fleet.total_services;
        self.port_conflicts = fleet.port_conflicts;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Session
// ═══════════════════════════════════════════════════════════════════════════════

/// One invocation of "start recovery".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySession {
    pub id: Uuid,
    pub state: RecoveryState,
    pub test_mode: bool,
    pub message: String,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub diagnostics: Vec<DiagnosticError>,
    pub steps: Vec<RecoveryStep>,
    pub stats: RecoveryStats,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<PathBuf>,
}

impl RecoverySession {
    /// A fresh session, already in `diagnosing`.
    pub fn begin(test_mode: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RecoveryState::Diagnosing,
            test_mode,
            message: "Running diagnostics".to_string(),
            started_at: Utc::now(),
            finished_at: None,
            diagnostics: Vec::new(),
            steps: Vec::new(),
            stats: RecoveryStats::default(),
            warnings: Vec::new(),
            verification: None,
            backup: None,
        }
    }

    pub fn transition(&mut self, next: RecoveryState, message: impl Into<String>) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(GuardError::invalid_state_transition(self.state, next));
        }
        self.state = next;
        self.message = message.into();
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        self.refresh_timing();
        Ok(())
    }

    /// Force the session into `failed`, from any non-terminal state.
    /// A step still in progress fails with the same message; pending steps
    /// were never attempted and stay pending.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        for step in &mut self.steps {
            if step.status == StepStatus::InProgress {
                let _ = step.fail(message.clone());
            }
        }
        self.state = RecoveryState::Failed;
        self.message = message;
        self.finished_at = Some(Utc::now());
        self.refresh_timing();
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut RecoveryStep> {
        self.steps.get_mut(index)
    }

    /// Recompute elapsed time and overall progress.
    pub fn refresh_timing(&mut self) {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        self.stats.elapsed_time = (end - self.started_at).num_milliseconds().max(0) as u64;
        self.stats.errors_found = self.diagnostics.len();
        self.stats.errors_fixed = self
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count();
        self.stats.progress = self.overall_progress();
    }

    fn overall_progress(&self) -> u8 {
        match self.state {
            RecoveryState::Idle => 0,
            RecoveryState::Completed | RecoveryState::Failed => 100,
            _ if self.steps.is_empty() => 0,
            _ => {
                let total: u32 = self.steps.iter().map(|s| s.progress as u32).sum();
                (total / self.steps.len() as u32) as u8
            }
        }
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_state_machine_transitions() {
        use RecoveryState::*;
        assert!(Idle.can_transition_to(Diagnosing));
        assert!(Diagnosing.can_transition_to(Completed));
        assert!(Diagnosing.can_transition_to(Recovering));
        assert!(Recovering.can_transition_to(Verifying));
        assert!(Verifying.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Diagnosing));
        assert!(!Recovering.can_transition_to(Completed));
        assert!(!Verifying.can_transition_to(Recovering));
        assert!(!Idle.can_transition_to(Completed));
    }

    #[test]
    fn test_session_rejects_invalid_transition() {
        let mut session = RecoverySession::begin(false);
        let err = session
            .transition(RecoveryState::Verifying, "skip")
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidStateTransition);
        assert_eq!(session.state, RecoveryState::Diagnosing);
    }

    #[test]
    fn test_step_status_is_monotonic() {
        let mut step = RecoveryStep::new(0, "port-conflict-3001", "Release port 3001", "");
        assert!(step.complete().is_err());
        assert_eq!(step.status, StepStatus::Pending);

        let mut step = RecoveryStep::new(0, "port-conflict-3001", "Release port 3001", "");
        step.start().unwrap();
        assert!(step.start().is_err());
        step.fail("still bound").unwrap();
        assert!(step.complete().is_err());
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.failure_reason.as_deref(), Some("still bound"));
    }

    #[test]
    fn test_step_progress_never_decreases() {
        let mut step = RecoveryStep::new(2, "service-down-api", "Restart api", "");
        assert_eq!(step.id, "step-3");
        step.advance(40);
        step.advance(10);
        assert_eq!(step.progress, 40);
        step.advance(250);
        assert_eq!(step.progress, 100);
    }

    #[test]
    fn test_overall_progress_and_counts() {
        let mut session = RecoverySession::begin(false);
        session.diagnostics = vec![
            DiagnosticError::database("down"),
            DiagnosticError::port_conflict(3001, true),
        ];
        session.steps = vec![
            RecoveryStep::new(0, "database-error", "a", ""),
            RecoveryStep::new(1, "port-conflict-3001", "b", ""),
        ];
        session.transition(RecoveryState::Recovering, "Recovering").unwrap();
        session.steps[0].start().unwrap();
        session.steps[0].complete().unwrap();
        session.refresh_timing();

        assert_eq!(session.stats.progress, 50);
        assert_eq!(session.stats.errors_found, 2);
        assert_eq!(session.stats.errors_fixed, 1);
    }

    #[test]
    fn test_forced_failure_closes_running_step() {
        let mut session = RecoverySession::begin(false);
        session.steps = vec![
            RecoveryStep::new(0, "service-down-api", "Restart api", ""),
            RecoveryStep::new(1, "service-down-web", "Restart web", ""),
        ];
        session.transition(RecoveryState::Recovering, "Recovering").unwrap();
        session.steps[0].start().unwrap();

        session.fail("remediation panicked");

        assert_eq!(session.state, RecoveryState::Failed);
        assert_eq!(session.steps[0].status, StepStatus::Failed);
        assert_eq!(session.steps[0].failure_reason.as_deref(), Some("remediation panicked"));
        assert!(session.steps[0].finished_at.is_some());
        assert_eq!(session.steps[1].status, StepStatus::Pending);
    }

    #[test]
    fn test_session_serializes_camel_case() {
        let session = RecoverySession::begin(true);
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["state"], "diagnosing");
        assert_eq!(json["testMode"], true);
        assert!(json["stats"]["servicesOnline"].is_number());
        assert!(json.get("finishedAt").is_none());
    }
}
