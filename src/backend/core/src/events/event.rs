//! Event names and payload builders.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Name of an event on the stream; used as the SSE `event:` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventName {
    Connected,
    StateChange,
    DiagnosticsUpdate,
    RecoveryUpdate,
    StatsUpdate,
    Log,
    Notification,
    BackupUpdate,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::StateChange => "state-change",
            Self::DiagnosticsUpdate => "diagnostics-update",
            Self::RecoveryUpdate => "recovery-update",
            Self::StatsUpdate => "stats-update",
            Self::Log => "log",
            Self::Notification => "notification",
            Self::BackupUpdate => "backup-update",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log level carried by `log` and `notification` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A published event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryEvent {
    /// Publish sequence number, strictly increasing.
    pub seq: u64,
    pub name: EventName,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl RecoveryEvent {
    pub fn new(name: EventName, payload: Value) -> Self {
        Self {
            seq: 0,
            name,
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn connected() -> Self {
        Self::new(EventName::Connected, json!({ "status": "connected" }))
    }

    pub fn state_change(state: impl Serialize, message: &str) -> Self {
        Self::new(
            EventName::StateChange,
            json!({ "state": state, "message": message }),
        )
    }

    pub fn diagnostics_update(diagnostics: impl Serialize) -> Self {
        Self::new(EventName::DiagnosticsUpdate, json!({ "diagnostics": diagnostics }))
    }

    pub fn recovery_update(steps: impl Serialize) -> Self {
        Self::new(EventName::RecoveryUpdate, json!({ "recoverySteps": steps }))
    }

    pub fn stats_update(stats: impl Serialize) -> Self {
        Self::new(EventName::StatsUpdate, json!({ "stats": stats }))
    }

    pub fn log(level: EventLevel, message: impl Into<String>) -> Self {
        Self::new(
            EventName::Log,
            json!({ "level": level, "message": message.into() }),
        )
    }

    pub fn notification(level: EventLevel, title: &str, message: impl Into<String>) -> Self {
        Self::new(
            EventName::Notification,
            json!({ "level": level, "title": title, "message": message.into() }),
        )
    }

    pub fn backup_update(backup: impl Serialize) -> Self {
        Self::new(EventName::BackupUpdate, json!({ "backup": backup }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(EventName::StateChange.as_str(), "state-change");
        assert_eq!(
            serde_json::to_value(EventName::DiagnosticsUpdate).unwrap(),
            "diagnostics-update"
        );
    }

    #[test]
    fn test_log_payload() {
        let event = RecoveryEvent::log(EventLevel::Warning, "port 3001 still bound");
        assert_eq!(event.name, EventName::Log);
        assert_eq!(event.payload["level"], "warning");
        assert_eq!(event.payload["message"], "port 3001 still bound");
    }
}
