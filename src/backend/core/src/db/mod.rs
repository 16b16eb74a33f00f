//! Database layer for Portguard.
//!
//! The database is a monitored dependency: diagnostics ping it, remediation
//! reapplies the embedded schema, and finished sessions are written to the
//! `recovery_sessions` audit table when it is reachable.

mod postgres;
mod simulated;

pub use postgres::PgDatabase;
pub use simulated::{SimulatedDatabase, SimulatedDbState};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;

/// Summary row written once a session finishes.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub state: String,
    pub test_mode: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub errors_found: i32,
    pub errors_fixed: i32,
    pub message: Option<String>,
    pub warnings: serde_json::Value,
    pub stats: serde_json::Value,
}

/// Connectivity, schema and audit operations against the monitored database.
#[async_trait]
pub trait DatabaseConnector: Send + Sync {
    /// Whether a connection string was supplied at all.
    fn is_configured(&self) -> bool;

    /// Trivial round-trip (`SELECT 1`).
    async fn ping(&self) -> Result<()>;

    /// Apply the embedded schema migrations.
    async fn migrate(&self) -> Result<()>;

    /// Persist a finished session summary.
    async fn record_session(&self, record: &SessionRecord) -> Result<()>;
}
