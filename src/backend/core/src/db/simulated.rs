use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{DatabaseConnector, SessionRecord};
use crate::error::{ErrorCode, GuardError, Result};

/// Behaviour of a [`SimulatedDatabase`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatedDbState {
    Healthy,
    /// Pings fail until a migration runs.
    SchemaMissing,
    /// Every call fails with a connection error.
    Unreachable,
    /// No connection string.
    Unconfigured,
}

#[derive(Debug)]
struct Inner {
    state: SimulatedDbState,
    migrations: usize,
    records: Vec<SessionRecord>,
}

/// In-memory database double for tests and `--simulate` runs.
#[derive(Debug, Clone)]
pub struct SimulatedDatabase {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedDatabase {
    pub fn new(state: SimulatedDbState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state,
                migrations: 0,
                records: Vec::new(),
            })),
        }
    }

    pub fn healthy() -> Self {
        Self::new(SimulatedDbState::Healthy)
    }

    pub fn set_state(&self, state: SimulatedDbState) {
        self.inner.lock().state = state;
    }

    pub fn migrations(&self) -> usize {
        self.inner.lock().migrations
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.inner.lock().records.clone()
    }

    fn check(state: SimulatedDbState) -> Result<()> {
        match state {
            SimulatedDbState::Healthy => Ok(()),
            SimulatedDbState::SchemaMissing => Err(GuardError::with_internal(
                ErrorCode::DatabaseError,
                "A database error occurred",
                "relation \"recovery_sessions\" does not exist",
            )),
            SimulatedDbState::Unreachable => Err(GuardError::with_internal(
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
                "connection refused",
            )),
            SimulatedDbState::Unconfigured => Err(GuardError::database_not_configured()),
        }
    }
}

#[async_trait]
impl DatabaseConnector for SimulatedDatabase {
    fn is_configured(&self) -> bool {
        self.inner.lock().state != SimulatedDbState::Unconfigured
    }

    async fn ping(&self) -> Result<()> {
        Self::check(self.inner.lock().state)
    }

    async fn migrate(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            SimulatedDbState::Healthy | SimulatedDbState::SchemaMissing => {
                inner.migrations += 1;
                inner.state = SimulatedDbState::Healthy;
                Ok(())
            }
            state => Self::check(state),
        }
    }

    async fn record_session(&self, record: &SessionRecord) -> Result<()> {
        let mut inner = self.inner.lock();
        Self::check(inner.state)?;
        inner.records.retain(|r| r.id != record.id);
        inner.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migration_heals_missing_schema() {
        let db = SimulatedDatabase::new(SimulatedDbState::SchemaMissing);
        assert!(db.ping().await.is_err());
        db.migrate().await.unwrap();
        assert!(db.ping().await.is_ok());
        assert_eq!(db.migrations(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_never_heals() {
        let db = SimulatedDatabase::new(SimulatedDbState::Unconfigured);
        assert!(!db.is_configured());
        let err = db.migrate().await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::DatabaseNotConfigured);
        assert!(db.ping().await.is_err());
    }
}
