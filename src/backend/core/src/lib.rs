#![allow(clippy::result_large_err)]
//! # Portguard Core
//!
//! Local service health monitor and recovery orchestrator.
//!
//! ## Architecture
//!
//! - **Probe**: TCP port binding checks against loopback
//! - **Registry**: Static table of services, their ports and launch commands
//! - **Diagnostics**: Pluggable checks and test-mode fault injectors producing typed errors
//! - **Recovery**: Session state machine, remediation dispatch, backups and verification
//! - **Events**: Bounded fan-out of live updates, served over SSE
//! - **Process**: Detached launching and port release, with an in-memory simulator
//! - **Telemetry**: Structured logging, daily log files and Prometheus metrics

pub mod api;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod events;
pub mod probe;
pub mod process;
pub mod recovery;
pub mod registry;
pub mod telemetry;

pub use error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, GuardError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{Config, CriticalPort};
    pub use crate::db::{DatabaseConnector, PgDatabase, SimulatedDatabase, SimulatedDbState};
    pub use crate::diagnostics::{
        DiagnosticCheck, DiagnosticError, DiagnosticKind, DiagnosticsEngine, FaultInjector,
        RemediationAction, Severity,
    };
    pub use crate::error::{ErrorCode, ErrorContext, ErrorDetails, ErrorSeverity, GuardError, Result};
    pub use crate::events::{EventBroadcaster, EventLevel, EventName, RecoveryEvent};
    pub use crate::probe::{PortProber, TcpPortProber};
    pub use crate::process::{PortReleaser, ProcessLauncher, SimulatedHost};
    pub use crate::recovery::{
        HostBindings, RecoveryOrchestrator, RecoverySession, RecoveryState, RecoveryStep,
        StatusSnapshot, StepStatus,
    };
    pub use crate::registry::{ServiceDescriptor, ServiceRegistry, ServiceRole};
}
