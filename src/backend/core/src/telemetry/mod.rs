//! Telemetry: logging and metrics.
//!
//! - **Logging**: structured stderr output plus a daily `[<ts>] [<LEVEL>] <msg>` file
//! - **Metrics**: Prometheus counters for sessions, diagnostics and remediation

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, DailyLineFormat, LogFormat, LoggingConfig, LoggingGuard};
pub use metrics::{init_metrics, RecoveryMetrics};

/// Handle for the telemetry stack; drop it last.
pub struct TelemetryHandle {
    _logging: LoggingGuard,
}

/// Initialize logging and the metrics recorder.
///
/// Should be called once at application startup.
pub fn init_telemetry(config: &LoggingConfig) -> anyhow::Result<TelemetryHandle> {
    // Metrics first so errors raised during startup are counted
    init_metrics()?;
    let logging = init_logging(config)?;

    Ok(TelemetryHandle { _logging: logging })
}
