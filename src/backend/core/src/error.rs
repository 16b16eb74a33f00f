//! Error handling for Portguard Core.
//!
//! This module provides:
//! - A single error type carrying a stable [`ErrorCode`], a user-facing message,
//!   an optional internal message and structured details
//! - HTTP status code mapping for the control-plane API
//! - Severity classification used for logging
//! - Metrics integration for error tracking
//!
//! # Usage
//!
//! ```rust,ignore
//! use portguard_core::error::{ErrorContext, Result};
//!
//! fn read_manifest(path: &Path) -> Result<String> {
//!     std::fs::read_to_string(path).context("Failed to read backup manifest")
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Portguard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Probe Errors (1000-1099)
    PortProbeFailed,
    CheckTimedOut,

    // Remediation Errors (1100-1199)
    RemediationFailed,
    PortReleaseFailed,
    ProcessLaunchFailed,
    LaunchCommandInvalid,

    // Session Errors (1200-1299)
    SessionConflict,
    CatastrophicFailure,
    InvalidStateTransition,

    // Lookup Errors (1300-1399)
    DiagnosticNotFound,
    RecordNotFound,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseConnectionFailed,
    DatabaseNotConfigured,
    MigrationFailed,

    // Backup Errors (2100-2199)
    BackupFailed,
    RestoreFailed,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Validation Errors (4100-4199)
    ValidationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    IoError,
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::PortProbeFailed => 1000,
            Self::CheckTimedOut => 1001,

            Self::RemediationFailed => 1100,
            Self::PortReleaseFailed => 1101,
            Self::ProcessLaunchFailed => 1102,
            Self::LaunchCommandInvalid => 1103,

            Self::SessionConflict => 1200,
            Self::CatastrophicFailure => 1201,
            Self::InvalidStateTransition => 1202,

            Self::DiagnosticNotFound => 1300,
            Self::RecordNotFound => 1301,

            Self::DatabaseError => 2000,
            Self::DatabaseConnectionFailed => 2001,
            Self::DatabaseNotConfigured => 2002,
            Self::MigrationFailed => 2003,

            Self::BackupFailed => 2100,
            Self::RestoreFailed => 2101,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::IoError => 9000,
            Self::InternalError => 9001,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::DiagnosticNotFound | Self::RecordNotFound => StatusCode::NOT_FOUND,

            // Conflict (409)
            Self::SessionConflict | Self::InvalidStateTransition => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::ValidationError | Self::LaunchCommandInvalid => {
                StatusCode::UNPROCESSABLE_ENTITY
            }

            // Timeout (504)
            Self::CheckTimedOut => StatusCode::GATEWAY_TIMEOUT,

            // Service Unavailable (503)
            Self::DatabaseConnectionFailed | Self::DatabaseNotConfigured => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // Bad Gateway (502): the managed fleet misbehaved, not us
            Self::RemediationFailed
            | Self::PortReleaseFailed
            | Self::ProcessLaunchFailed
            | Self::PortProbeFailed => StatusCode::BAD_GATEWAY,

            // Internal Server Error (500)
            Self::CatastrophicFailure
            | Self::DatabaseError
            | Self::MigrationFailed
            | Self::BackupFailed
            | Self::RestoreFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::IoError
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether this code describes a failed remediation action.
    ///
    /// Remediation failures are recorded on the recovery step and never abort
    /// the session.
    pub const fn is_remediation_failure(&self) -> bool {
        matches!(
            self,
            Self::RemediationFailed
                | Self::PortReleaseFailed
                | Self::ProcessLaunchFailed
                | Self::LaunchCommandInvalid
                | Self::DatabaseError
                | Self::DatabaseConnectionFailed
                | Self::DatabaseNotConfigured
                | Self::MigrationFailed
                | Self::PortProbeFailed
                | Self::CheckTimedOut
        )
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "probe",
            1100..=1199 => "remediation",
            1200..=1299 => "session",
            1300..=1399 => "lookup",
            2000..=2099 => "database",
            2100..=2199 => "backup",
            2200..=2299 => "serialization",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, unknown ids)
    Low,
    /// Operational issues (a managed service misbehaving)
    Medium,
    /// System errors (database, backups, configuration)
    High,
    /// Session-level failures requiring attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::DiagnosticNotFound
            | ErrorCode::RecordNotFound
            | ErrorCode::SessionConflict
            | ErrorCode::InvalidStateTransition => Self::Low,

            ErrorCode::PortProbeFailed
            | ErrorCode::CheckTimedOut
            | ErrorCode::RemediationFailed
            | ErrorCode::PortReleaseFailed
            | ErrorCode::ProcessLaunchFailed
            | ErrorCode::LaunchCommandInvalid
            | ErrorCode::DatabaseNotConfigured => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseConnectionFailed
            | ErrorCode::MigrationFailed
            | ErrorCode::BackupFailed
            | ErrorCode::RestoreFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration
            | ErrorCode::IoError => Self::High,

            ErrorCode::CatastrophicFailure | ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Related entity ID (error id, service name, port)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,

    /// Suggested action for resolution
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggested_action = Some(suggestion.into());
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.entity_id.is_none()
            && self.suggested_action.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Portguard Core.
#[derive(Error, Debug)]
pub struct GuardError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for GuardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl GuardError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    /// Whether this error is a recorded-on-step remediation failure.
    pub fn is_remediation_failure(&self) -> bool {
        self.code.is_remediation_failure()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// One-line description suitable for step failure reasons and log events.
    pub fn summary(&self) -> String {
        match &self.internal_message {
            Some(internal) => format!("{}: {}", self.user_message, internal),
            None => self.user_message.to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "portguard_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,

    pub numeric_code: u32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,

    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&GuardError> for ErrorResponse {
    fn from(error: &GuardError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let message = message.into();
            GuardError::with_internal(ErrorCode::InternalError, message, e.to_string())
                .with_source(e)
        })
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| GuardError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| GuardError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| GuardError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for GuardError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => (
                ErrorCode::DatabaseConnectionFailed,
                "Unable to connect to the database",
            ),
            sqlx::Error::Migrate(_) => (ErrorCode::MigrationFailed, "Schema migration failed"),
            sqlx::Error::Configuration(_) => (
                ErrorCode::InvalidConfiguration,
                "Database connection string is invalid",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<sqlx::migrate::MigrateError> for GuardError {
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::with_internal(
            ErrorCode::MigrationFailed,
            "Schema migration failed",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<serde_json::Error> for GuardError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for GuardError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(ErrorCode::CheckTimedOut, "Operation timed out", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for GuardError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::RecordNotFound, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::CheckTimedOut, "Operation timed out"),
            _ => (ErrorCode::IoError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for GuardError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<GuardError>() {
            Ok(guard_error) => guard_error,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for GuardError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl GuardError {
    /// The state of a port could not be determined.
    pub fn port_probe_failed(port: u16, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PortProbeFailed,
            format!("Could not determine state of port {}", port),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("port", port.to_string()))
    }

    /// A remediation action did not achieve its goal.
    pub fn remediation_failed(action: impl Into<String>, reason: impl Into<String>) -> Self {
        let action = action.into();
        Self::with_internal(
            ErrorCode::RemediationFailed,
            format!("Remediation '{}' failed", action),
            reason,
        )
        .with_context("action", &action)
    }

    /// A process holding a port could not be terminated.
    pub fn port_release_failed(port: u16, reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::PortReleaseFailed,
            format!("Failed to release port {}", port),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("port", port.to_string()))
    }

    /// A service process could not be spawned.
    pub fn launch_failed(service: impl Into<String>, reason: impl Into<String>) -> Self {
        let service = service.into();
        Self::with_internal(
            ErrorCode::ProcessLaunchFailed,
            format!("Failed to launch service '{}'", service),
            reason,
        )
        .with_details(ErrorDetails::new().with_entity("service", &service))
    }

    /// A recovery session is already running.
    pub fn session_conflict() -> Self {
        Self::new(ErrorCode::SessionConflict, "Recovery already in progress").with_details(
            ErrorDetails::new().with_suggestion("Wait for the running session to finish"),
        )
    }

    /// The recovery session hit an unexpected failure.
    pub fn catastrophic(reason: impl Into<String>) -> Self {
        Self::with_internal(
            ErrorCode::CatastrophicFailure,
            "Recovery session failed unexpectedly",
            reason,
        )
    }

    /// No diagnostic error with the given id exists.
    pub fn diagnostic_not_found(error_id: impl Into<String>) -> Self {
        let error_id = error_id.into();
        Self::new(
            ErrorCode::DiagnosticNotFound,
            format!("Diagnostic error not found: {}", error_id),
        )
        .with_details(ErrorDetails::new().with_entity("diagnostic", &error_id))
    }

    /// No database connection string was configured.
    pub fn database_not_configured() -> Self {
        Self::new(
            ErrorCode::DatabaseNotConfigured,
            "No database connection string configured",
        )
        .with_details(
            ErrorDetails::new().with_suggestion("Set database.url or PORTGUARD__DATABASE__URL"),
        )
    }

    /// A state machine transition was rejected.
    pub fn invalid_state_transition(from: impl fmt::Debug, to: impl fmt::Debug) -> Self {
        Self::new(
            ErrorCode::InvalidStateTransition,
            format!("Invalid state transition: {:?} -> {:?}", from, to),
        )
        .with_context("from_state", format!("{:?}", from))
        .with_context("to_state", format!("{:?}", to))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::SessionConflict.http_status(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::DiagnosticNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ErrorCode::CatastrophicFailure.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_remediation_failure_classification() {
        assert!(ErrorCode::PortReleaseFailed.is_remediation_failure());
        assert!(ErrorCode::ProcessLaunchFailed.is_remediation_failure());
        assert!(ErrorCode::DatabaseNotConfigured.is_remediation_failure());
        assert!(ErrorCode::DatabaseError.is_remediation_failure());
        assert!(!ErrorCode::CatastrophicFailure.is_remediation_failure());
        assert!(!ErrorCode::InternalError.is_remediation_failure());
    }

    #[test]
    fn test_error_category() {
        assert_eq!(ErrorCode::PortProbeFailed.category(), "probe");
        assert_eq!(ErrorCode::SessionConflict.category(), "session");
        assert_eq!(ErrorCode::BackupFailed.category(), "backup");
        assert_eq!(ErrorCode::InternalError.category(), "internal");
    }

    #[test]
    fn test_session_conflict() {
        let error = GuardError::session_conflict();
        assert_eq!(error.code(), ErrorCode::SessionConflict);
        assert_eq!(error.http_status(), StatusCode::CONFLICT);
        assert_eq!(error.user_message(), "Recovery already in progress");
        assert!(error.details().suggested_action.is_some());
    }

    #[test]
    fn test_error_context_on_result() {
        let result: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::Other,
            "disk on fire",
        ));
        let error = result.context("Failed to copy file").unwrap_err();
        assert_eq!(error.code(), ErrorCode::InternalError);
        assert_eq!(error.user_message(), "Failed to copy file");
        assert_eq!(error.internal_message(), Some("disk on fire"));
    }

    #[test]
    fn test_error_context_on_option() {
        let value: Option<u32> = None;
        let error = value.with_error_code(ErrorCode::RecordNotFound).unwrap_err();
        assert_eq!(error.code(), ErrorCode::RecordNotFound);
    }

    #[tokio::test]
    async fn test_elapsed_timeout_maps_to_check_timed_out() {
        let elapsed = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            std::future::pending::<()>(),
        )
        .await
        .unwrap_err();
        let error = GuardError::from(elapsed);
        assert_eq!(error.code(), ErrorCode::CheckTimedOut);
        assert_eq!(error.http_status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(error.is_remediation_failure());
    }

    #[test]
    fn test_summary_includes_internal_message() {
        let error = GuardError::port_release_failed(3001, "EPERM");
        assert_eq!(error.summary(), "Failed to release port 3001: EPERM");
        assert_eq!(error.details().entity_id.as_deref(), Some("3001"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let error: GuardError = io.into();
        assert_eq!(error.code(), ErrorCode::RecordNotFound);
    }

    #[test]
    fn test_error_response_serialization() {
        let error = GuardError::diagnostic_not_found("port-conflict-3001");
        let response = ErrorResponse::from(&error);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "DIAGNOSTIC_NOT_FOUND");
        assert_eq!(json["error"]["numericCode"], 1300);
        assert_eq!(json["error"]["details"]["entity_id"], "port-conflict-3001");
    }

    #[test]
    fn test_display_format() {
        let error = GuardError::with_internal(ErrorCode::BackupFailed, "Backup failed", "ENOSPC");
        assert_eq!(format!("{}", error), "[BackupFailed] Backup failed (internal: ENOSPC)");
    }
}
