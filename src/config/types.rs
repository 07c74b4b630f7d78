/// Core error and result types for auditbox
use crate::dispatch::verdict::DenyReason;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Exception class a failure is reported as inside the host runtime.
///
/// Denials never crash the process; the host surfaces them through its own
/// error channel using one of these classes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExceptionKind {
    RuntimeError,
    SystemError,
    ValueError,
    TypeError,
    OsError,
    ModuleNotFoundError,
    NameError,
    SyntaxError,
}

impl ExceptionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExceptionKind::RuntimeError => "RuntimeError",
            ExceptionKind::SystemError => "SystemError",
            ExceptionKind::ValueError => "ValueError",
            ExceptionKind::TypeError => "TypeError",
            ExceptionKind::OsError => "OSError",
            ExceptionKind::ModuleNotFoundError => "ModuleNotFoundError",
            ExceptionKind::NameError => "NameError",
            ExceptionKind::SyntaxError => "SyntaxError",
        }
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Custom error types for auditbox
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("failed to open log file: {}", .path.display())]
    LogUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit log is closed")]
    LogClosed,

    #[error("hook registry is locked{}", .veto.as_ref().map(|v| format!(" ({v})")).unwrap_or_default())]
    RegistryLocked { veto: Option<DenyReason> },

    #[error("{0}")]
    Denied(DenyReason),

    #[error("malformed arguments for {event}: {detail}")]
    Schema { event: String, detail: String },

    #[error("invalid format: {}", .path.display())]
    AccessDenied { path: PathBuf },

    #[error("Hook error: {0}")]
    Hook(String),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl AuditError {
    /// Exception class and message the host runtime raises for this failure
    pub fn as_exception(&self) -> (ExceptionKind, String) {
        match self {
            AuditError::Denied(reason) => (reason.kind, reason.message.clone()),
            AuditError::RegistryLocked { veto: Some(reason) } => {
                (reason.kind, reason.message.clone())
            }
            AuditError::RegistryLocked { veto: None } => (
                ExceptionKind::SystemError,
                "hook registry is locked".to_string(),
            ),
            AuditError::AccessDenied { .. } => {
                (ExceptionKind::OsError, "invalid format".to_string())
            }
            AuditError::Io(e) => (ExceptionKind::OsError, e.to_string()),
            AuditError::Schema { .. } => (ExceptionKind::SystemError, self.to_string()),
            other => (ExceptionKind::SystemError, other.to_string()),
        }
    }
}

/// Result type alias for auditbox operations
pub type Result<T> = std::result::Result<T, AuditError>;
