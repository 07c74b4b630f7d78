/// Hook verdicts
///
/// A hook either lets the operation proceed or vetoes it with the exception
/// the host runtime should raise at the call site.
use crate::config::types::{AuditError, ExceptionKind, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an operation was vetoed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DenyReason {
    pub kind: ExceptionKind,
    pub message: String,
}

impl DenyReason {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// A hook that fails or panics vetoes the operation
    pub fn hook_failure(detail: impl fmt::Display) -> Self {
        Self::new(
            ExceptionKind::SystemError,
            format!("audit hook failed: {detail}"),
        )
    }

    /// Event payload did not match its declared schema
    pub fn malformed(err: &AuditError) -> Self {
        Self::new(ExceptionKind::SystemError, err.to_string())
    }
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Deny(DenyReason),
}

impl Verdict {
    pub fn deny(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Verdict::Deny(DenyReason::new(kind, message))
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn is_deny(&self) -> bool {
        !self.is_allow()
    }

    pub fn into_result(self) -> Result<()> {
        match self {
            Verdict::Allow => Ok(()),
            Verdict::Deny(reason) => Err(AuditError::Denied(reason)),
        }
    }
}
