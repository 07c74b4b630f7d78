//! Observability
//!
//! The audit log stream policies write their decisions to. Diagnostic output
//! goes through the `log` facade instead and never lands in the audit log.

pub mod audit_log;

pub use audit_log::AuditLog;
