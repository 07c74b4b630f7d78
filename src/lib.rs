//! auditbox: audit-event interception and policy enforcement for a managed runtime
//! Observes and vetoes sensitive runtime operations before they complete, and runs a single
//! untrusted script behind a fixed, locked set of policies
//!
//! # Architecture
//!
//! ## Events ([`events`])
//! - [`events::schema`]: Versioned event vocabulary and per-event argument schemas
//! - [`events::value`]: Runtime values carried by events, with `repr()`/`str()` rendering
//!
//! ## Event Dispatcher ([`dispatch`])
//! - [`dispatch::registry`]: Ordered, append-only hook registry with a one-way lock
//! - [`dispatch::verdict`]: Allow/deny verdicts and deny reasons
//!
//! ## Policy Hook Set ([`policy`])
//! - [`policy::rules`]: One decision procedure per audited operation
//! - [`policy::bytecode`]: Local-store bounds check for raw code strings
//!
//! ## Restricted Import Gate ([`gate`])
//! - Extension allow-list at open-for-import time
//!
//! ## Runtime seam ([`runtime`])
//! - [`runtime::ScriptHost`]: What the launcher needs from a managed runtime
//! - [`runtime::scripted`]: Reference line-oriented host
//!
//! ## Execution Control ([`exec`])
//! - [`exec::launcher`]: Type-state enforced launcher lifecycle
//!
//! ## Observability ([`observability`])
//! - [`observability::audit_log`]: Append-only audit log stream
//!
//! ## Configuration & Policy ([`config`])
//! - [`config::launcher`]: Launcher configuration and hardening flags
//! - [`config::policy`]: Enabled policy tags
//! - [`config::types`]: Shared error types
//!
//! # Design Principles
//!
//! 1. **Order is correctness** - Hooks run, and log, in registration order
//! 2. **Deny stops everything** - No hook after a veto runs
//! 3. **Locked means locked** - Late registrations are refused and audited
//! 4. **Types prevent errors** - Launcher steps cannot be skipped or reordered
//! 5. **No ambient globals** - The launcher owns the registry and the log

// Events
pub mod events;

// Event Dispatcher
pub mod dispatch;

// Policy Hook Set
pub mod policy;

// Restricted Import Gate
pub mod gate;

// Runtime seam
pub mod runtime;

// Execution Control
pub mod exec;

// Observability
pub mod observability;

// Configuration & Policy
pub mod config;

// CLI
pub mod cli;
