//! Host runtime seam
//!
//! The managed runtime is an external collaborator. The launcher drives it
//! through `ScriptHost`, and the runtime reaches back into the audit layer
//! only through `RuntimeServices`: raising events, opening import sources
//! through the gate, and asking for new hooks.

pub mod scripted;

pub use scripted::ScriptedHost;

use crate::config::launcher::HardeningFlags;
use crate::config::types::{AuditError, ExceptionKind, Result};
use crate::dispatch::registry::HookRegistration;
use crate::dispatch::Dispatcher;
use crate::events::value::Value;
use crate::gate::{ImportGate, ImportSource};
use std::cell::Cell;
use std::io::BufRead;
use std::path::Path;
use std::rc::Rc;

/// Whether runtime start-up has completed. Shared between the launcher,
/// which sets it once, and the policies that consult it.
#[derive(Clone, Debug, Default)]
pub struct RuntimeState {
    initialized: Rc<Cell<bool>>,
}

impl RuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_initialized(&self) {
        self.initialized.set(true);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }
}

/// Settings applied to the runtime before it initializes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    pub program_name: String,
    pub hardening: HardeningFlags,
}

/// Audit services handed to the runtime for the duration of one call
pub struct RuntimeServices<'a> {
    dispatcher: &'a mut Dispatcher,
    gate: ImportGate,
}

impl<'a> RuntimeServices<'a> {
    pub fn new(dispatcher: &'a mut Dispatcher, gate: ImportGate) -> Self {
        Self { dispatcher, gate }
    }

    /// Raise an event; a veto comes back as `AuditError::Denied`
    pub fn audit(&self, name: &str, args: Vec<Value>) -> Result<()> {
        self.dispatcher.raise(name, args).into_result()
    }

    pub fn open_for_import(&self, path: &Path) -> Result<ImportSource> {
        self.gate.open(&*self.dispatcher, path)
    }

    pub fn add_audit_hook(&mut self, registration: HookRegistration) -> Result<()> {
        self.dispatcher.register(registration)
    }
}

/// How a script run ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptOutcome {
    Completed,
    /// The script stopped on an error it did not handle
    Raised { kind: ExceptionKind, message: String },
}

impl ScriptOutcome {
    pub fn raised(err: &AuditError) -> Self {
        let (kind, message) = err.as_exception();
        ScriptOutcome::Raised { kind, message }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ScriptOutcome::Completed)
    }
}

/// A managed runtime the launcher can drive.
///
/// Errors returned from these methods are host failures. Errors raised by
/// the script itself, denials included, are reported as
/// `ScriptOutcome::Raised`.
pub trait ScriptHost {
    fn name(&self) -> &str;

    fn initialize(
        &mut self,
        config: &RuntimeConfig,
        services: &mut RuntimeServices<'_>,
    ) -> Result<()>;

    fn set_argv(&mut self, argv: &[String]);

    fn run_source(
        &mut self,
        source: ImportSource,
        services: &mut RuntimeServices<'_>,
    ) -> Result<ScriptOutcome>;

    /// Read and run statements until the stream ends
    fn interactive(
        &mut self,
        input: &mut dyn BufRead,
        services: &mut RuntimeServices<'_>,
    ) -> Result<ScriptOutcome>;

    fn finalize(&mut self, services: &mut RuntimeServices<'_>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::verdict::Verdict;

    #[test]
    fn test_runtime_state_is_shared() {
        let state = RuntimeState::new();
        let observer = state.clone();
        assert!(!observer.is_initialized());
        state.mark_initialized();
        assert!(observer.is_initialized());
    }

    #[test]
    fn test_services_surface_denials_as_errors() {
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(HookRegistration::from_fn("deny", |_| {
                Ok(Verdict::deny(ExceptionKind::RuntimeError, "no"))
            }))
            .unwrap();
        let services = RuntimeServices::new(&mut dispatcher, ImportGate::new());
        let err = services.audit("id", vec![Value::Int(1)]).unwrap_err();
        assert_eq!(
            ScriptOutcome::raised(&err),
            ScriptOutcome::Raised {
                kind: ExceptionKind::RuntimeError,
                message: "no".to_string()
            }
        );
    }
}
