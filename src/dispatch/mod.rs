//! Event Dispatcher
//!
//! Owns the hook registry and delivers each raised event to every hook, in
//! registration order, synchronously on the calling thread. Delivery stops
//! at the first veto.

pub mod registry;
pub mod verdict;

pub use registry::{HookOutcome, HookRegistration, HookRegistry};
pub use verdict::{DenyReason, Verdict};

use crate::config::types::{AuditError, Result};
use crate::events::schema::AuditEvent;
use crate::events::value::Value;
use log::{debug, info, warn};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[derive(Debug, Default)]
pub struct Dispatcher {
    registry: HookRegistry,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.registry.is_locked()
    }

    /// Append a hook to the registry.
    ///
    /// Once the registry is locked the attempt itself is raised as
    /// `sys.addaudithook` to the hooks already present, so it shows up in the
    /// audit trail, and the registration fails with `RegistryLocked`.
    pub fn register(&mut self, registration: HookRegistration) -> Result<()> {
        if !self.registry.is_locked() {
            debug!("Registered audit hook '{}'", registration.label());
            self.registry.push(registration);
            return Ok(());
        }

        let veto = match self.deliver(&AuditEvent::AddHook) {
            Verdict::Allow => None,
            Verdict::Deny(reason) => Some(reason),
        };
        warn!(
            "Rejected late registration of audit hook '{}'",
            registration.label()
        );
        Err(AuditError::RegistryLocked { veto })
    }

    pub fn lock(&mut self) {
        if !self.registry.is_locked() {
            info!("Hook registry locked with {} hook(s)", self.registry.len());
        }
        self.registry.lock();
    }

    /// Raise a named event carrying a raw argument list
    pub fn raise(&self, name: &str, args: Vec<Value>) -> Verdict {
        if self.registry.is_empty() {
            return Verdict::Allow;
        }
        match AuditEvent::parse(name, args) {
            Ok(event) => self.deliver(&event),
            Err(err) => {
                warn!("Refusing event with malformed payload: {}", err);
                Verdict::Deny(DenyReason::malformed(&err))
            }
        }
    }

    /// Raise an event that is already typed
    pub fn raise_event(&self, event: &AuditEvent) -> Verdict {
        self.deliver(event)
    }

    fn deliver(&self, event: &AuditEvent) -> Verdict {
        for hook in self.registry.iter() {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| hook.call(event)));
            let verdict = match outcome {
                Ok(Ok(verdict)) => verdict,
                Ok(Err(err)) => {
                    warn!("Audit hook '{}' failed on {}: {}", hook.label(), event.name(), err);
                    Verdict::Deny(DenyReason::hook_failure(err))
                }
                Err(payload) => {
                    let detail = panic_message(payload.as_ref());
                    warn!("Audit hook '{}' panicked on {}: {}", hook.label(), event.name(), detail);
                    Verdict::Deny(DenyReason::hook_failure(detail))
                }
            };
            if verdict.is_deny() {
                debug!("Event {} denied by hook '{}'", event.name(), hook.label());
                return verdict;
            }
        }
        Verdict::Allow
    }

    /// Tear the registry down.
    ///
    /// Every hook sees `sys._clearaudithooks`, in order; a veto is logged and
    /// ignored because nothing may prevent finalization. Returns the number of
    /// hooks that were dropped.
    pub fn clear(self) -> usize {
        let count = self.registry.len();
        for hook in self.registry.iter() {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| hook.call(&AuditEvent::ClearHooks)));
            match outcome {
                Ok(Ok(Verdict::Allow)) => {}
                Ok(Ok(Verdict::Deny(reason))) => {
                    warn!("Audit hook '{}' vetoed clear, ignored: {}", hook.label(), reason)
                }
                Ok(Err(err)) => warn!("Audit hook '{}' failed on clear: {}", hook.label(), err),
                Err(payload) => warn!(
                    "Audit hook '{}' panicked on clear: {}",
                    hook.label(),
                    panic_message(payload.as_ref())
                ),
            }
        }
        info!("Cleared {} audit hook(s)", count);
        count
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
