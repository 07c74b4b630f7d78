/// Ordered hook registry
///
/// Hooks are kept in registration order. The only mutation is appending a
/// new hook, and that stops for good once the registry is locked.
use crate::config::types::AuditError;
use crate::dispatch::verdict::Verdict;
use crate::events::schema::AuditEvent;
use std::fmt;

/// What a hook hands back to the dispatcher. An `Err` vetoes the operation.
pub type HookOutcome = std::result::Result<Verdict, AuditError>;

type HookFn = Box<dyn Fn(&AuditEvent) -> HookOutcome>;

/// A registered hook: its callback bound to the context it was registered with
pub struct HookRegistration {
    label: String,
    invoke: HookFn,
}

impl HookRegistration {
    /// Bind `callback` to `context`. The context is captured once, here, and
    /// passed unchanged to every invocation.
    pub fn new<C, F>(label: impl Into<String>, callback: F, context: C) -> Self
    where
        C: 'static,
        F: Fn(&AuditEvent, &C) -> HookOutcome + 'static,
    {
        Self {
            label: label.into(),
            invoke: Box::new(move |event| callback(event, &context)),
        }
    }

    /// Hook that carries its own state
    pub fn from_fn<F>(label: impl Into<String>, f: F) -> Self
    where
        F: Fn(&AuditEvent) -> HookOutcome + 'static,
    {
        Self {
            label: label.into(),
            invoke: Box::new(f),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn call(&self, event: &AuditEvent) -> HookOutcome {
        (self.invoke)(event)
    }
}

impl fmt::Debug for HookRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookRegistration")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct HookRegistry {
    entries: Vec<HookRegistration>,
    locked: bool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// One-way transition; there is no unlock
    pub fn lock(&mut self) {
        self.locked = true;
    }

    /// Append a hook. Returns false and leaves the registry untouched when
    /// it is locked.
    pub fn push(&mut self, registration: HookRegistration) -> bool {
        if self.locked {
            return false;
        }
        self.entries.push(registration);
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = &HookRegistration> {
        self.entries.iter()
    }
}
