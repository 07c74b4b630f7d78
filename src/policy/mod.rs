//! Policy Hook Set
//!
//! A static table from event kind to decision procedure, built once from the
//! enabled policy tags. The whole set is registered with the dispatcher as a
//! single hook whose context is the shared log stream and runtime state.

pub mod bytecode;
pub mod rules;

use crate::config::policy::{PolicySet, PolicyTag};
use crate::dispatch::registry::{HookOutcome, HookRegistration};
use crate::events::schema::{AuditEvent, EventKind, VOCABULARY_VERSION};
use crate::observability::audit_log::AuditLog;
use crate::runtime::RuntimeState;
use log::debug;
use std::collections::BTreeMap;
use std::fmt;

/// A decision procedure
pub type Rule = fn(&AuditEvent, &PolicyContext) -> HookOutcome;

/// What every rule gets to see besides the event
#[derive(Clone, Debug)]
pub struct PolicyContext {
    pub log: AuditLog,
    pub runtime: RuntimeState,
}

#[derive(Clone, Copy)]
pub struct PolicyEntry {
    pub tag: PolicyTag,
    pub rule: Rule,
}

impl fmt::Debug for PolicyEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyEntry").field("tag", &self.tag).finish()
    }
}

fn rule_for(tag: PolicyTag) -> Rule {
    match tag {
        PolicyTag::ClearHooks => rules::clear_hooks,
        PolicyTag::AddHook => rules::add_hook,
        PolicyTag::OpenForImport => rules::open_for_import,
        PolicyTag::Import => rules::import,
        PolicyTag::Compile => rules::compile,
        PolicyTag::CodeNew => rules::code_new,
        PolicyTag::Exec => rules::exec,
        PolicyTag::Id => rules::id,
        PolicyTag::SetAttr => rules::set_attr,
        PolicyTag::DelAttr => rules::del_attr,
        PolicyTag::PickleFindClass => rules::pickle_find_class,
        PolicyTag::System => rules::system,
    }
}

#[derive(Clone, Debug, Default)]
pub struct PolicyTable {
    entries: BTreeMap<EventKind, PolicyEntry>,
}

impl PolicyTable {
    pub fn build(policies: &PolicySet) -> Self {
        let entries = policies
            .iter()
            .map(|tag| {
                (
                    tag.event_kind(),
                    PolicyEntry {
                        tag,
                        rule: rule_for(tag),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn lookup(&self, kind: EventKind) -> Option<&PolicyEntry> {
        self.entries.get(&kind)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct PolicyHookSet {
    table: PolicyTable,
    context: PolicyContext,
}

impl PolicyHookSet {
    pub const LABEL: &'static str = "policy-hook-set";

    pub fn new(policies: &PolicySet, log: AuditLog, runtime: RuntimeState) -> Self {
        let table = PolicyTable::build(policies);
        debug!(
            "Built policy table with {} rule(s) for event vocabulary v{}",
            table.len(),
            VOCABULARY_VERSION
        );
        Self {
            table,
            context: PolicyContext { log, runtime },
        }
    }

    /// Route an event to its rule, or to the generic logging rule when its
    /// policy is not enabled
    pub fn evaluate(&self, event: &AuditEvent) -> HookOutcome {
        let rule = event
            .kind()
            .and_then(|kind| self.table.lookup(kind))
            .map_or(rules::generic as Rule, |entry| entry.rule);
        rule(event, &self.context)
    }

    pub fn into_registration(self) -> HookRegistration {
        HookRegistration::new(
            Self::LABEL,
            |event, hooks: &PolicyHookSet| hooks.evaluate(event),
            self,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExceptionKind;
    use crate::dispatch::verdict::Verdict;
    use crate::dispatch::Dispatcher;
    use crate::events::value::Value;

    #[test]
    fn test_table_has_one_entry_per_enabled_tag() {
        let table = PolicyTable::build(&PolicySet::all());
        assert_eq!(table.len(), EventKind::ALL.len());
        for kind in EventKind::ALL {
            assert_eq!(table.lookup(kind).map(|e| e.tag.event_kind()), Some(kind));
        }
        assert!(PolicyTable::build(&PolicySet::empty()).is_empty());
    }

    #[test]
    fn test_disabled_policy_falls_back_to_generic_logging() {
        let log = AuditLog::in_memory();
        let set = PolicySet::all().without(PolicyTag::System);
        let hooks = PolicyHookSet::new(&set, log.clone(), RuntimeState::new());
        let verdict = hooks
            .evaluate(&AuditEvent::System {
                command: Value::from("ls"),
            })
            .unwrap();
        assert_eq!(verdict, Verdict::Allow);
        assert_eq!(log.lines(), ["system: ('ls',)"]);
    }

    #[test]
    fn test_registered_set_enforces_through_dispatcher() {
        let log = AuditLog::in_memory();
        let hooks = PolicyHookSet::new(&PolicySet::all(), log.clone(), RuntimeState::new());
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(hooks.into_registration()).unwrap();

        let verdict = dispatcher.raise("system", vec![Value::from("echo pwned")]);
        assert_eq!(
            verdict,
            Verdict::deny(ExceptionKind::RuntimeError, "system() is disallowed")
        );
        assert_eq!(dispatcher.raise("id", vec![Value::Int(16)]), Verdict::Allow);
        assert_eq!(log.lines(), ["system: echo pwned", "id: 0x10"]);
    }
}
