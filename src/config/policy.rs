/// Policy selection
///
/// Which decision procedures are active is a configuration-time choice: a set
/// of enabled tags. An event whose policy is not enabled still reaches the
/// generic logging rule, so disabling a policy never makes an event invisible.
use crate::config::types::{AuditError, Result};
use crate::events::schema::EventKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// One tag per audited operation kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PolicyTag {
    ClearHooks,
    AddHook,
    OpenForImport,
    Import,
    Compile,
    CodeNew,
    Exec,
    Id,
    SetAttr,
    DelAttr,
    PickleFindClass,
    System,
}

impl PolicyTag {
    pub const ALL: [PolicyTag; 12] = [
        PolicyTag::ClearHooks,
        PolicyTag::AddHook,
        PolicyTag::OpenForImport,
        PolicyTag::Import,
        PolicyTag::Compile,
        PolicyTag::CodeNew,
        PolicyTag::Exec,
        PolicyTag::Id,
        PolicyTag::SetAttr,
        PolicyTag::DelAttr,
        PolicyTag::PickleFindClass,
        PolicyTag::System,
    ];

    /// Event this policy is keyed to
    pub fn event_kind(self) -> EventKind {
        match self {
            PolicyTag::ClearHooks => EventKind::ClearHooks,
            PolicyTag::AddHook => EventKind::AddHook,
            PolicyTag::OpenForImport => EventKind::OpenForImport,
            PolicyTag::Import => EventKind::Import,
            PolicyTag::Compile => EventKind::Compile,
            PolicyTag::CodeNew => EventKind::CodeNew,
            PolicyTag::Exec => EventKind::Exec,
            PolicyTag::Id => EventKind::Id,
            PolicyTag::SetAttr => EventKind::SetAttr,
            PolicyTag::DelAttr => EventKind::DelAttr,
            PolicyTag::PickleFindClass => EventKind::PickleFindClass,
            PolicyTag::System => EventKind::System,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyTag::ClearHooks => "clear-hooks",
            PolicyTag::AddHook => "add-hook",
            PolicyTag::OpenForImport => "open-for-import",
            PolicyTag::Import => "import",
            PolicyTag::Compile => "compile",
            PolicyTag::CodeNew => "code-new",
            PolicyTag::Exec => "exec",
            PolicyTag::Id => "id",
            PolicyTag::SetAttr => "set-attr",
            PolicyTag::DelAttr => "del-attr",
            PolicyTag::PickleFindClass => "pickle-find-class",
            PolicyTag::System => "system",
        }
    }
}

impl fmt::Display for PolicyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyTag {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        PolicyTag::ALL
            .iter()
            .copied()
            .find(|tag| tag.as_str() == s)
            .ok_or_else(|| AuditError::Config(format!("unknown policy tag: {s}")))
    }
}

/// Set of enabled policy tags
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySet {
    tags: BTreeSet<PolicyTag>,
}

impl PolicySet {
    /// Every policy enabled; the restricted launcher's fixed set
    pub fn all() -> Self {
        PolicyTag::ALL.into_iter().collect()
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with(mut self, tag: PolicyTag) -> Self {
        self.tags.insert(tag);
        self
    }

    pub fn without(mut self, tag: PolicyTag) -> Self {
        self.tags.remove(&tag);
        self
    }

    pub fn contains(&self, tag: PolicyTag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = PolicyTag> + '_ {
        self.tags.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl FromIterator<PolicyTag> for PolicySet {
    fn from_iter<I: IntoIterator<Item = PolicyTag>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}
