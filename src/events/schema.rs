/// Audit event vocabulary and argument schemas
///
/// Events arrive from the host runtime as a flat name plus an ordered argument
/// list. They are checked against their declared schema exactly once, at the
/// dispatch boundary, and handed to hooks as a typed `AuditEvent`. Names
/// outside the vocabulary are carried through untouched as `AuditEvent::Other`.
use crate::config::types::{AuditError, Result};
use crate::events::value::Value;
use serde::{Deserialize, Serialize};

/// Version of the event vocabulary below
pub const VOCABULARY_VERSION: u32 = 1;

/// Known event names
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    /// The hook registry is being torn down
    ClearHooks,
    /// A hook registration was attempted
    AddHook,
    /// The import gate decided on a source file
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

impl EventKind {
    pub const ALL: [EventKind; 12] = [
        EventKind::ClearHooks,
        EventKind::AddHook,
        EventKind::OpenForImport,
        EventKind::Import,
        EventKind::Compile,
        EventKind::CodeNew,
        EventKind::Exec,
        EventKind::Id,
        EventKind::SetAttr,
        EventKind::DelAttr,
        EventKind::PickleFindClass,
        EventKind::System,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::ClearHooks => "sys._clearaudithooks",
            EventKind::AddHook => "sys.addaudithook",
            EventKind::OpenForImport => "auditbox.open_for_import",
            EventKind::Import => "import",
            EventKind::Compile => "compile",
            EventKind::CodeNew => "code.__new__",
            EventKind::Exec => "exec",
            EventKind::Id => "id",
            EventKind::SetAttr => "object.__setattr__",
            EventKind::DelAttr => "object.__delattr__",
            EventKind::PickleFindClass => "pickle.find_class",
            EventKind::System => "system",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        EventKind::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

/// Arguments of a code-object construction event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CodeObjectSpec {
    pub code: Vec<u8>,
    pub filename: String,
    pub name: String,
    pub argcount: i64,
    pub kwonlyargcount: i64,
    pub nlocals: i64,
    pub stacksize: i64,
    pub flags: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum AuditEvent {
    ClearHooks,
    AddHook,
    OpenForImport {
        path: String,
        allowed: bool,
    },
    Import {
        module: String,
        filename: Option<String>,
        sys_path: Value,
        sys_meta_path: Value,
        sys_path_hooks: Value,
    },
    Compile {
        source: Value,
        filename: Option<String>,
    },
    CodeNew(CodeObjectSpec),
    Exec {
        code_object: Value,
    },
    Id {
        identity: i64,
    },
    SetAttr {
        target: Value,
        attr: String,
        value: Value,
    },
    DelAttr {
        target: Value,
        attr: String,
    },
    PickleFindClass {
        module: Value,
        name: Value,
    },
    System {
        command: Value,
    },
    Other {
        name: String,
        args: Vec<Value>,
    },
}

impl AuditEvent {
    /// Check a raw payload against the schema declared for `name`
    pub fn parse(name: &str, args: Vec<Value>) -> Result<Self> {
        let Some(kind) = EventKind::from_name(name) else {
            return Ok(AuditEvent::Other {
                name: name.to_string(),
                args,
            });
        };

        let arity = match kind {
            EventKind::ClearHooks | EventKind::AddHook => 0,
            EventKind::Exec | EventKind::Id | EventKind::System => 1,
            EventKind::OpenForImport
            | EventKind::Compile
            | EventKind::DelAttr
            | EventKind::PickleFindClass => 2,
            EventKind::SetAttr => 3,
            EventKind::Import => 5,
            EventKind::CodeNew => 8,
        };
        let mut args = SchemaArgs::new(kind, args, arity)?;

        let event = match kind {
            EventKind::ClearHooks => AuditEvent::ClearHooks,
            EventKind::AddHook => AuditEvent::AddHook,
            EventKind::OpenForImport => AuditEvent::OpenForImport {
                path: args.string("path")?,
                allowed: args.boolean("allowed")?,
            },
            EventKind::Import => AuditEvent::Import {
                module: args.string("module")?,
                filename: args.optional_string("filename")?,
                sys_path: args.any(),
                sys_meta_path: args.any(),
                sys_path_hooks: args.any(),
            },
            EventKind::Compile => AuditEvent::Compile {
                source: args.any(),
                filename: args.optional_string("filename")?,
            },
            EventKind::CodeNew => AuditEvent::CodeNew(CodeObjectSpec {
                code: args.bytes("code")?,
                filename: args.string("filename")?,
                name: args.string("name")?,
                argcount: args.int("argcount")?,
                kwonlyargcount: args.int("kwonlyargcount")?,
                nlocals: args.int("nlocals")?,
                stacksize: args.int("stacksize")?,
                flags: args.int("flags")?,
            }),
            EventKind::Exec => AuditEvent::Exec {
                code_object: args.any(),
            },
            EventKind::Id => AuditEvent::Id {
                identity: args.int("identity")?,
            },
            EventKind::SetAttr => AuditEvent::SetAttr {
                target: args.any(),
                attr: args.string("attr")?,
                value: args.any(),
            },
            EventKind::DelAttr => AuditEvent::DelAttr {
                target: args.any(),
                attr: args.string("attr")?,
            },
            EventKind::PickleFindClass => AuditEvent::PickleFindClass {
                module: args.any(),
                name: args.any(),
            },
            EventKind::System => AuditEvent::System {
                command: args.any(),
            },
        };
        Ok(event)
    }

    pub fn kind(&self) -> Option<EventKind> {
        Some(match self {
            AuditEvent::ClearHooks => EventKind::ClearHooks,
            AuditEvent::AddHook => EventKind::AddHook,
            AuditEvent::OpenForImport { .. } => EventKind::OpenForImport,
            AuditEvent::Import { .. } => EventKind::Import,
            AuditEvent::Compile { .. } => EventKind::Compile,
            AuditEvent::CodeNew(_) => EventKind::CodeNew,
            AuditEvent::Exec { .. } => EventKind::Exec,
            AuditEvent::Id { .. } => EventKind::Id,
            AuditEvent::SetAttr { .. } => EventKind::SetAttr,
            AuditEvent::DelAttr { .. } => EventKind::DelAttr,
            AuditEvent::PickleFindClass { .. } => EventKind::PickleFindClass,
            AuditEvent::System { .. } => EventKind::System,
            AuditEvent::Other { .. } => return None,
        })
    }

    pub fn name(&self) -> &str {
        match self {
            AuditEvent::Other { name, .. } => name,
            known => known.kind().map_or("", EventKind::name),
        }
    }

    /// The positional argument tuple, as the host raised it
    pub fn args(&self) -> Vec<Value> {
        fn opt(s: &Option<String>) -> Value {
            s.clone().into()
        }
        match self {
            AuditEvent::ClearHooks | AuditEvent::AddHook => Vec::new(),
            AuditEvent::OpenForImport { path, allowed } => {
                vec![Value::from(path.as_str()), Value::Bool(*allowed)]
            }
            AuditEvent::Import {
                module,
                filename,
                sys_path,
                sys_meta_path,
                sys_path_hooks,
            } => vec![
                Value::from(module.as_str()),
                opt(filename),
                sys_path.clone(),
                sys_meta_path.clone(),
                sys_path_hooks.clone(),
            ],
            AuditEvent::Compile { source, filename } => vec![source.clone(), opt(filename)],
            AuditEvent::CodeNew(object) => vec![
                Value::Bytes(object.code.clone()),
                Value::from(object.filename.as_str()),
                Value::from(object.name.as_str()),
                Value::Int(object.argcount),
                Value::Int(object.kwonlyargcount),
                Value::Int(object.nlocals),
                Value::Int(object.stacksize),
                Value::Int(object.flags),
            ],
            AuditEvent::Exec { code_object } => vec![code_object.clone()],
            AuditEvent::Id { identity } => vec![Value::Int(*identity)],
            AuditEvent::SetAttr {
                target,
                attr,
                value,
            } => vec![target.clone(), Value::from(attr.as_str()), value.clone()],
            AuditEvent::DelAttr { target, attr } => {
                vec![target.clone(), Value::from(attr.as_str())]
            }
            AuditEvent::PickleFindClass { module, name } => vec![module.clone(), name.clone()],
            AuditEvent::System { command } => vec![command.clone()],
            AuditEvent::Other { args, .. } => args.clone(),
        }
    }
}

/// Cursor over a payload whose arity has already been checked
struct SchemaArgs {
    kind: EventKind,
    items: std::vec::IntoIter<Value>,
    position: usize,
}

impl SchemaArgs {
    fn new(kind: EventKind, args: Vec<Value>, arity: usize) -> Result<Self> {
        if args.len() != arity {
            return Err(AuditError::Schema {
                event: kind.name().to_string(),
                detail: format!("expected {} arguments, got {}", arity, args.len()),
            });
        }
        Ok(Self {
            kind,
            items: args.into_iter(),
            position: 0,
        })
    }

    fn any(&mut self) -> Value {
        self.position += 1;
        // arity was checked up front
        self.items.next().unwrap_or(Value::None)
    }

    fn mismatch(&self, field: &str, expected: &str, got: &Value) -> AuditError {
        AuditError::Schema {
            event: self.kind.name().to_string(),
            detail: format!(
                "argument {} ({}) must be {}, got {}",
                self.position - 1,
                field,
                expected,
                got.type_name()
            ),
        }
    }

    fn string(&mut self, field: &str) -> Result<String> {
        match self.any() {
            Value::Str(s) => Ok(s),
            other => Err(self.mismatch(field, "str", &other)),
        }
    }

    fn optional_string(&mut self, field: &str) -> Result<Option<String>> {
        match self.any() {
            Value::Str(s) => Ok(Some(s)),
            Value::None => Ok(None),
            other => Err(self.mismatch(field, "str or None", &other)),
        }
    }

    fn boolean(&mut self, field: &str) -> Result<bool> {
        match self.any() {
            Value::Bool(b) => Ok(b),
            other => Err(self.mismatch(field, "bool", &other)),
        }
    }

    fn int(&mut self, field: &str) -> Result<i64> {
        match self.any() {
            Value::Int(i) => Ok(i),
            other => Err(self.mismatch(field, "int", &other)),
        }
    }

    fn bytes(&mut self, field: &str) -> Result<Vec<u8>> {
        match self.any() {
            Value::Bytes(b) => Ok(b),
            other => Err(self.mismatch(field, "bytes", &other)),
        }
    }
}
