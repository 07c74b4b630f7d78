/// Decision procedures, one per audited operation kind
///
/// Every rule writes its log record before returning a verdict, so a denied
/// operation is always visible in the trail.
use crate::config::types::{AuditError, ExceptionKind, Result};
use crate::dispatch::registry::HookOutcome;
use crate::dispatch::verdict::Verdict;
use crate::events::schema::{AuditEvent, CodeObjectSpec};
use crate::events::value::{repr_str, repr_tuple, Value};
use crate::policy::bytecode::validate_local_stores;
use crate::policy::PolicyContext;
use log::debug;

/// Longest source preview written for a compile event, in characters
pub const COMPILE_PREVIEW_LIMIT: usize = 200;

fn misrouted(rule: &str, event: &AuditEvent) -> AuditError {
    AuditError::Hook(format!("{} rule received {}", rule, event.name()))
}

fn record(ctx: &PolicyContext, event: &AuditEvent, message: &str) -> Result<()> {
    ctx.log.write_line(event.name(), message)
}

/// Log the teardown and detach from the stream
pub fn clear_hooks(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    record(ctx, event, "closing log")?;
    ctx.log.close();
    Ok(Verdict::Allow)
}

/// Dynamic hook registration is refused outright
pub fn add_hook(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    record(ctx, event, "hook was not added")?;
    Ok(Verdict::deny(ExceptionKind::SystemError, "hook not permitted"))
}

/// The gate already decided; this only records the decision
pub fn open_for_import(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::OpenForImport { path, allowed } = event else {
        return Err(misrouted("open_for_import", event));
    };
    let message = format!("'{}'; allowed = {}", path, Value::Bool(*allowed).repr());
    record(ctx, event, &message)?;
    Ok(Verdict::Allow)
}

pub fn import(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::Import {
        module,
        filename,
        sys_path,
        sys_meta_path,
        sys_path_hooks,
    } = event
    else {
        return Err(misrouted("import", event));
    };
    let message = match filename.as_deref() {
        Some(file) if !file.is_empty() => format!("importing {} from {}", module, file),
        _ => format!(
            "importing {}: sys.path={}; sys.meta_path={}; sys.path_hooks={}",
            module, sys_path, sys_meta_path, sys_path_hooks
        ),
    };
    record(ctx, event, &message)?;
    Ok(Verdict::Allow)
}

/// Cap a source preview at `COMPILE_PREVIEW_LIMIT` characters
pub fn preview(text: &str) -> String {
    match text.char_indices().nth(COMPILE_PREVIEW_LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

pub fn compile(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::Compile { source, filename } = event else {
        return Err(misrouted("compile", event));
    };
    let text = match source {
        Value::Str(s) => preview(s),
        other => preview(&other.repr()),
    };
    let message = match filename.as_deref() {
        Some(file) if !file.is_empty() => {
            if matches!(source, Value::None) {
                format!("compiling from file {}", file)
            } else {
                format!("compiling {}: {}", file, text)
            }
        }
        _ => format!("compiling: {}", repr_str(&text)),
    };
    record(ctx, event, &message)?;
    Ok(Verdict::Allow)
}

/// Reject code objects whose local stores overrun their frame
pub fn code_new(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::CodeNew(CodeObjectSpec {
        code,
        filename,
        nlocals,
        ..
    }) = event
    else {
        return Err(misrouted("code_new", event));
    };
    record(ctx, event, &format!("compiling: {}", repr_str(filename)))?;

    match validate_local_stores(code, *nlocals) {
        Ok(()) => Ok(Verdict::Allow),
        Err(violation) => {
            debug!("Rejecting code object from {}: {:?}", filename, violation);
            record(ctx, event, &violation.to_string())?;
            Ok(Verdict::deny(ExceptionKind::ValueError, "invalid code object"))
        }
    }
}

pub fn exec(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::Exec { code_object } = event else {
        return Err(misrouted("exec", event));
    };
    record(ctx, event, &code_object.repr())?;
    Ok(Verdict::Allow)
}

/// Signed hexadecimal rendering, `0x1f` / `-0x1f`
pub fn hex_identity(identity: i64) -> String {
    if identity < 0 {
        format!("-{:#x}", identity.unsigned_abs())
    } else {
        format!("{:#x}", identity)
    }
}

pub fn id(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::Id { identity } = event else {
        return Err(misrouted("id", event));
    };
    record(ctx, event, &hex_identity(*identity))?;
    Ok(Verdict::Allow)
}

/// `<class 'T'> instance at 0x..`; plain values have no address to show
fn describe_instance(value: &Value) -> String {
    match value.identity() {
        Some(addr) => format!("<class '{}'> instance at {:#x}", value.type_name(), addr),
        None => format!("<class '{}'> instance", value.type_name()),
    }
}

/// Attribute events raised while the runtime is still starting cannot be
/// rendered yet and pass unlogged.
pub fn set_attr(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::SetAttr {
        target,
        attr,
        value,
    } = event
    else {
        return Err(misrouted("set_attr", event));
    };
    if !ctx.runtime.is_initialized() {
        return Ok(Verdict::Allow);
    }
    let message = format!(
        "setattr({}, \"{}\", {})",
        target.repr(),
        attr,
        describe_instance(value)
    );
    record(ctx, event, &message)?;
    Ok(Verdict::Allow)
}

pub fn del_attr(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::DelAttr { target, attr } = event else {
        return Err(misrouted("del_attr", event));
    };
    if !ctx.runtime.is_initialized() {
        return Ok(Verdict::Allow);
    }
    record(ctx, event, &format!("delattr({}, \"{}\")", target.repr(), attr))?;
    Ok(Verdict::Allow)
}

pub fn pickle_find_class(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::PickleFindClass { module, name } = event else {
        return Err(misrouted("pickle_find_class", event));
    };
    record(
        ctx,
        event,
        &format!("finding {}.{} blocked", module.repr(), name.repr()),
    )?;
    Ok(Verdict::deny(
        ExceptionKind::RuntimeError,
        "unpickling arbitrary objects is disallowed",
    ))
}

pub fn system(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    let AuditEvent::System { command } = event else {
        return Err(misrouted("system", event));
    };
    record(ctx, event, &command.to_string())?;
    Ok(Verdict::deny(ExceptionKind::RuntimeError, "system() is disallowed"))
}

/// Anything without a dedicated rule is logged as its argument tuple
pub fn generic(event: &AuditEvent, ctx: &PolicyContext) -> HookOutcome {
    record(ctx, event, &repr_tuple(&event.args()))?;
    Ok(Verdict::Allow)
}
