/// Reference script host
///
/// A deterministic line-oriented interpreter whose statements are the
/// audited operations themselves. Each statement raises the same event a
/// full runtime would raise at the same point, and a veto stops the script
/// with the denial as its error.
///
/// ```text
/// # comment
/// print <text>                 write a line to the output
/// argv                         print the program arguments
/// import <module>              load <module>.py from the search path
/// compile <source>             compile a string
/// exec <statement>             compile and run a nested statement
/// code <file> <name> <nlocals> <hex>
///                              build a code object from raw bytecode
/// new <name> <type>            create an object
/// id <name>                    disclose an object's identity
/// setattr <name> <attr> <literal>
/// delattr <name> <attr>
/// unpickle <module> <name>     resolve a class during deserialization
/// system <command>             run a shell command
/// addhook <label>              try to register another audit hook
/// audit <event> <literal>...   raise an arbitrary event
/// raise <ExceptionKind> <message>
/// ```
use crate::config::launcher::HardeningFlags;
use crate::config::types::{AuditError, ExceptionKind, Result};
use crate::dispatch::registry::HookRegistration;
use crate::dispatch::verdict::Verdict;
use crate::events::value::{ObjectRef, Value};
use crate::gate::ImportSource;
use crate::runtime::{RuntimeConfig, RuntimeServices, ScriptHost, ScriptOutcome};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Extra module directories, honoured unless the environment is ignored
pub const SEARCH_PATH_ENV: &str = "AUDITBOX_PATH";

const BUILTIN_MODULES: [&str; 4] = ["builtins", "os", "pickle", "sys"];
const SITE_MODULE: &str = "sitecustomize";
const FIRST_OBJECT_ID: usize = 0x0010_0000;
const OBJECT_STRIDE: usize = 0x30;

/// Why a statement stopped the script
#[derive(Debug)]
enum Interrupt {
    /// The script raised an error it does not handle
    Raised { kind: ExceptionKind, message: String },
    /// The host itself failed
    Host(AuditError),
}

impl Interrupt {
    fn raise(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Interrupt::Raised {
            kind,
            message: message.into(),
        }
    }
}

impl From<AuditError> for Interrupt {
    fn from(err: AuditError) -> Self {
        let (kind, message) = err.as_exception();
        Interrupt::Raised { kind, message }
    }
}

type Step = std::result::Result<(), Interrupt>;

fn finish(step: Step) -> Result<ScriptOutcome> {
    match step {
        Ok(()) => Ok(ScriptOutcome::Completed),
        Err(Interrupt::Raised { kind, message }) => Ok(ScriptOutcome::Raised { kind, message }),
        Err(Interrupt::Host(err)) => Err(err),
    }
}

pub struct ScriptedHost {
    output: Box<dyn Write>,
    hardening: HardeningFlags,
    argv: Vec<String>,
    search_path: Vec<PathBuf>,
    modules: BTreeMap<String, ObjectRef>,
    objects: HashMap<String, ObjectRef>,
    next_id: usize,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self {
            output,
            hardening: HardeningFlags::default(),
            argv: Vec::new(),
            search_path: Vec::new(),
            modules: BTreeMap::new(),
            objects: HashMap::new(),
            next_id: FIRST_OBJECT_ID,
        }
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    pub fn is_loaded(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    fn allocate(&mut self, type_name: &str) -> ObjectRef {
        let id = self.next_id;
        self.next_id += OBJECT_STRIDE;
        ObjectRef::new(type_name, id)
    }

    fn code_object(&mut self, filename: &str) -> ObjectRef {
        let code = self.allocate("code");
        let repr = format!(
            "<code object <module> at {:#x}, file \"{}\", line 1>",
            code.id, filename
        );
        code.with_repr(repr)
    }

    fn sys_path_value(&self) -> Value {
        Value::List(
            self.search_path
                .iter()
                .map(|p| Value::from(p.to_string_lossy().into_owned()))
                .collect(),
        )
    }

    fn lookup(&self, name: &str) -> std::result::Result<ObjectRef, Interrupt> {
        self.objects
            .get(name)
            .or_else(|| self.modules.get(name))
            .cloned()
            .ok_or_else(|| {
                Interrupt::raise(ExceptionKind::NameError, format!("name '{}' is not defined", name))
            })
    }

    fn emit(&mut self, line: &str) -> Step {
        writeln!(self.output, "{}", line)
            .and_then(|()| self.output.flush())
            .map_err(|e| Interrupt::Host(e.into()))
    }

    fn find_module(&self, module: &str) -> Option<PathBuf> {
        let file = format!("{}.py", module);
        self.search_path
            .iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
    }

    fn import(&mut self, module: &str, services: &mut RuntimeServices<'_>) -> Step {
        if module.is_empty() {
            return Err(Interrupt::raise(ExceptionKind::SyntaxError, "import needs a module name"));
        }
        if self.modules.contains_key(module) {
            return Ok(());
        }

        let builtin = BUILTIN_MODULES.contains(&module);
        let found = if builtin { None } else { self.find_module(module) };
        let filename = found.as_ref().map(|p| p.to_string_lossy().into_owned());
        services.audit(
            "import",
            vec![
                Value::from(module),
                Value::from(filename.clone()),
                self.sys_path_value(),
                Value::List(Vec::new()),
                Value::List(Vec::new()),
            ],
        )?;

        let Some(path) = found else {
            if builtin {
                let object = self
                    .allocate("module")
                    .with_repr(format!("<module '{}' (built-in)>", module));
                self.modules.insert(module.to_string(), object);
                return Ok(());
            }
            return Err(Interrupt::raise(
                ExceptionKind::ModuleNotFoundError,
                format!("No module named '{}'", module),
            ));
        };

        let source = services.open_for_import(&path)?;
        let object = self.allocate("module").with_repr(format!(
            "<module '{}' from '{}'>",
            module,
            path.display()
        ));
        self.modules.insert(module.to_string(), object);
        debug!("Loading module {} from {}", module, path.display());
        self.run_body(source, services)
    }

    /// Compile and run a whole source file
    fn run_body(&mut self, source: ImportSource, services: &mut RuntimeServices<'_>) -> Step {
        let filename = source.path().to_string_lossy().into_owned();
        let text = source.read_to_string().map_err(Interrupt::Host)?;

        services.audit("compile", vec![Value::None, Value::from(filename.as_str())])?;
        let code = self.code_object(&filename);
        services.audit("exec", vec![Value::Object(code)])?;

        for line in text.lines() {
            self.execute(line, services)?;
        }
        Ok(())
    }

    fn execute(&mut self, line: &str, services: &mut RuntimeServices<'_>) -> Step {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(());
        }
        let (keyword, rest) = line
            .split_once(char::is_whitespace)
            .map(|(k, r)| (k, r.trim()))
            .unwrap_or((line, ""));

        match keyword {
            "print" => self.emit(rest),
            "argv" => {
                let joined = self.argv.join(" ");
                self.emit(&joined)
            }
            "import" => self.import(rest, services),
            "compile" => {
                services.audit("compile", vec![Value::from(rest), Value::from("<string>")])?;
                self.code_object("<string>");
                Ok(())
            }
            "exec" => {
                services.audit("compile", vec![Value::from(rest), Value::from("<string>")])?;
                let code = self.code_object("<string>");
                services.audit("exec", vec![Value::Object(code)])?;
                self.execute(rest, services)
            }
            "code" => self.build_code(rest, services),
            "new" => {
                let [name, type_name] = words::<2>(rest, "new <name> <type>")?;
                let object = self.allocate(&type_name);
                self.objects.insert(name, object);
                Ok(())
            }
            "id" => {
                let [name] = words::<1>(rest, "id <name>")?;
                let object = self.lookup(&name)?;
                services.audit("id", vec![Value::Int(object.id as i64)])?;
                Ok(())
            }
            "setattr" => {
                let mut tokens = tokenize(rest).into_iter();
                let (Some(name), Some(attr), Some(literal), None) =
                    (tokens.next(), tokens.next(), tokens.next(), tokens.next())
                else {
                    return Err(usage("setattr <name> <attr> <literal>"));
                };
                let target = self.lookup(&name)?;
                let value = self.literal(&literal)?;
                let value = self.materialize(value);
                services.audit(
                    "object.__setattr__",
                    vec![Value::Object(target), Value::from(attr), value],
                )?;
                Ok(())
            }
            "delattr" => {
                let [name, attr] = words::<2>(rest, "delattr <name> <attr>")?;
                let target = self.lookup(&name)?;
                services.audit("object.__delattr__", vec![Value::Object(target), Value::from(attr)])?;
                Ok(())
            }
            "unpickle" => {
                let [module, name] = words::<2>(rest, "unpickle <module> <name>")?;
                services.audit("pickle.find_class", vec![Value::from(module), Value::from(name)])?;
                Ok(())
            }
            "system" => {
                services.audit("system", vec![Value::from(rest)])?;
                self.run_command(rest)
            }
            "addhook" => {
                let label = if rest.is_empty() { "script-hook" } else { rest };
                services.add_audit_hook(HookRegistration::from_fn(label, |_| Ok(Verdict::Allow)))?;
                Ok(())
            }
            "audit" => {
                let mut tokens = tokenize(rest).into_iter();
                let Some(event) = tokens.next() else {
                    return Err(usage("audit <event> <literal>..."));
                };
                let args = tokens
                    .map(|t| self.literal(&t))
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                services.audit(&event, args)?;
                Ok(())
            }
            "raise" => {
                let (kind, message) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                Err(Interrupt::raise(parse_exception_kind(kind), message.trim()))
            }
            other => Err(Interrupt::raise(
                ExceptionKind::SyntaxError,
                format!("unknown statement '{}'", other),
            )),
        }
    }

    fn build_code(&mut self, rest: &str, services: &mut RuntimeServices<'_>) -> Step {
        let [filename, name, nlocals, hex] = words::<4>(rest, "code <file> <name> <nlocals> <hex>")?;
        let nlocals: i64 = nlocals.parse().map_err(|_| {
            Interrupt::raise(ExceptionKind::ValueError, format!("invalid nlocals '{}'", nlocals))
        })?;
        let code = decode_hex(&hex)?;
        services.audit(
            "code.__new__",
            vec![
                Value::Bytes(code),
                Value::from(filename),
                Value::from(name),
                Value::Int(0),
                Value::Int(0),
                Value::Int(nlocals),
                Value::Int(1),
                Value::Int(0),
            ],
        )?;
        Ok(())
    }

    fn run_command(&mut self, command: &str) -> Step {
        #[cfg(unix)]
        let result = Command::new("sh").arg("-c").arg(command).output();
        #[cfg(windows)]
        let result = Command::new("cmd").arg("/C").arg(command).output();

        let output = result.map_err(|e| Interrupt::raise(ExceptionKind::OsError, e.to_string()))?;
        self.output
            .write_all(&output.stdout)
            .map_err(|e| Interrupt::Host(e.into()))?;
        if !output.status.success() {
            warn!("Command exited with {}", output.status);
        }
        Ok(())
    }

    /// Give a plain literal an identity, as storing it on an object would
    fn materialize(&mut self, value: Value) -> Value {
        if let Value::Object(_) = value {
            return value;
        }
        let object = self.allocate(value.type_name()).with_repr(value.repr());
        Value::Object(object)
    }

    /// Parse a literal token. `$name` refers to a live object.
    fn literal(&self, token: &str) -> std::result::Result<Value, Interrupt> {
        if let Some(name) = token.strip_prefix('$') {
            return Ok(Value::Object(self.lookup(name)?));
        }
        Ok(parse_literal(token))
    }

    fn run_statements<R: BufRead + ?Sized>(
        &mut self,
        input: &mut R,
        services: &mut RuntimeServices<'_>,
    ) -> Result<ScriptOutcome> {
        let mut line = String::new();
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Ok(ScriptOutcome::Completed);
            }
            match self.execute(&line, services) {
                Ok(()) => {}
                Err(Interrupt::Raised { kind, message }) => {
                    // the loop reports and keeps going
                    let report = format!("{}: {}", kind, message);
                    finish(self.emit(&report))?;
                }
                Err(Interrupt::Host(err)) => return Err(err),
            }
        }
    }
}

impl ScriptHost for ScriptedHost {
    fn name(&self) -> &str {
        "scripted"
    }

    fn initialize(
        &mut self,
        config: &RuntimeConfig,
        services: &mut RuntimeServices<'_>,
    ) -> Result<()> {
        self.hardening = config.hardening;
        self.search_path.clear();
        if !self.hardening.ignore_environment {
            if let Some(extra) = std::env::var_os(SEARCH_PATH_ENV) {
                self.search_path.extend(std::env::split_paths(&extra));
            }
        }

        let sys = self.allocate("module").with_repr("<module 'sys' (built-in)>");
        self.modules.insert("sys".to_string(), sys.clone());
        // raised during start-up, before attribute events can be rendered
        services.audit(
            "object.__setattr__",
            vec![Value::Object(sys), Value::from("path"), self.sys_path_value()],
        )?;

        if !self.hardening.no_site && self.find_module(SITE_MODULE).is_some() {
            if let ScriptOutcome::Raised { kind, message } =
                finish(self.import(SITE_MODULE, services))?
            {
                warn!("{} failed: {}: {}", SITE_MODULE, kind, message);
            }
        }
        info!(
            "Script host '{}' initialized for {} (hardened: {})",
            self.name(),
            config.program_name,
            self.hardening.is_fully_hardened()
        );
        Ok(())
    }

    fn set_argv(&mut self, argv: &[String]) {
        self.argv = argv.to_vec();
    }

    fn run_source(
        &mut self,
        source: ImportSource,
        services: &mut RuntimeServices<'_>,
    ) -> Result<ScriptOutcome> {
        let dir = script_dir(source.path());
        self.search_path.insert(0, dir);
        finish(self.run_body(source, services))
    }

    fn interactive(
        &mut self,
        input: &mut dyn BufRead,
        services: &mut RuntimeServices<'_>,
    ) -> Result<ScriptOutcome> {
        self.search_path.insert(0, PathBuf::from("."));
        self.run_statements(input, services)
    }

    fn finalize(&mut self, _services: &mut RuntimeServices<'_>) -> Result<()> {
        debug!(
            "Finalizing script host: {} module(s), {} object(s)",
            self.modules.len(),
            self.objects.len()
        );
        self.objects.clear();
        self.modules.clear();
        self.output.flush()?;
        Ok(())
    }
}

fn script_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn usage(form: &str) -> Interrupt {
    Interrupt::raise(ExceptionKind::SyntaxError, format!("usage: {}", form))
}

fn words<const N: usize>(rest: &str, form: &str) -> std::result::Result<[String; N], Interrupt> {
    let parts: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
    parts.try_into().map_err(|_| usage(form))
}

fn parse_exception_kind(name: &str) -> ExceptionKind {
    match name {
        "SystemError" => ExceptionKind::SystemError,
        "ValueError" => ExceptionKind::ValueError,
        "TypeError" => ExceptionKind::TypeError,
        "OSError" => ExceptionKind::OsError,
        "ModuleNotFoundError" => ExceptionKind::ModuleNotFoundError,
        "NameError" => ExceptionKind::NameError,
        "SyntaxError" => ExceptionKind::SyntaxError,
        _ => ExceptionKind::RuntimeError,
    }
}

fn decode_hex(hex: &str) -> std::result::Result<Vec<u8>, Interrupt> {
    let invalid = || {
        Interrupt::raise(
            ExceptionKind::ValueError,
            "non-hexadecimal number found in code string",
        )
    };
    if hex.len() % 2 != 0 || !hex.is_ascii() {
        return Err(invalid());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid()))
        .collect()
}

/// Split on whitespace, keeping quoted runs together (quotes included)
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '\'' || c == '"' => {
                current.push(c);
                quote = Some(c);
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn unquote(token: &str) -> Option<&str> {
    let first = token.chars().next()?;
    if (first == '\'' || first == '"') && token.len() >= 2 && token.ends_with(first) {
        Some(&token[1..token.len() - 1])
    } else {
        None
    }
}

fn parse_literal(token: &str) -> Value {
    match token {
        "None" => return Value::None,
        "True" => return Value::Bool(true),
        "False" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = token.parse::<i64>() {
        return Value::Int(i);
    }
    if let Some(inner) = token.strip_prefix('b').and_then(unquote) {
        return Value::Bytes(inner.as_bytes().to_vec());
    }
    match unquote(token) {
        Some(inner) => Value::from(inner),
        None => Value::from(token),
    }
}
