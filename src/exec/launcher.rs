//! Restricted launcher lifecycle
//!
//! The lifecycle is fixed and must not be reordered:
//! 1. open the audit log stream (fatal if it cannot be opened)
//! 2. apply the hardening flags
//! 3. register the policy hook set and install the import gate
//! 4. lock the hook registry
//! 5. initialize the runtime, then mark start-up complete
//! 6. hand off program arguments
//! 7. run exactly one script (or the debug statement loop)
//! 8. finalize the runtime, clear the hooks, close the log
//!
//! Each step is a type-state transition, so skipping one does not compile:
//!
//! ```compile_fail
//! use auditbox::config::launcher::LauncherConfig;
//! use auditbox::exec::launcher::Launcher;
//! use auditbox::runtime::ScriptedHost;
//!
//! let launcher = Launcher::new(LauncherConfig::restricted("auditbox"), Box::new(ScriptedHost::new()));
//! // scripts only run once the registry is locked
//! launcher.run_script(std::path::Path::new("script.py"));
//! ```
//!
//! ```compile_fail
//! use auditbox::config::launcher::LauncherConfig;
//! use auditbox::exec::launcher::Launcher;
//! use auditbox::runtime::ScriptedHost;
//!
//! let launcher = Launcher::new(LauncherConfig::restricted("auditbox"), Box::new(ScriptedHost::new()))
//!     .bootstrap()
//!     .unwrap();
//! launcher.run_script(std::path::Path::new("script.py"));
//! ```

use crate::config::launcher::LauncherConfig;
use crate::config::types::{ExceptionKind, Result};
use crate::dispatch::Dispatcher;
use crate::gate::ImportGate;
use crate::observability::audit_log::AuditLog;
use crate::policy::PolicyHookSet;
use crate::runtime::{RuntimeConfig, RuntimeServices, RuntimeState, ScriptHost, ScriptOutcome};
use log::{debug, error, info, warn};
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// Type-state marker: nothing opened yet
pub struct Unconfigured;

/// Type-state: log stream open, hooks not yet registered
pub struct Bootstrapping {
    log: AuditLog,
}

/// Type-state: registry locked, runtime initialized
pub struct LockedRunning {
    log: AuditLog,
    gate: ImportGate,
}

/// Type-state: runtime finalized, hooks cleared
pub struct Terminated {
    status: LaunchStatus,
}

/// How the launch ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchStatus {
    Completed,
    /// The script stopped on an unhandled error, denials included
    ScriptFailed { kind: ExceptionKind, message: String },
    /// The script could not be opened through the import gate
    SourceUnavailable { path: PathBuf, reason: String },
    HostFailed(String),
}

impl LaunchStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchStatus::Completed => 0,
            _ => 1,
        }
    }
}

pub struct Launcher<S> {
    config: LauncherConfig,
    host: Box<dyn ScriptHost>,
    dispatcher: Dispatcher,
    runtime: RuntimeState,
    state: S,
}

impl<S> Launcher<S> {
    pub fn config(&self) -> &LauncherConfig {
        &self.config
    }

    fn into_state<T>(self, state: T) -> Launcher<T> {
        Launcher {
            config: self.config,
            host: self.host,
            dispatcher: self.dispatcher,
            runtime: self.runtime,
            state,
        }
    }
}

impl Launcher<Unconfigured> {
    pub fn new(config: LauncherConfig, host: Box<dyn ScriptHost>) -> Self {
        Self {
            config,
            host,
            dispatcher: Dispatcher::new(),
            runtime: RuntimeState::new(),
            state: Unconfigured,
        }
    }

    /// Open the configured log file and enter bootstrap.
    ///
    /// In interactive mode the file is still opened, so an unwritable log
    /// remains fatal, but records go to the stderr fallback stream.
    pub fn bootstrap(self) -> Result<Launcher<Bootstrapping>> {
        let log = AuditLog::open(self.config.log_path())?;
        if self.config.interactive() {
            info!("Interactive mode: audit records go to stderr");
            log.redirect_to_stderr();
        }
        Ok(self.bootstrap_with_log(log))
    }

    /// Enter bootstrap with a log stream the caller already opened
    pub fn bootstrap_with_log(self, log: AuditLog) -> Launcher<Bootstrapping> {
        let hardening = self.config.hardening();
        info!(
            "Bootstrapping {} (ignore_environment={}, no_site={}, no_user_site={}, dont_write_bytecode={})",
            self.config.program_name(),
            hardening.ignore_environment,
            hardening.no_site,
            hardening.no_user_site,
            hardening.dont_write_bytecode
        );
        if !hardening.is_fully_hardened() {
            warn!("Launcher running without full hardening");
        }
        self.into_state(Bootstrapping { log })
    }
}

impl Launcher<Bootstrapping> {
    pub fn log(&self) -> &AuditLog {
        &self.state.log
    }

    /// Wire the policies, lock the registry and bring the runtime up.
    ///
    /// A runtime that fails to initialize still gets its hooks cleared and
    /// the log closed before the error is returned.
    pub fn lock(mut self, argv: &[String]) -> Result<Launcher<LockedRunning>> {
        let hooks = PolicyHookSet::new(
            self.config.policies(),
            self.state.log.clone(),
            self.runtime.clone(),
        );
        self.dispatcher.register(hooks.into_registration())?;
        let gate = ImportGate::new();
        self.dispatcher.lock();

        let runtime_config = RuntimeConfig {
            program_name: self.config.program_name(),
            hardening: self.config.hardening(),
        };
        let initialized = {
            let mut services = RuntimeServices::new(&mut self.dispatcher, gate);
            self.host.initialize(&runtime_config, &mut services)
        };
        if let Err(err) = initialized {
            error!("Runtime '{}' failed to initialize: {}", self.host.name(), err);
            let log = self.state.log.clone();
            std::mem::take(&mut self.dispatcher).clear();
            log.close();
            return Err(err);
        }

        self.runtime.mark_initialized();
        self.host.set_argv(argv);
        debug!("Runtime '{}' ready with {} argument(s)", self.host.name(), argv.len());

        let log = self.state.log.clone();
        Ok(self.into_state(LockedRunning { log, gate }))
    }
}

impl Launcher<LockedRunning> {
    pub fn log(&self) -> &AuditLog {
        &self.state.log
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Open the script through the import gate and run it to completion
    pub fn run_script(mut self, path: &Path) -> Launcher<Terminated> {
        let status = {
            let mut services = RuntimeServices::new(&mut self.dispatcher, self.state.gate);
            match services.open_for_import(path) {
                Err(err) => {
                    warn!("Cannot open script {}: {}", path.display(), err);
                    LaunchStatus::SourceUnavailable {
                        path: path.to_path_buf(),
                        reason: err.to_string(),
                    }
                }
                Ok(source) => {
                    info!("Running script {}", path.display());
                    status_of(self.host.run_source(source, &mut services))
                }
            }
        };
        self.finalize(status)
    }

    /// Debug statement loop over `input` instead of a script file
    pub fn interactive(mut self, input: &mut dyn BufRead) -> Launcher<Terminated> {
        let status = {
            let mut services = RuntimeServices::new(&mut self.dispatcher, self.state.gate);
            status_of(self.host.interactive(input, &mut services))
        };
        self.finalize(status)
    }

    fn finalize(mut self, status: LaunchStatus) -> Launcher<Terminated> {
        {
            let mut services = RuntimeServices::new(&mut self.dispatcher, self.state.gate);
            if let Err(err) = self.host.finalize(&mut services) {
                error!("Runtime '{}' failed to finalize: {}", self.host.name(), err);
            }
        }
        let cleared = std::mem::take(&mut self.dispatcher).clear();
        self.state.log.close();
        info!(
            "Launcher terminated with exit code {} after clearing {} hook(s)",
            status.exit_code(),
            cleared
        );
        self.into_state(Terminated { status })
    }
}

impl Launcher<Terminated> {
    pub fn status(&self) -> &LaunchStatus {
        &self.state.status
    }

    pub fn exit_code(&self) -> i32 {
        self.state.status.exit_code()
    }

    pub fn into_status(self) -> LaunchStatus {
        self.state.status
    }
}

fn status_of(outcome: Result<ScriptOutcome>) -> LaunchStatus {
    match outcome {
        Ok(ScriptOutcome::Completed) => LaunchStatus::Completed,
        Ok(ScriptOutcome::Raised { kind, message }) => {
            LaunchStatus::ScriptFailed { kind, message }
        }
        Err(err) => LaunchStatus::HostFailed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::AuditError;
    use crate::runtime::ScriptedHost;
    use std::fs;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    fn locked(log: &AuditLog) -> Launcher<LockedRunning> {
        let config = LauncherConfig::restricted("auditbox").with_log_path("unused.log");
        Launcher::new(config, Box::new(ScriptedHost::with_output(Box::new(std::io::sink()))))
            .bootstrap_with_log(log.clone())
            .lock(&["script.py".to_string()])
            .unwrap()
    }

    #[test]
    fn test_clean_run_ends_with_closing_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "ok.py", "print hi\n");
        let log = AuditLog::in_memory();

        let launcher = locked(&log);
        assert!(launcher.dispatcher().is_locked());
        let done = launcher.run_script(&path);

        assert_eq!(done.status(), &LaunchStatus::Completed);
        assert_eq!(done.exit_code(), 0);
        let lines = log.lines();
        assert_eq!(
            lines.first().map(String::as_str),
            Some(format!("auditbox.open_for_import: '{}'; allowed = True", path.display()).as_str())
        );
        assert_eq!(
            lines.last().map(String::as_str),
            Some("sys._clearaudithooks: closing log")
        );
        assert!(log.is_closed());
    }

    #[test]
    fn test_denied_operation_fails_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "evil.py", "system echo pwned\nprint after\n");
        let log = AuditLog::in_memory();

        let done = locked(&log).run_script(&path);
        assert_eq!(
            done.status(),
            &LaunchStatus::ScriptFailed {
                kind: ExceptionKind::RuntimeError,
                message: "system() is disallowed".to_string()
            }
        );
        assert_eq!(done.exit_code(), 1);
        let lines = log.lines();
        let n = lines.len();
        assert_eq!(lines[n - 2], "system: echo pwned");
        assert_eq!(lines[n - 1], "sys._clearaudithooks: closing log");
    }

    #[test]
    fn test_script_with_wrong_extension_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = script(dir.path(), "notes.txt", "print hi\n");
        let log = AuditLog::in_memory();

        let done = locked(&log).run_script(&path);
        assert!(matches!(done.status(), LaunchStatus::SourceUnavailable { .. }));
        assert_eq!(
            log.lines(),
            [
                format!("auditbox.open_for_import: '{}'; allowed = False", path.display()),
                "sys._clearaudithooks: closing log".to_string(),
            ]
        );
    }

    #[test]
    fn test_interactive_loop_keeps_log_open_on_fallback() {
        let log = AuditLog::stderr();
        let mut input: &[u8] = b"print hi\nid sys\n";
        let done = locked(&log).interactive(&mut input);
        assert_eq!(done.status(), &LaunchStatus::Completed);
        assert!(!log.is_closed());
    }

    #[test]
    fn test_bootstrap_fails_when_log_cannot_open() {
        let dir = tempfile::tempdir().unwrap();
        let config = LauncherConfig::restricted("auditbox").with_log_path(dir.path());
        let result = Launcher::new(config, Box::new(ScriptedHost::new())).bootstrap();
        assert!(matches!(result, Err(AuditError::LogUnavailable { .. })));
    }

    struct BrokenHost;

    impl ScriptHost for BrokenHost {
        fn name(&self) -> &str {
            "broken"
        }

        fn initialize(
            &mut self,
            _config: &RuntimeConfig,
            _services: &mut RuntimeServices<'_>,
        ) -> Result<()> {
            Err(AuditError::Runtime("no interpreter".to_string()))
        }

        fn set_argv(&mut self, _argv: &[String]) {}

        fn run_source(
            &mut self,
            _source: crate::gate::ImportSource,
            _services: &mut RuntimeServices<'_>,
        ) -> Result<ScriptOutcome> {
            Ok(ScriptOutcome::Completed)
        }

        fn interactive(
            &mut self,
            _input: &mut dyn BufRead,
            _services: &mut RuntimeServices<'_>,
        ) -> Result<ScriptOutcome> {
            Ok(ScriptOutcome::Completed)
        }

        fn finalize(&mut self, _services: &mut RuntimeServices<'_>) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_failed_initialization_still_clears_hooks() {
        let log = AuditLog::in_memory();
        let config = LauncherConfig::restricted("auditbox").with_log_path("unused.log");
        let result = Launcher::new(config, Box::new(BrokenHost))
            .bootstrap_with_log(log.clone())
            .lock(&[]);
        assert!(matches!(result, Err(AuditError::Runtime(_))));
        assert_eq!(log.lines(), ["sys._clearaudithooks: closing log"]);
        assert!(log.is_closed());
    }
}
