/// Restricted launcher configuration
///
/// The restricted launcher runs with a fixed configuration: every policy
/// enabled and every hardening flag set. Only the log location and the
/// interactive debug switch come from outside.
use crate::config::policy::PolicySet;
use crate::config::types::{AuditError, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable overriding the audit log location
pub const LOG_PATH_ENV: &str = "AUDITBOX_LOG";

/// Suffix appended to the program path when no override is set
pub const LOG_SUFFIX: &str = ".log";

/// Runtime hardening switches applied before the host runtime initializes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct HardeningFlags {
    /// Ignore runtime configuration taken from environment variables
    pub ignore_environment: bool,
    /// Skip site customization entirely
    pub no_site: bool,
    /// Skip the per-user site directory
    pub no_user_site: bool,
    /// Never write compiled artifacts next to sources
    pub dont_write_bytecode: bool,
}

impl HardeningFlags {
    /// Hostile-environment hardening: everything on
    pub const fn locked() -> Self {
        Self {
            ignore_environment: true,
            no_site: true,
            no_user_site: true,
            dont_write_bytecode: true,
        }
    }

    pub fn is_fully_hardened(&self) -> bool {
        *self == Self::locked()
    }
}

/// Resolve the audit log path from an optional override value.
///
/// An unset or empty override falls back to `<program>.log`.
pub fn resolve_log_path(program: &Path, override_value: Option<OsString>) -> PathBuf {
    match override_value {
        Some(value) if !value.is_empty() => PathBuf::from(value),
        _ => {
            let mut path = program.as_os_str().to_os_string();
            path.push(LOG_SUFFIX);
            PathBuf::from(path)
        }
    }
}

/// Launcher configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct LauncherConfig {
    program: PathBuf,
    log_path: PathBuf,
    hardening: HardeningFlags,
    policies: PolicySet,
    interactive: bool,
}

impl LauncherConfig {
    /// Locked configuration, log path taken from `AUDITBOX_LOG` or derived
    /// from the program path.
    pub fn restricted(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let log_path = resolve_log_path(&program, std::env::var_os(LOG_PATH_ENV));
        Self {
            program,
            log_path,
            hardening: HardeningFlags::locked(),
            policies: PolicySet::all(),
            interactive: false,
        }
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    /// Debug variant: statements are read from a stream and policy output goes
    /// to the stderr fallback stream.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn hardening(&self) -> HardeningFlags {
        self.hardening
    }

    pub fn policies(&self) -> &PolicySet {
        &self.policies
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| AuditError::Config(format!("failed to serialize configuration: {e}")))
    }
}
