/// Restricted Import Gate
///
/// Consulted whenever the runtime opens a source file to load code from it.
/// Only files with the trusted source extension may be opened. The decision
/// is always raised as `auditbox.open_for_import` first, so every open
/// attempt, allowed or not, is in the audit trail.
use crate::config::types::{AuditError, Result};
use crate::dispatch::Dispatcher;
use crate::events::schema::AuditEvent;
use log::{debug, warn};
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// The one extension the gate lets through, compared case-insensitively
pub const TRUSTED_SOURCE_EXTENSION: &str = "py";

/// The gate's decision for a single open request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportDecision {
    pub path: PathBuf,
    pub allowed: bool,
}

impl ImportDecision {
    /// Extension allow-list check. Looks at the text after the last `.` of
    /// the final path component only; a path without one is refused. A bare
    /// `.py` counts as having the extension.
    pub fn evaluate(path: &Path) -> Self {
        let allowed = path
            .file_name()
            .and_then(|name| {
                name.to_string_lossy()
                    .rsplit_once('.')
                    .map(|(_, ext)| ext.eq_ignore_ascii_case(TRUSTED_SOURCE_EXTENSION))
            })
            .unwrap_or(false);
        Self {
            path: path.to_path_buf(),
            allowed,
        }
    }

    pub fn to_event(&self) -> AuditEvent {
        AuditEvent::OpenForImport {
            path: self.path.to_string_lossy().into_owned(),
            allowed: self.allowed,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ImportGate;

impl ImportGate {
    pub fn new() -> Self {
        Self
    }

    /// Open `path` for import.
    ///
    /// Fails with the hook's denial if the decision event is vetoed, and with
    /// `AccessDenied` when the extension is not allowed. A refused path is
    /// never touched on disk.
    pub fn open(&self, dispatcher: &Dispatcher, path: impl AsRef<Path>) -> Result<ImportSource> {
        let decision = ImportDecision::evaluate(path.as_ref());
        dispatcher.raise_event(&decision.to_event()).into_result()?;

        if !decision.allowed {
            warn!("Import gate refused {}", decision.path.display());
            return Err(AuditError::AccessDenied {
                path: decision.path,
            });
        }
        debug!("Import gate opening {}", decision.path.display());
        ImportSource::open_unrestricted(decision.path)
    }
}

/// An open source file handed back to the runtime
#[derive(Debug)]
pub struct ImportSource {
    path: PathBuf,
    file: File,
}

impl ImportSource {
    /// Open without consulting the gate. Read-only, not inherited across
    /// exec, and never acquires a controlling terminal.
    pub fn open_unrestricted(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = open_shared_read(&path)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_to_string(mut self) -> Result<String> {
        let mut text = String::new();
        self.file.read_to_string(&mut text)?;
        Ok(text)
    }
}

impl Read for ImportSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

#[cfg(unix)]
fn open_shared_read(path: &Path) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_CLOEXEC | libc::O_NOCTTY)
        .open(path)?;

    // SAFETY: the descriptor is owned by `file` and stays open for the call.
    let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
    if rc != 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::WouldBlock {
            return Err(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("{} is locked for writing", path.display()),
            ));
        }
        // filesystems without advisory locks still get read-only access
        warn!("Could not take shared lock on {}: {}", path.display(), err);
    }
    Ok(file)
}

#[cfg(windows)]
fn open_shared_read(path: &Path) -> io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;

    const FILE_SHARE_READ: u32 = 0x0000_0001;
    OpenOptions::new()
        .read(true)
        .share_mode(FILE_SHARE_READ)
        .open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::ExceptionKind;
    use crate::dispatch::registry::HookRegistration;
    use crate::dispatch::verdict::Verdict;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_extension_rules() {
        let cases = [
            ("script.py", true),
            ("SCRIPT.PY", true),
            ("pkg/mod.Py", true),
            ("notes.txt", false),
            ("archive.py.zip", false),
            ("Makefile", false),
            ("dir.py/readme", false),
            (".py", true),
            ("pkg/.PY", true),
            ("pkg/py", false),
            ("trailing.", false),
        ];
        for (path, allowed) in cases {
            assert_eq!(
                ImportDecision::evaluate(Path::new(path)).allowed,
                allowed,
                "{path}"
            );
        }
    }

    fn recording_dispatcher() -> (Dispatcher, Rc<RefCell<Vec<AuditEvent>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(HookRegistration::new(
                "record",
                |event, seen: &Rc<RefCell<Vec<AuditEvent>>>| {
                    seen.borrow_mut().push(event.clone());
                    Ok(Verdict::Allow)
                },
                Rc::clone(&seen),
            ))
            .unwrap();
        (dispatcher, seen)
    }

    #[test]
    fn test_refused_path_raises_event_and_skips_disk() {
        let (dispatcher, seen) = recording_dispatcher();
        // the file does not exist; a refused path must not be opened at all
        let err = ImportGate::new()
            .open(&dispatcher, "/nonexistent/data.txt")
            .unwrap_err();
        assert!(matches!(err, AuditError::AccessDenied { .. }));
        assert_eq!(err.as_exception().0, ExceptionKind::OsError);
        assert_eq!(
            *seen.borrow(),
            [AuditEvent::OpenForImport {
                path: "/nonexistent/data.txt".to_string(),
                allowed: false
            }]
        );
    }

    #[test]
    fn test_allowed_path_is_opened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "print hello\n").unwrap();

        let (dispatcher, seen) = recording_dispatcher();
        let source = ImportGate::new().open(&dispatcher, &path).unwrap();
        assert_eq!(source.path(), path.as_path());
        assert_eq!(source.read_to_string().unwrap(), "print hello\n");
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_vetoed_decision_blocks_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mod.py");
        std::fs::write(&path, "").unwrap();

        let mut dispatcher = Dispatcher::new();
        dispatcher
            .register(HookRegistration::from_fn("deny", |_| {
                Ok(Verdict::deny(ExceptionKind::RuntimeError, "imports frozen"))
            }))
            .unwrap();
        let err = ImportGate::new().open(&dispatcher, &path).unwrap_err();
        assert_eq!(
            err.as_exception(),
            (ExceptionKind::RuntimeError, "imports frozen".to_string())
        );
    }

    #[test]
    fn test_missing_allowed_file_is_io_error() {
        let dispatcher = Dispatcher::new();
        let err = ImportGate::new()
            .open(&dispatcher, "/nonexistent/mod.py")
            .unwrap_err();
        assert!(matches!(err, AuditError::Io(_)));
    }
}
