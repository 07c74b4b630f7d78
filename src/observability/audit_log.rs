/// Audit log stream
///
/// The single human-readable sink every policy writes to. One line per
/// audited decision, `<event-name>: <message>`, written and flushed before the
/// verdict is returned so the trail survives an abrupt exit.
///
/// The stream is opened before any hook is wired and closed exactly once.
/// Handles are cheap clones sharing the same sink; the process is
/// single-threaded, so sharing is `Rc<RefCell<_>>` rather than a mutex.
use crate::config::types::{AuditError, Result};
use log::{debug, info};
use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

#[derive(Debug)]
enum Sink {
    File { file: Option<File>, path: PathBuf },
    /// Fallback stream; never closed by the log
    Stderr,
    /// In-memory buffer, kept readable after close
    Buffer(Vec<u8>),
}

#[derive(Debug)]
struct LogState {
    sink: Sink,
    closed: bool,
    lines: usize,
}

/// Shared handle to the audit log stream
#[derive(Clone, Debug)]
pub struct AuditLog {
    state: Rc<RefCell<LogState>>,
}

impl AuditLog {
    fn from_sink(sink: Sink) -> Self {
        Self {
            state: Rc::new(RefCell::new(LogState {
                sink,
                closed: false,
                lines: 0,
            })),
        }
    }

    /// Open (or create) the log file for appending
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| AuditError::LogUnavailable {
                path: path.to_path_buf(),
                source,
            })?;
        info!("Audit log opened at {}", path.display());
        Ok(Self::from_sink(Sink::File {
            file: Some(file),
            path: path.to_path_buf(),
        }))
    }

    pub fn stderr() -> Self {
        Self::from_sink(Sink::Stderr)
    }

    pub fn in_memory() -> Self {
        Self::from_sink(Sink::Buffer(Vec::new()))
    }

    /// Write one `<event>: <message>` record.
    ///
    /// Line breaks inside the message are escaped so every record stays on
    /// a single line.
    pub fn write_line(&self, event: &str, message: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Err(AuditError::LogClosed);
        }
        let line = format!("{}: {}\n", event, escape_line_breaks(message));
        match &mut state.sink {
            Sink::File { file: Some(file), .. } => {
                file.write_all(line.as_bytes())?;
                file.flush()?;
            }
            Sink::File { file: None, .. } => return Err(AuditError::LogClosed),
            Sink::Stderr => {
                let mut err = io::stderr().lock();
                err.write_all(line.as_bytes())?;
                err.flush()?;
            }
            Sink::Buffer(buf) => buf.extend_from_slice(line.as_bytes()),
        }
        state.lines += 1;
        Ok(())
    }

    /// Detach from the stream. A file is closed, the stderr fallback is left
    /// open for the rest of the process. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return;
        }
        if matches!(state.sink, Sink::Stderr) {
            debug!("Audit log is the fallback stream, leaving it open");
            return;
        }
        state.closed = true;
        let lines = state.lines;
        if let Sink::File { file, path } = &mut state.sink {
            // dropping the handle closes the descriptor
            file.take();
            info!("Audit log closed at {} ({} line(s))", path.display(), lines);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.state.borrow().sink, Sink::Stderr)
    }

    /// Send all further records to the stderr fallback stream. Any file
    /// handle held so far is released.
    pub fn redirect_to_stderr(&self) {
        let mut state = self.state.borrow_mut();
        state.sink = Sink::Stderr;
        state.closed = false;
    }

    pub fn path(&self) -> Option<PathBuf> {
        match &self.state.borrow().sink {
            Sink::File { path, .. } => Some(path.clone()),
            _ => None,
        }
    }

    /// Number of records written so far
    pub fn line_count(&self) -> usize {
        self.state.borrow().lines
    }

    /// Contents of an in-memory log
    pub fn contents(&self) -> Option<String> {
        match &self.state.borrow().sink {
            Sink::Buffer(buf) => Some(String::from_utf8_lossy(buf).into_owned()),
            _ => None,
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.contents()
            .map(|text| text.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

fn escape_line_breaks(message: &str) -> std::borrow::Cow<'_, str> {
    if message.contains(['\n', '\r']) {
        message.replace('\n', "\\n").replace('\r', "\\r").into()
    } else {
        message.into()
    }
}
