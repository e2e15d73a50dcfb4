/// Append-only log sinks shared between the supervisor and each worker run.
///
/// The file is opened once with `O_APPEND` and kept for the supervisor's
/// lifetime. Workers get duplicated descriptors of the same open file, so
/// their writes and the supervisor's notices always land at the end.
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Errors from the supervisor's own log infrastructure. Always fatal.
#[derive(Debug)]
pub enum LogStreamError {
    /// Failed to open (or create) the log file.
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to duplicate the handle for a worker.
    Duplicate {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Failed to append a line.
    Append {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for LogStreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogStreamError::Open { path, source } => {
                write!(f, "failed to open log file {}: {}", path.display(), source)
            }
            LogStreamError::Duplicate { path, source } => {
                write!(
                    f,
                    "failed to duplicate handle for log file {}: {}",
                    path.display(),
                    source
                )
            }
            LogStreamError::Append { path, source } => {
                write!(f, "failed to append to log file {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for LogStreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LogStreamError::Open { source, .. } => Some(source),
            LogStreamError::Duplicate { source, .. } => Some(source),
            LogStreamError::Append { source, .. } => Some(source),
        }
    }
}

/// An append-only byte sink backed by a file path.
#[derive(Debug)]
pub struct LogStream {
    path: PathBuf,
    file: File,
}

impl LogStream {
    /// Open `path` for appending, creating it if absent. Never truncates.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LogStreamError> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| LogStreamError::Open {
                path: path.clone(),
                source: e,
            })?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A fresh handle suitable for a child's stdout or stderr.
    pub fn stdio(&self) -> Result<Stdio, LogStreamError> {
        let dup = self
            .file
            .try_clone()
            .map_err(|e| LogStreamError::Duplicate {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(Stdio::from(dup))
    }

    /// Append `line` plus a newline in a single write.
    pub fn append_line(&mut self, line: &str) -> Result<(), LogStreamError> {
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        self.file
            .write_all(buf.as_bytes())
            .and_then(|()| self.file.flush())
            .map_err(|e| LogStreamError::Append {
                path: self.path.clone(),
                source: e,
            })
    }
}
