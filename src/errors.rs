//! Error types for the scanning core.
//!
//! Errors are stage-specific to keep diagnostics precise: buffer access,
//! recorder management, and scanner-set orchestration each have their own
//! enum. All enums are `#[non_exhaustive]` so variants can be added without
//! breaking callers.
//!
//! Recoverable conditions (bounds reads, recorder lookup, unknown scanner
//! names) are expressed as `Result`s. Programmer errors — phase violations,
//! duplicate scanner registration, pedantic feature violations — panic at the
//! call site instead; they indicate driver or scanner bugs, not bad input.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors from buffer access.
#[derive(Debug)]
#[non_exhaustive]
pub enum SbufError {
    /// A typed read or substring would extend past the end of the buffer.
    Range { offset: usize, len: usize, bufsize: usize },
    /// I/O error while mapping or writing buffer bytes.
    Io(io::Error),
    /// A carve or dump target already exists (exclusive-create failed).
    TargetExists(PathBuf),
}

impl fmt::Display for SbufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Range { offset, len, bufsize } => {
                write!(f, "read past end of sbuf: offset={offset} len={len} bufsize={bufsize}")
            }
            Self::Io(err) => write!(f, "sbuf I/O error: {err}"),
            Self::TargetExists(path) => {
                write!(f, "dump target already exists: {}", path.display())
            }
        }
    }
}

impl std::error::Error for SbufError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SbufError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from feature-recorder creation, lookup, and output.
#[derive(Debug)]
#[non_exhaustive]
pub enum RecorderError {
    /// A recorder with this name already exists in the set.
    DuplicateRecorder(String),
    /// No recorder with this name exists in the set.
    NoSuchRecorder(String),
    /// Both the file and SQL backends were requested; exactly one must be.
    BackendConflict,
    /// Neither the file nor the SQL backend was requested.
    NoBackend,
    /// The hash algorithm name is not one of md5/sha1/sha256.
    InvalidHashName(String),
    /// The output directory could not be created.
    CannotCreateOutdir { path: PathBuf, source: io::Error },
    /// The output directory exists but is not writable.
    OutdirNotWritable(PathBuf),
    /// A stop-list was configured without the recorders it needs: the
    /// alerts recorder is suppressed, or the stoplist recorder could not be
    /// created.
    StopListRecorder(String),
    /// A histogram projection pattern failed to compile.
    BadHistogramPattern { pattern: String, detail: String },
    /// I/O failure in a recorder sink or during carving.
    Io(io::Error),
}

impl fmt::Display for RecorderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateRecorder(name) => write!(f, "feature recorder already exists: {name}"),
            Self::NoSuchRecorder(name) => write!(f, "no such feature recorder: {name}"),
            Self::BackendConflict => {
                write!(f, "can only record to files or SQL, not both")
            }
            Self::NoBackend => write!(f, "must record to either files or SQL"),
            Self::InvalidHashName(name) => write!(f, "invalid hasher name: {name}"),
            Self::CannotCreateOutdir { path, source } => {
                write!(f, "could not create directory {}: {source}", path.display())
            }
            Self::OutdirNotWritable(path) => {
                write!(f, "output directory {} not writable", path.display())
            }
            Self::StopListRecorder(detail) => {
                write!(f, "stop-list divergence: {detail}")
            }
            Self::BadHistogramPattern { pattern, detail } => {
                write!(f, "bad histogram pattern {pattern:?}: {detail}")
            }
            Self::Io(err) => write!(f, "recorder I/O error: {err}"),
        }
    }
}

impl std::error::Error for RecorderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::CannotCreateOutdir { source, .. } => Some(source),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RecorderError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Errors from scanner-set orchestration.
#[derive(Debug)]
#[non_exhaustive]
pub enum ScannerSetError {
    /// An enable/disable command named a scanner that is not registered.
    NoSuchScanner(String),
    /// Recorder-set failure while applying commands or shutting down.
    Recorder(RecorderError),
}

impl fmt::Display for ScannerSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSuchScanner(name) => write!(f, "no such scanner: {name}"),
            Self::Recorder(err) => write!(f, "recorder set: {err}"),
        }
    }
}

impl std::error::Error for ScannerSetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Recorder(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RecorderError> for ScannerSetError {
    fn from(err: RecorderError) -> Self {
        Self::Recorder(err)
    }
}

/// Error returned by a scanner from its `scan` hook.
///
/// Scan errors are contained by the dispatch loop: they are written to the
/// alert recorder and never propagate to sibling scanners or the caller.
#[derive(Debug)]
#[non_exhaustive]
pub enum ScanError {
    Sbuf(SbufError),
    Recorder(RecorderError),
    Io(io::Error),
    /// Scanner-specific failure with a human-readable description.
    Failed(String),
}

impl ScanError {
    /// Creates a scanner-specific failure.
    pub fn failed(detail: impl Into<String>) -> Self {
        Self::Failed(detail.into())
    }
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sbuf(err) => write!(f, "{err}"),
            Self::Recorder(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Failed(detail) => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for ScanError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sbuf(err) => Some(err),
            Self::Recorder(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Failed(_) => None,
        }
    }
}

impl From<SbufError> for ScanError {
    fn from(err: SbufError) -> Self {
        Self::Sbuf(err)
    }
}

impl From<RecorderError> for ScanError {
    fn from(err: RecorderError) -> Self {
        Self::Recorder(err)
    }
}

impl From<io::Error> for ScanError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
