//! Error types for the opie core library.
//!
//! Every fallible operation returns [`Result`]. Callers that need to decide on
//! an exit status or a retry policy should match on [`Error::kind`] instead of
//! individual variants.

use std::io;
use std::path::PathBuf;

/// Result type alias using the library's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of failures, used by front-ends to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The device, a mount point or an archive file does not exist.
    NotFound,
    /// Something exists but is not what it should be (unrecognised mount,
    /// structurally incomplete archive).
    InvalidState,
    /// Disk full, permission denied, corrupted archive and the like.
    Io,
    /// The user interrupted the operation.
    Cancelled,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A file or directory the operation needs is missing.
    #[error("{what} not found: {}", path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// No mounted volume carries the OP-1 directory layout.
    #[error(
        "Failed to find mount point of OP-1. Make sure it's in DISK mode (shift+COM -> 3) and mounted."
    )]
    DeviceNotFound,

    /// The target path does not look like an OP-1.
    #[error("Invalid mount point: {}. It does not contain the OP-1 directory layout.", path.display())]
    InvalidMount { path: PathBuf },

    /// A backup file that cannot be used as-is (empty, not a regular file).
    #[error("Invalid backup file {}: {reason}", path.display())]
    InvalidBackup { path: PathBuf, reason: String },

    /// An I/O operation failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Extraction failed part-way. The device may hold a partial tree.
    #[error("Failed to restore backup: {source}")]
    Restore {
        #[source]
        source: Box<Error>,
    },

    /// The operation was interrupted through the running flag.
    #[error("Operation cancelled by user")]
    Cancelled,

    /// Neither the platform lookup nor `HOME`/`USERPROFILE` yields a home directory.
    #[error(
        "Could not determine home directory: neither HOME nor USERPROFILE is set. Set OPIE_HOME to choose a location."
    )]
    NoHomeDirectory,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::DeviceNotFound | Error::NoHomeDirectory => {
                ErrorKind::NotFound
            }
            Error::InvalidMount { .. } | Error::InvalidBackup { .. } => ErrorKind::InvalidState,
            Error::Io { .. } => ErrorKind::Io,
            Error::Restore { source } => source.kind(),
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

/// Extension trait for attaching context to `io::Result`s.
pub trait IoResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoResultExt<T> for std::result::Result<T, io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| Error::io(context, source))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::io(f(), source))
    }
}

impl<T> IoResultExt<T> for std::result::Result<T, walkdir::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::io(context, e.into()))
    }

    fn with_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| Error::io(f(), e.into()))
    }
}
