//! Error types for scanning operations.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur during scanning.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Permission denied for a path.
    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    /// Path not found, usually a directory that vanished mid-scan.
    #[error("Path not found: {path}")]
    NotFound { path: PathBuf },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Root path is not a directory.
    #[error("Root path is not a directory: {path}")]
    NotADirectory { path: PathBuf },

    /// Entry name is not valid UTF-8. The entry is left out of the tree.
    #[error("Skipped entry with a non UTF-8 name: {path}")]
    InvalidName { path: PathBuf },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Several listing failures folded into one value.
    #[error("{}", AggregateDisplay(.errors))]
    Aggregate { errors: Vec<ScanError> },
}

impl ScanError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            std::io::ErrorKind::NotFound => Self::NotFound { path },
            _ => Self::Io { path, source },
        }
    }

    /// Fold a list of errors into one. Returns `None` for an empty list and
    /// the error itself when there is exactly one.
    pub fn join(mut errors: Vec<ScanError>) -> Option<Self> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate { errors }),
        }
    }

    /// Path the error refers to, if any.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::PermissionDenied { path }
            | Self::NotFound { path }
            | Self::Io { path, .. }
            | Self::NotADirectory { path }
            | Self::InvalidName { path } => Some(path),
            _ => None,
        }
    }

    /// Number of underlying failures this error represents.
    pub fn count(&self) -> usize {
        match self {
            Self::Aggregate { errors } => errors.iter().map(ScanError::count).sum(),
            _ => 1,
        }
    }
}

struct AggregateDisplay<'a>(&'a [ScanError]);

impl fmt::Display for AggregateDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors during scan", self.0.len())?;
        for err in self.0 {
            write!(f, "\n  {err}")?;
        }
        Ok(())
    }
}
