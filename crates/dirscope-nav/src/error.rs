//! Error types for navigation actions.

use std::io;
use std::path::PathBuf;

use dirscope_cache::CacheError;
use dirscope_core::ScanError;
use thiserror::Error;

/// Errors that can occur while navigating, refreshing or deleting.
#[derive(Debug, Error)]
pub enum NavError {
    /// The current entry could not be checked on disk.
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Permanent removal failed.
    #[error("Failed to delete {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving to the OS trash failed.
    #[error("Failed to move {path} to trash: {source}")]
    Trash {
        path: PathBuf,
        #[source]
        source: trash::Error,
    },

    /// The OS file manager refused the path.
    #[error("Failed to open {path}: {message}")]
    Explore { path: PathBuf, message: String },

    /// The volume list could not be read.
    #[error("Failed to list volumes: {source}")]
    Volumes {
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Scan(#[from] ScanError),
}

impl NavError {
    /// Path the error refers to, when there is one.
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            Self::Stat { path, .. }
            | Self::Delete { path, .. }
            | Self::Trash { path, .. }
            | Self::Explore { path, .. } => Some(path),
            _ => None,
        }
    }
}
