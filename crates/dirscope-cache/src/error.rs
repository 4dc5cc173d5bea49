//! Error types for cache operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while encoding, decoding or storing scan results.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No cache entry exists for the key. This is the routine miss.
    #[error("no cache entry")]
    NoCache,

    /// The platform has no user cache directory.
    #[error("cache directory is not available on this platform")]
    NoCacheDir,

    /// File-level I/O failure.
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// I/O failure inside the codec stream.
    #[error("cache stream error: {0}")]
    Stream(#[from] io::Error),

    /// The data does not describe a valid tree.
    #[error("malformed cache data: {message}")]
    Malformed { message: String },

    /// The file was written by an unknown format or version.
    #[error("unsupported cache format: magic {magic:?}, version {version}")]
    UnsupportedFormat { magic: [u8; 3], version: u8 },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Whether this is the routine cache miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NoCache)
    }
}
