//! Scan progress reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Progress information for a running or finished scan.
#[derive(Debug, Clone, Default)]
pub struct ScanProgress {
    /// Directories listed so far.
    pub dirs_scanned: u64,
    /// Files attached to the tree so far.
    pub files_scanned: u64,
    /// Sum of the sizes of those files.
    pub bytes_scanned: u64,
    /// Directories that failed to list.
    pub errors_count: u64,
    /// Time elapsed since the scan started.
    pub elapsed: Duration,
}

impl ScanProgress {
    /// Calculate scan rate in files per second.
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files_scanned as f64 / secs
        } else {
            0.0
        }
    }
}

/// Live counters shared by the workers of one scan pass.
#[derive(Debug)]
pub(crate) struct ProgressCounters {
    dirs: AtomicU64,
    files: AtomicU64,
    bytes: AtomicU64,
    errors: AtomicU64,
    started: Instant,
}

impl ProgressCounters {
    pub(crate) fn new() -> Self {
        Self {
            dirs: AtomicU64::new(0),
            files: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            started: Instant::now(),
        }
    }

    pub(crate) fn record_dir(&self) {
        self.dirs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_file(&self, size: u64) {
        self.files.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(size, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Directories processed, successful or not. The stall watchdog polls
    /// this to detect a pass that stopped moving.
    pub(crate) fn processed(&self) -> u64 {
        self.dirs.load(Ordering::Relaxed) + self.errors.load(Ordering::Relaxed)
    }

    pub(crate) fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            dirs_scanned: self.dirs.load(Ordering::Relaxed),
            files_scanned: self.files.load(Ordering::Relaxed),
            bytes_scanned: self.bytes.load(Ordering::Relaxed),
            errors_count: self.errors.load(Ordering::Relaxed),
            elapsed: self.started.elapsed(),
        }
    }
}
