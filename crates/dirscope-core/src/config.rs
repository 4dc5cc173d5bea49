//! Scan configuration types.

use std::path::PathBuf;
use std::time::Duration;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;
use crate::filter::{FileFilters, HiddenFilter, SizeFilter};
use crate::top::DEFAULT_MAX_TOP_ENTRIES;

/// Configuration for scanning operations.
#[derive(Debug, Clone, Builder, Serialize, Deserialize)]
#[builder(setter(into), build_fn(validate = "Self::validate"))]
pub struct ScanConfig {
    /// Fixed root to scan at startup (None = start at the volume list).
    #[builder(default)]
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Exclude rules: case-insensitive substrings or absolute paths.
    #[builder(default)]
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Smallest file size kept, in bytes.
    #[builder(default)]
    #[serde(default)]
    pub min_file_size: Option<u64>,

    /// Largest file size kept, in bytes.
    #[builder(default)]
    #[serde(default)]
    pub max_file_size: Option<u64>,

    /// Include hidden files (starting with .).
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub include_hidden: bool,

    /// Seed trees from the on-disk cache and persist finished scans.
    #[builder(default = "false")]
    #[serde(default)]
    pub use_cache: bool,

    /// Compress cache files.
    #[builder(default = "true")]
    #[serde(default = "default_true")]
    pub compress_cache: bool,

    /// Number of scanner workers (0 = auto-detect).
    #[builder(default = "0")]
    #[serde(default)]
    pub workers: usize,

    /// Capacity of the shared directory queue.
    #[builder(default = "64")]
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Poll interval of the completion watcher, in milliseconds.
    #[builder(default = "50")]
    #[serde(default = "default_idle_tick")]
    pub idle_tick_ms: u64,

    /// Give up on a scan that made no progress for this long, in milliseconds.
    #[builder(default = "120_000")]
    #[serde(default = "default_stall_timeout")]
    pub stall_timeout_ms: u64,

    /// Number of entries kept by each top-K tracker.
    #[builder(default = "DEFAULT_MAX_TOP_ENTRIES")]
    #[serde(default = "default_top_entries")]
    pub top_entries: usize,
}

fn default_true() -> bool {
    true
}

fn default_queue_capacity() -> usize {
    64
}

fn default_idle_tick() -> u64 {
    50
}

fn default_stall_timeout() -> u64 {
    120_000
}

fn default_top_entries() -> usize {
    DEFAULT_MAX_TOP_ENTRIES
}

impl ScanConfigBuilder {
    fn validate(&self) -> Result<(), String> {
        if let (Some(Some(min)), Some(Some(max))) = (self.min_file_size, self.max_file_size) {
            if max != 0 && min > max {
                return Err("min file size is bigger than max file size".to_string());
            }
        }
        if self.queue_capacity == Some(0) {
            return Err("queue capacity must be positive".to_string());
        }
        if self.top_entries == Some(0) {
            return Err("top entries must be positive".to_string());
        }
        Ok(())
    }
}

impl ScanConfig {
    /// Create a new scan config builder.
    pub fn builder() -> ScanConfigBuilder {
        ScanConfigBuilder::default()
    }

    /// Create a simple config scanning a fixed root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
            ..Self::default()
        }
    }

    /// Normalized exclude rules: trimmed, lowercase, empty rules dropped.
    pub fn exclude_rules(&self) -> Vec<String> {
        self.exclude
            .iter()
            .map(|rule| rule.trim().to_lowercase())
            .filter(|rule| !rule.is_empty())
            .collect()
    }

    /// Scan-time filter chain derived from the size and hidden-file options.
    pub fn file_filters(&self) -> FileFilters {
        let mut filters = FileFilters::new();

        if self.min_file_size.is_some() || self.max_file_size.is_some() {
            filters.push(SizeFilter::new(
                self.min_file_size.unwrap_or(0),
                self.max_file_size.unwrap_or(0),
            ));
        }

        if !self.include_hidden {
            filters.push(HiddenFilter);
        }

        filters
    }

    /// Effective worker count. Directory listing is I/O-bound, so auto mode
    /// oversubscribes the CPUs by two.
    pub fn worker_count(&self) -> usize {
        match self.workers {
            0 => num_cpus::get().max(1) * 2,
            n => n,
        }
    }

    pub fn idle_tick(&self) -> Duration {
        Duration::from_millis(self.idle_tick_ms.max(1))
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms)
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            root: None,
            exclude: Vec::new(),
            min_file_size: None,
            max_file_size: None,
            include_hidden: true,
            use_cache: false,
            compress_cache: true,
            workers: 0,
            queue_capacity: default_queue_capacity(),
            idle_tick_ms: default_idle_tick(),
            stall_timeout_ms: default_stall_timeout(),
            top_entries: DEFAULT_MAX_TOP_ENTRIES,
        }
    }
}

/// Parse a `min:max` size limit such as `10mb:2gb`, `:1gb` or `512kb:`.
///
/// Units are `kb`, `mb`, `gb`, `tb` and `pb` (powers of 1024). An empty side
/// means no bound and is returned as `None`.
pub fn parse_size_limit(raw: &str) -> Result<(Option<u64>, Option<u64>), ScanError> {
    let raw = raw.trim();
    let (min, max) = raw.split_once(':').ok_or_else(|| ScanError::InvalidConfig {
        message: format!("size limit must look like min:max, got {raw:?}"),
    })?;

    let min = parse_size(min)?;
    let max = parse_size(max)?;

    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(ScanError::InvalidConfig {
                message: "min value is bigger than max value".to_string(),
            });
        }
    }

    Ok((min, max))
}

fn parse_size(raw: &str) -> Result<Option<u64>, ScanError> {
    let raw = raw.trim().to_lowercase();
    if raw.is_empty() {
        return Ok(None);
    }

    let invalid = || ScanError::InvalidConfig {
        message: format!("invalid size value: {raw}"),
    };

    if raw.len() < 3 {
        return Err(invalid());
    }

    let (number, unit) = raw.split_at(raw.len() - 2);
    let shift = match unit {
        "kb" => 10,
        "mb" => 20,
        "gb" => 30,
        "tb" => 40,
        "pb" => 50,
        _ => return Err(invalid()),
    };

    let value: u64 = number.trim().parse().map_err(|_| invalid())?;
    value.checked_shl(shift).filter(|v| v >> shift == value).map(Some).ok_or_else(invalid)
}
