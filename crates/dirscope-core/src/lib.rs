//! Core types and traits for dirscope.
//!
//! This crate provides the in-memory filesystem model shared by the rest of
//! the workspace: [`Entry`] nodes with their aggregation rules, the bounded
//! top-K trackers, scan-time and view-time filters, scan configuration, the
//! error taxonomy, and the collaborator traits through which the scanner
//! reaches the operating system.

mod config;
mod entry;
mod error;
mod filter;
mod fs;
mod top;

pub use config::{ScanConfig, ScanConfigBuilder, parse_size_limit};
pub use entry::{Entry, EntryRecord, join_path};
pub use error::ScanError;
pub use filter::{
    DirsOnly, EmptyDirs, EntryFilter, FileFilters, FileInfoFilter, FilesOnly, FilterId,
    FilterList, HiddenFilter, NameFilter, SizeFilter,
};
pub use fs::{DirEntryInfo, DirListing, DirectoryReader, FileId, VolumeEnumerator, VolumeInfo};
pub use top::{DEFAULT_MAX_TOP_ENTRIES, EntrySizeHeap, TopEntries};
