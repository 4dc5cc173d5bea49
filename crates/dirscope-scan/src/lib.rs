//! Directory scanning engine for dirscope.
//!
//! # Overview
//!
//! `dirscope-scan` walks a directory tree and builds the shared [`Entry`]
//! graph. Key pieces:
//!
//! - **Parallel traversal** via a pool of worker threads fed by a bounded
//!   queue, with counting-based completion detection
//! - **Hard-link and bind-mount deduplication** through [`InodeFilter`]
//! - **Default collaborators**: [`FsReader`] for directory listing and
//!   [`MountTable`] for volume discovery
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dirscope_scan::{Entry, FsReader, ScanConfig, Tree};
//!
//! let tree = Tree::new(&ScanConfig::default(), Arc::new(FsReader::new()));
//! tree.set_root(Arc::new(Entry::new_dir("/path/to/scan", 0)));
//!
//! if let Some(handle) = tree.traverse_async() {
//!     for err in handle.wait() {
//!         eprintln!("{err}");
//!     }
//! }
//!
//! println!("Total size: {} bytes", tree.calculate_final_size());
//! ```

mod inode;
mod progress;
mod reader;
mod scanner;
mod tree;
mod volume;

pub use inode::InodeFilter;
pub use progress::ScanProgress;
pub use reader::{FsReader, path_mod_time};
pub use scanner::{ScanHandle, ScanPass, Scanner};
pub use tree::Tree;
pub use volume::{MountPoint, MountTable, select_volumes};

// Re-export core types for convenience
pub use dirscope_core::{
    DirEntryInfo, DirListing, DirectoryReader, Entry, FileId, ScanConfig, ScanError, TopEntries,
    VolumeEnumerator, VolumeInfo,
};
