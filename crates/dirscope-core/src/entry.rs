//! File and directory entries.
//!
//! An [`Entry`] is shared between scanner workers, the size aggregator and
//! whoever renders the tree, so every mutable field is either atomic or
//! behind the entry's own lock. Entries are handed around as `Arc<Entry>`;
//! a parent owns its children through its child list.

use std::fmt;
use std::path::MAIN_SEPARATOR;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::fs::FileId;

/// Plain-data view of a single entry, without its children.
///
/// Used by the cache codec to persist and restore entries field by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryRecord {
    pub path: String,
    pub is_dir: bool,
    pub mod_time: i64,
    pub size: u64,
    pub local_dirs: u64,
    pub local_files: u64,
    pub total_dirs: u64,
    pub total_files: u64,
}

/// A single file or directory in the tree.
pub struct Entry {
    /// Full path of the file or directory.
    path: String,

    /// Directory flag, fixed at construction.
    is_dir: bool,

    /// Last modification time, seconds since the Unix epoch.
    mod_time: i64,

    /// Physical identity as seen by the scan that created the entry.
    id: Option<FileId>,

    /// Own length for files, aggregated descendant file sizes for directories.
    size: AtomicU64,

    local_dirs: AtomicU64,
    local_files: AtomicU64,
    total_dirs: AtomicU64,
    total_files: AtomicU64,

    /// Children in discovery order. Always empty for files.
    children: RwLock<Vec<Arc<Entry>>>,

    /// Held while this entry's counters are being recomputed.
    calculating: Mutex<()>,
}

impl Entry {
    /// Create a new directory entry. Its size starts at zero and is filled in
    /// by [`Entry::calculate_size`].
    pub fn new_dir(path: impl Into<String>, mod_time: i64) -> Self {
        Self::with_parts(path.into(), true, mod_time, 0)
    }

    /// Create a new file entry.
    pub fn new_file(path: impl Into<String>, size: u64, mod_time: i64) -> Self {
        Self::with_parts(path.into(), false, mod_time, size)
    }

    fn with_parts(path: String, is_dir: bool, mod_time: i64, size: u64) -> Self {
        Self {
            path,
            is_dir,
            mod_time,
            id: None,
            size: AtomicU64::new(size),
            local_dirs: AtomicU64::new(0),
            local_files: AtomicU64::new(0),
            total_dirs: AtomicU64::new(0),
            total_files: AtomicU64::new(0),
            children: RwLock::new(Vec::new()),
            calculating: Mutex::new(()),
        }
    }

    /// Attach the physical identity reported by the directory reader.
    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = Some(id);
        self
    }

    /// Rebuild an entry from a stored record and already-restored children.
    ///
    /// Counters are taken from the record as-is; call
    /// [`Entry::calculate_size`] if they need to be recomputed.
    pub fn from_record(record: EntryRecord, children: Vec<Arc<Entry>>) -> Self {
        let entry = Self::with_parts(record.path, record.is_dir, record.mod_time, record.size);
        entry.local_dirs.store(record.local_dirs, Ordering::Relaxed);
        entry.local_files.store(record.local_files, Ordering::Relaxed);
        entry.total_dirs.store(record.total_dirs, Ordering::Relaxed);
        entry.total_files.store(record.total_files, Ordering::Relaxed);
        *entry.children.write() = children;
        entry
    }

    /// Snapshot of this entry's own fields.
    pub fn record(&self) -> EntryRecord {
        EntryRecord {
            path: self.path.clone(),
            is_dir: self.is_dir,
            mod_time: self.mod_time,
            size: self.size(),
            local_dirs: self.local_dirs(),
            local_files: self.local_files(),
            total_dirs: self.total_dirs(),
            total_files: self.total_files(),
        }
    }

    /// Full path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path segment. Roots such as `/` are returned unchanged.
    pub fn name(&self) -> &str {
        let trimmed = self.path.trim_end_matches(is_separator);
        if trimmed.is_empty() {
            return &self.path;
        }

        match trimmed.rfind(is_separator) {
            Some(idx) => &trimmed[idx + 1..],
            None => trimmed,
        }
    }

    /// Lowercase extension of the name, empty when there is none.
    pub fn ext(&self) -> String {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => name[idx + 1..].to_lowercase(),
            _ => String::new(),
        }
    }

    /// Check if this entry is a directory.
    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    /// Check if this entry is a file.
    pub fn is_file(&self) -> bool {
        !self.is_dir
    }

    /// Device and inode, when the scan that created the entry knew them.
    /// Entries restored from the cache have none.
    pub fn id(&self) -> Option<FileId> {
        self.id
    }

    /// Modification time in seconds since the Unix epoch.
    pub fn mod_time(&self) -> i64 {
        self.mod_time
    }

    /// Modification time as a UTC timestamp.
    pub fn modified(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.mod_time, 0)
    }

    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Relaxed)
    }

    pub fn local_dirs(&self) -> u64 {
        self.local_dirs.load(Ordering::Relaxed)
    }

    pub fn local_files(&self) -> u64 {
        self.local_files.load(Ordering::Relaxed)
    }

    pub fn total_dirs(&self) -> u64 {
        self.total_dirs.load(Ordering::Relaxed)
    }

    pub fn total_files(&self) -> u64 {
        self.total_files.load(Ordering::Relaxed)
    }

    /// Snapshot of the child list.
    pub fn children(&self) -> Vec<Arc<Entry>> {
        self.children.read().clone()
    }

    /// Get the number of direct children.
    pub fn child_count(&self) -> usize {
        self.children.read().len()
    }

    pub fn has_children(&self) -> bool {
        !self.children.read().is_empty()
    }

    /// Direct children of one kind: directories when `dirs` is true, files
    /// otherwise.
    pub fn entries(&self, dirs: bool) -> impl Iterator<Item = Arc<Entry>> + use<> {
        self.children()
            .into_iter()
            .filter(move |child| child.is_dir == dirs)
    }

    /// Find a direct child by name. Only the first level is searched.
    pub fn child(&self, name: &str) -> Option<Arc<Entry>> {
        let path = join_path(&self.path, name);
        self.children
            .read()
            .iter()
            .find(|child| child.path == path)
            .cloned()
    }

    /// Append a child and bump the counters for its kind.
    pub fn add_child(&self, child: Arc<Entry>) {
        let mut children = self.children.write();
        if child.is_dir {
            self.local_dirs.fetch_add(1, Ordering::Relaxed);
            self.total_dirs.fetch_add(1, Ordering::Relaxed);
        } else {
            self.local_files.fetch_add(1, Ordering::Relaxed);
            self.total_files.fetch_add(1, Ordering::Relaxed);
        }
        children.push(child);
    }

    /// Drop every child so the subtree can be rebuilt in place.
    pub fn clear_children(&self) {
        let mut children = self.children.write();
        children.clear();
        self.local_dirs.store(0, Ordering::Relaxed);
        self.local_files.store(0, Ordering::Relaxed);
    }

    /// Children sorted by size, largest first.
    pub fn sorted_children(&self) -> Vec<Arc<Entry>> {
        let mut children = self.children();
        children.sort_by_key(|child| std::cmp::Reverse(child.size()));
        children
    }

    /// Sort the child list in place by size, largest first.
    pub fn sort_children(&self) {
        self.children
            .write()
            .sort_by_key(|child| std::cmp::Reverse(child.size()));
    }

    /// Recompute size and recursive counters bottom-up and return the size.
    ///
    /// Files return their own size. Safe to call while a scan is still
    /// appending children: the result then reflects whatever has been
    /// discovered so far. A subtree that another pass is already
    /// recomputing is skipped and reports its last stored size.
    pub fn calculate_size(&self) -> u64 {
        if !self.is_dir {
            return self.size();
        }

        let Some(_guard) = self.calculating.try_lock() else {
            return self.size();
        };
        self.aggregate(Entry::calculate_size)
    }

    /// Like [`Entry::calculate_size`], but waits for a running pass on any
    /// part of the subtree instead of skipping it, so every child present
    /// when the call starts is counted.
    pub fn calculate_final_size(&self) -> u64 {
        if !self.is_dir {
            return self.size();
        }

        let _guard = self.calculating.lock();
        self.aggregate(Entry::calculate_final_size)
    }

    // Locks are only ever taken parent before child.
    fn aggregate(&self, child_size: fn(&Entry) -> u64) -> u64 {
        let children = self.children();
        let (mut size, mut dirs, mut files) = (0u64, 0u64, 0u64);

        for child in &children {
            size += child_size(child);

            if child.is_dir {
                dirs += 1;
            } else {
                files += 1;
            }

            dirs += child.total_dirs();
            files += child.total_files();
        }

        self.size.store(size, Ordering::Relaxed);
        self.total_dirs.store(dirs, Ordering::Relaxed);
        self.total_files.store(files, Ordering::Relaxed);

        size
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("path", &self.path)
            .field("is_dir", &self.is_dir)
            .field("size", &self.size())
            .field("children", &self.child_count())
            .finish()
    }
}

fn is_separator(c: char) -> bool {
    c == '/' || c == MAIN_SEPARATOR
}

/// Join a parent path and a child name with exactly one separator,
/// regardless of trailing separators on the parent.
pub fn join_path(parent: &str, name: &str) -> String {
    let base = parent.trim_end_matches(is_separator);
    let mut path = String::with_capacity(base.len() + name.len() + 1);
    path.push_str(base);
    path.push(MAIN_SEPARATOR);
    path.push_str(name);
    path
}
