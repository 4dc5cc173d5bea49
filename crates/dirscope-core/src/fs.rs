//! Collaborator contracts for reading directories and enumerating volumes.
//!
//! The scanning core never touches the OS directly. It lists directories
//! through a [`DirectoryReader`] and discovers mounted volumes through a
//! [`VolumeEnumerator`]; `dirscope-scan` ships the default implementations.

use std::ffi::OsString;
use std::io;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

/// Physical identity of a filesystem object (device + inode).
///
/// Two directory entries with the same `FileId` refer to the same object on
/// disk, e.g. hard links or a bind mount looping back into the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileId {
    /// Device ID.
    pub device: u64,
    /// Inode number.
    pub inode: u64,
}

impl FileId {
    /// Create a new file id.
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }
}

/// One child reported by a [`DirectoryReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Entry name, never `.` or `..`.
    pub name: CompactString,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Byte length as reported by the OS. Ignored for directories.
    pub size: u64,
    /// Modification time in seconds since the Unix epoch.
    pub mod_time: i64,
    /// Physical identity, when the platform exposes one.
    pub id: Option<FileId>,
}

impl DirEntryInfo {
    /// Describe a regular file.
    pub fn file(name: impl Into<CompactString>, size: u64, mod_time: i64) -> Self {
        Self {
            name: name.into(),
            is_dir: false,
            size,
            mod_time,
            id: None,
        }
    }

    /// Describe a directory.
    pub fn dir(name: impl Into<CompactString>, mod_time: i64) -> Self {
        Self {
            name: name.into(),
            is_dir: true,
            size: 0,
            mod_time,
            id: None,
        }
    }

    /// Attach a physical identity.
    pub fn with_id(mut self, id: FileId) -> Self {
        self.id = Some(id);
        self
    }

    /// Whether the name marks a hidden (dot) file.
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.')
    }
}

/// Result of listing one directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirListing {
    /// Children with UTF-8 names.
    pub entries: Vec<DirEntryInfo>,
    /// Raw names the reader skipped because they are not valid UTF-8.
    pub invalid_names: Vec<OsString>,
}

impl From<Vec<DirEntryInfo>> for DirListing {
    fn from(entries: Vec<DirEntryInfo>) -> Self {
        Self {
            entries,
            invalid_names: Vec::new(),
        }
    }
}

/// Lists the immediate children of a directory.
pub trait DirectoryReader: Send + Sync {
    /// Read the children of `path`. Implementations must exclude `.` and `..`
    /// and may drop OS-specific pseudo entries. Names that cannot be carried
    /// as UTF-8 go to [`DirListing::invalid_names`], never into `entries`.
    fn read_dir(&self, path: &str) -> io::Result<DirListing>;
}

/// Capacity information for one mounted volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    /// Mount point.
    pub path: String,
    /// Volume label, empty when unknown.
    pub volume: String,
    /// Filesystem type name, empty when unknown.
    pub fs_name: String,
    /// Total capacity in bytes.
    #[serde(rename = "total")]
    pub total_bytes: u64,
    /// Free bytes.
    #[serde(rename = "free")]
    pub free_bytes: u64,
    /// Used bytes.
    #[serde(rename = "used")]
    pub used_bytes: u64,
    /// Used share of the capacity, 0..=100.
    pub used_percent: f64,
}

impl VolumeInfo {
    /// Build volume info from total and free byte counts.
    pub fn from_capacity(path: impl Into<String>, total_bytes: u64, free_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(free_bytes);
        let used_percent = if total_bytes == 0 {
            0.0
        } else {
            used_bytes as f64 / total_bytes as f64 * 100.0
        };

        Self {
            path: path.into(),
            volume: String::new(),
            fs_name: String::new(),
            total_bytes,
            free_bytes,
            used_bytes,
            used_percent,
        }
    }
}

/// Lists mounted volumes.
pub trait VolumeEnumerator: Send + Sync {
    /// Enumerate the volumes available for scanning.
    fn list_volumes(&self) -> io::Result<Vec<VolumeInfo>>;
}

impl VolumeEnumerator for Vec<VolumeInfo> {
    fn list_volumes(&self) -> io::Result<Vec<VolumeInfo>> {
        Ok(self.clone())
    }
}
