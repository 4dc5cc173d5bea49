//! Directory listing backed by `std::fs`.

use std::fs::{self, Metadata};
use std::io;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

use dirscope_core::{DirEntryInfo, DirListing, DirectoryReader, FileId};
use tracing::trace;

/// Children of `/` that never hold user data on Linux.
const LINUX_ROOT_PSEUDO_DIRS: &[&str] = &["mnt", "sys", "lost+found", "boot", "proc"];

/// Lists directories with `std::fs::read_dir`.
///
/// Metadata is taken without following symlinks, so a link is reported as a
/// small file and never descended into.
#[derive(Debug, Clone)]
pub struct FsReader {
    skip_pseudo_dirs: bool,
}

impl FsReader {
    /// Create a reader. Pseudo directories under `/` are skipped on Linux.
    pub fn new() -> Self {
        Self {
            skip_pseudo_dirs: cfg!(target_os = "linux"),
        }
    }

    /// Toggle skipping of the Linux pseudo directories under `/`.
    pub fn skip_pseudo_dirs(mut self, skip: bool) -> Self {
        self.skip_pseudo_dirs = skip;
        self
    }

    fn is_excluded(&self, parent: &str, name: &str) -> bool {
        self.skip_pseudo_dirs && parent == "/" && LINUX_ROOT_PSEUDO_DIRS.contains(&name)
    }
}

impl Default for FsReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DirectoryReader for FsReader {
    fn read_dir(&self, path: &str) -> io::Result<DirListing> {
        let mut listing = DirListing {
            entries: Vec::with_capacity(32),
            invalid_names: Vec::new(),
        };

        for dent in fs::read_dir(path)? {
            let dent = match dent {
                Ok(d) => d,
                Err(err) => {
                    trace!(path, %err, "skipping unreadable directory entry");
                    continue;
                }
            };

            let name = match dent.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    trace!(path, name = ?raw, "skipping entry with a non UTF-8 name");
                    listing.invalid_names.push(raw);
                    continue;
                }
            };
            if self.is_excluded(path, &name) {
                continue;
            }

            // DirEntry::metadata does not traverse symlinks.
            let metadata = match dent.metadata() {
                Ok(m) => m,
                Err(err) => {
                    trace!(path, name = %name, %err, "entry vanished before stat");
                    continue;
                }
            };

            let mod_time = mod_time(&metadata);
            let mut info = if metadata.is_dir() {
                DirEntryInfo::dir(name, mod_time)
            } else {
                DirEntryInfo::file(name, metadata.len(), mod_time)
            };

            if let Some(id) = file_id(&metadata) {
                info = info.with_id(id);
            }

            listing.entries.push(info);
        }

        Ok(listing)
    }
}

#[cfg(unix)]
fn mod_time(metadata: &Metadata) -> i64 {
    metadata.mtime()
}

#[cfg(not(unix))]
fn mod_time(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> Option<FileId> {
    Some(FileId::new(metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> Option<FileId> {
    None
}

/// Modification time of a path in seconds since the epoch, without
/// following a trailing symlink.
pub fn path_mod_time(path: &str) -> io::Result<i64> {
    fs::symlink_metadata(path).map(|m| mod_time(&m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_dir_kinds_and_sizes() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), "hello").unwrap();
        fs::create_dir(temp.path().join("sub")).unwrap();

        let reader = FsReader::new();
        let mut children = reader
            .read_dir(temp.path().to_str().unwrap())
            .unwrap()
            .entries;
        children.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(children.len(), 2);
        assert_eq!(children[0].name, "a.txt");
        assert!(!children[0].is_dir);
        assert_eq!(children[0].size, 5);
        assert!(children[0].mod_time > 0);
        assert!(children[1].is_dir);
        #[cfg(unix)]
        assert!(children[1].id.is_some());
    }

    #[test]
    fn test_missing_dir_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");
        let err = FsReader::new()
            .read_dir(missing.to_str().unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn test_pseudo_dir_rule() {
        let reader = FsReader::new().skip_pseudo_dirs(true);
        assert!(reader.is_excluded("/", "proc"));
        assert!(!reader.is_excluded("/home", "proc"));
        assert!(!reader.is_excluded("/", "home"));
        assert!(!FsReader::new().skip_pseudo_dirs(false).is_excluded("/", "proc"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_not_followed() {
        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join("real")).unwrap();
        std::os::unix::fs::symlink(temp.path().join("real"), temp.path().join("link")).unwrap();

        let children = FsReader::new()
            .read_dir(temp.path().to_str().unwrap())
            .unwrap()
            .entries;
        let link = children.iter().find(|c| c.name == "link").unwrap();
        assert!(!link.is_dir);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_set_aside() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        fs::create_dir(temp.path().join(OsStr::from_bytes(b"d\xff"))).unwrap();
        fs::create_dir(temp.path().join(OsStr::from_bytes(b"d\xfe"))).unwrap();
        fs::write(temp.path().join("ok.txt"), "hi").unwrap();

        let listing = FsReader::new()
            .read_dir(temp.path().to_str().unwrap())
            .unwrap();

        assert_eq!(listing.entries.len(), 1);
        assert_eq!(listing.entries[0].name, "ok.txt");
        assert!(listing.entries.iter().all(|e| !e.name.contains('\u{FFFD}')));

        let mut raw: Vec<_> = listing
            .invalid_names
            .iter()
            .map(|n| n.as_bytes().to_vec())
            .collect();
        raw.sort();
        assert_eq!(raw, vec![b"d\xfe".to_vec(), b"d\xff".to_vec()]);
    }
}
