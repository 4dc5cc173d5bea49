//! Volume and directory navigation over a scanned tree.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dirscope_cache::Cache;
use dirscope_core::{Entry, ScanError, VolumeEnumerator, VolumeInfo};
use dirscope_scan::{ScanHandle, ScanPass, Tree, path_mod_time};
use tracing::{debug, info, warn};

use crate::error::NavError;
use crate::opener::{Opener, SystemOpener};

/// Where the navigation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Choosing a volume.
    Drives,
    /// Browsing inside a scanned volume or directory.
    Dirs,
}

/// A level left by drilling down, restored by [`Navigation::up`].
#[derive(Debug, Clone)]
struct Crumb {
    entry: Arc<Entry>,
    cursor: usize,
}

/// The single-writer lock shared with scan completion callbacks.
#[derive(Debug, Clone, Default)]
struct NavLock(Arc<AtomicBool>);

impl NavLock {
    fn acquire(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }

    fn release(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Stateful facade that sequences scans, refreshes and deletions over a
/// [`Tree`].
///
/// At most one scan, refresh or delete runs at a time. [`down`](Self::down)
/// and [`refresh`](Self::refresh) return nothing while another operation
/// holds the lock; for background scans the lock is released just before
/// the returned handle reports done.
pub struct Navigation {
    tree: Arc<Tree>,
    enumerator: Box<dyn VolumeEnumerator>,
    volumes: Vec<VolumeInfo>,
    current_volume: Option<VolumeInfo>,
    state: State,
    entry: Option<Arc<Entry>>,
    stack: Vec<Crumb>,
    cursor: usize,
    lock: NavLock,
    cache: Option<Cache>,
    opener: Box<dyn Opener>,
    use_trash: bool,
}

impl Navigation {
    /// Start at the volume list.
    ///
    /// A failing enumerator leaves the list empty; call
    /// [`refresh_volumes`](Self::refresh_volumes) to see the error.
    pub fn new(tree: Arc<Tree>, enumerator: Box<dyn VolumeEnumerator>) -> Self {
        let volumes = enumerator.list_volumes().unwrap_or_else(|err| {
            warn!(%err, "failed to list volumes");
            Vec::new()
        });

        Self {
            tree,
            enumerator,
            volumes,
            current_volume: None,
            state: State::Drives,
            entry: None,
            stack: Vec::new(),
            cursor: 0,
            lock: NavLock::default(),
            cache: None,
            opener: Box::new(SystemOpener),
            use_trash: false,
        }
    }

    /// Seed scans from `cache` and persist finished ones into it.
    pub fn with_cache(mut self, cache: Option<Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Replace the file manager hand-off used by [`explore`](Self::explore).
    pub fn with_opener(mut self, opener: impl Opener + 'static) -> Self {
        self.opener = Box::new(opener);
        self
    }

    /// Move deleted items to the OS trash instead of removing them.
    pub fn with_trash(mut self, use_trash: bool) -> Self {
        self.use_trash = use_trash;
        self
    }

    /// Scan `path` synchronously and start browsing it.
    ///
    /// Unreadable subdirectories are logged and left empty; a root that is
    /// missing or not a directory is an error.
    pub fn with_root(mut self, path: &str) -> Result<Self, NavError> {
        let meta = fs::metadata(path).map_err(|source| NavError::Stat {
            path: PathBuf::from(path),
            source,
        })?;
        if !meta.is_dir() {
            return Err(ScanError::NotADirectory {
                path: PathBuf::from(path),
            }
            .into());
        }

        let root = match self.cached(path) {
            Some(root) => {
                self.tree.set_root(Arc::clone(&root));
                root
            }
            None => {
                let root = Arc::new(Entry::new_dir(path, path_mod_time(path).unwrap_or(0)));
                self.tree.set_root(Arc::clone(&root));
                if let Err(err) = self.tree.traverse() {
                    warn!(root = path, %err, "pre-scan finished with errors");
                }
                self.tree.calculate_final_size();
                root
            }
        };
        self.tree.scan_top();

        self.current_volume = self.volume_of(path);
        self.state = State::Dirs;
        self.entry = Some(root);
        self.stack.clear();
        self.cursor = 0;

        info!(root = path, "browsing fixed root");
        Ok(self)
    }

    pub fn tree(&self) -> &Arc<Tree> {
        &self.tree
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Entry being browsed, `None` on the volume list.
    pub fn entry(&self) -> Option<Arc<Entry>> {
        self.entry.clone()
    }

    pub fn volumes(&self) -> &[VolumeInfo] {
        &self.volumes
    }

    /// Re-read the volume list and capacities.
    pub fn refresh_volumes(&mut self) -> Result<(), NavError> {
        self.volumes = self
            .enumerator
            .list_volumes()
            .map_err(|source| NavError::Volumes { source })?;
        debug!(count = self.volumes.len(), "volumes refreshed");
        Ok(())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor;
    }

    /// Depth below the volume or fixed root.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether a scan, refresh or delete is in flight.
    pub fn is_locked(&self) -> bool {
        self.lock.is_held()
    }

    /// Size the current listing is measured against, never below 1.
    pub fn parent_size(&self) -> u64 {
        let size = match (&self.entry, &self.current_volume) {
            (Some(entry), _) => entry.size(),
            (None, Some(volume)) => volume.used_bytes,
            (None, None) => 0,
        };
        size.max(1)
    }

    /// Drill into `path`.
    ///
    /// On the volume list, `path` is a mount point: the tree is reset to a
    /// new root there and a full background scan starts, unless the cache
    /// already holds it, in which case the returned handle is already done.
    /// While browsing, `path` names a child directory of the current entry,
    /// which becomes current without rescanning; `cursor` is remembered for
    /// [`up`](Self::up) and no handle is returned.
    pub fn down(&mut self, path: &str, cursor: usize) -> Option<ScanHandle> {
        if path.is_empty() || !self.lock.acquire() {
            return None;
        }

        match self.state {
            State::Drives => Some(self.open_volume(path)),
            State::Dirs => {
                self.enter_child(path, cursor);
                self.lock.release();
                None
            }
        }
    }

    fn open_volume(&mut self, path: &str) -> ScanHandle {
        self.state = State::Dirs;
        self.current_volume = self.volume_of(path);
        self.stack.clear();
        self.cursor = 0;

        if let Some(root) = self.cached(path) {
            self.tree.set_root(Arc::clone(&root));
            self.tree.scan_top();
            self.entry = Some(root);
            self.lock.release();
            info!(root = path, "volume loaded from cache");
            return ScanHandle::completed();
        }

        let root = Arc::new(Entry::new_dir(path, path_mod_time(path).unwrap_or(0)));
        self.tree.set_root(Arc::clone(&root));
        self.entry = Some(Arc::clone(&root));

        let tree = Arc::clone(&self.tree);
        let lock = self.lock.clone();
        let handle = self.tree.traverse_entry(&root, ScanPass::Full, move || {
            tree.calculate_final_size();
            tree.scan_top();
            lock.release();
        });

        info!(root = path, "volume scan started");
        handle.unwrap_or_else(|| {
            self.lock.release();
            ScanHandle::completed()
        })
    }

    fn enter_child(&mut self, name: &str, cursor: usize) {
        let Some(current) = self.entry.clone() else {
            return;
        };
        let Some(child) = current.child(name).filter(|child| child.is_dir()) else {
            debug!(parent = current.path(), name, "no such child directory");
            return;
        };

        debug!(path = child.path(), "down");
        self.stack.push(Crumb {
            entry: current,
            cursor,
        });
        self.entry = Some(child);
        self.cursor = 0;
    }

    /// Go back one level. At the top of the stack this persists the tree to
    /// the cache and returns to the volume list. A no-op on the volume list
    /// or while locked.
    pub fn up(&mut self) {
        if self.state == State::Drives || !self.lock.acquire() {
            return;
        }

        match self.stack.pop() {
            Some(crumb) => {
                debug!(path = crumb.entry.path(), "up");
                self.entry = Some(crumb.entry);
                self.cursor = crumb.cursor;
            }
            None => {
                if let Err(err) = self.persist_cache() {
                    warn!(%err, "failed to persist cache");
                }
                self.state = State::Drives;
                self.entry = None;
                self.cursor = 0;
                debug!("back to volume list");
            }
        }

        self.lock.release();
    }

    /// Rescan the current entry in place.
    ///
    /// When the current path is gone from disk, levels are popped until one
    /// still exists; with none left the navigation returns to the volume
    /// list and no handle is returned. Also returns no handle on the volume
    /// list or while locked.
    pub fn refresh(&mut self) -> Result<Option<ScanHandle>, NavError> {
        if self.state == State::Drives || !self.lock.acquire() {
            return Ok(None);
        }

        let entry = match self.surviving_entry() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.state = State::Drives;
                self.entry = None;
                self.cursor = 0;
                self.lock.release();
                info!("refreshed path is gone, back to volume list");
                return Ok(None);
            }
            Err(err) => {
                self.lock.release();
                return Err(err);
            }
        };

        let tree = Arc::clone(&self.tree);
        let lock = self.lock.clone();
        let handle = self.tree.traverse_entry(&entry, ScanPass::Refresh, move || {
            tree.calculate_final_size();
            tree.scan_top();
            lock.release();
        });

        debug!(path = entry.path(), "refresh started");
        match handle {
            Some(handle) => Ok(Some(handle)),
            None => {
                self.lock.release();
                Ok(None)
            }
        }
    }

    fn surviving_entry(&mut self) -> Result<Option<Arc<Entry>>, NavError> {
        while let Some(entry) = self.entry.clone() {
            match fs::symlink_metadata(entry.path()) {
                Ok(_) => return Ok(Some(entry)),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    debug!(path = entry.path(), "entry vanished");
                    match self.stack.pop() {
                        Some(crumb) => {
                            self.entry = Some(crumb.entry);
                            self.cursor = crumb.cursor;
                        }
                        None => self.entry = None,
                    }
                }
                Err(source) => {
                    return Err(NavError::Stat {
                        path: PathBuf::from(entry.path()),
                        source,
                    });
                }
            }
        }
        Ok(None)
    }

    /// Remove the child `name` of the current entry from disk, recursively.
    ///
    /// The in-memory tree is left untouched; call [`refresh`](Self::refresh)
    /// afterwards. Unknown names, the volume list and a held lock are
    /// no-ops.
    pub fn delete(&mut self, name: &str) -> Result<(), NavError> {
        let Some(child) = self.entry.as_ref().and_then(|entry| entry.child(name)) else {
            return Ok(());
        };
        if !self.lock.acquire() {
            return Ok(());
        }

        let result = self.remove(&child);
        self.lock.release();
        result
    }

    fn remove(&self, child: &Entry) -> Result<(), NavError> {
        let path = Path::new(child.path());

        if self.use_trash {
            trash::delete(path).map_err(|source| NavError::Trash {
                path: path.to_path_buf(),
                source,
            })?;
            info!(path = %path.display(), "moved to trash");
            return Ok(());
        }

        let removed = if child.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };
        removed.map_err(|source| NavError::Delete {
            path: path.to_path_buf(),
            source,
        })?;

        info!(path = %path.display(), "deleted");
        Ok(())
    }

    /// Show a volume (on the volume list) or a child of the current entry
    /// in the OS file manager. Unknown names are ignored.
    pub fn explore(&self, name: &str) -> Result<(), NavError> {
        let target = match self.state {
            State::Drives => self
                .volumes
                .iter()
                .find(|volume| volume.path == name)
                .map(|volume| volume.path.clone()),
            State::Dirs => self
                .entry
                .as_ref()
                .and_then(|entry| entry.child(name))
                .map(|child| child.path().to_string()),
        };
        let Some(target) = target else {
            return Ok(());
        };

        let path = PathBuf::from(target);
        self.opener.open(&path).map_err(|err| NavError::Explore {
            message: err.to_string(),
            path,
        })
    }

    /// Write the current tree root to the cache, when one is configured.
    pub fn persist_cache(&self) -> Result<(), NavError> {
        let (Some(cache), Some(root)) = (&self.cache, self.tree.root()) else {
            return Ok(());
        };
        cache.set(root.path(), &root)?;
        Ok(())
    }

    fn cached(&self, path: &str) -> Option<Arc<Entry>> {
        let cache = self.cache.as_ref()?;
        match cache.get(path) {
            Ok(root) => Some(root),
            Err(err) if err.is_miss() => None,
            Err(err) => {
                warn!(path, %err, "ignoring unreadable cache entry");
                None
            }
        }
    }

    /// Mount point holding `path`, by longest matching prefix.
    fn volume_of(&self, path: &str) -> Option<VolumeInfo> {
        self.volumes
            .iter()
            .filter(|volume| {
                let mount = volume.path.trim_end_matches('/');
                path == volume.path
                    || path
                        .strip_prefix(mount)
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|volume| volume.path.len())
            .cloned()
    }
}

impl std::fmt::Debug for Navigation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Navigation")
            .field("state", &self.state)
            .field("entry", &self.entry.as_ref().map(|e| e.path()))
            .field("depth", &self.stack.len())
            .field("cursor", &self.cursor)
            .field("locked", &self.is_locked())
            .field("cache", &self.cache.as_ref().map(Cache::dir))
            .field("use_trash", &self.use_trash)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirscope_core::{DirEntryInfo, DirListing, DirectoryReader, ScanConfig};

    struct Fixed;

    impl DirectoryReader for Fixed {
        fn read_dir(&self, path: &str) -> io::Result<DirListing> {
            let entries = match path {
                "/v" => vec![DirEntryInfo::dir("a", 0), DirEntryInfo::file("f", 5, 0)],
                "/v/a" => vec![DirEntryInfo::file("g", 7, 0)],
                _ => Vec::new(),
            };
            Ok(entries.into())
        }
    }

    fn nav() -> Navigation {
        let tree = Arc::new(Tree::new(&ScanConfig::default(), Arc::new(Fixed)));
        let volumes = vec![VolumeInfo::from_capacity("/v", 100, 40)];
        Navigation::new(tree, Box::new(volumes))
    }

    #[test]
    fn test_lock_is_exclusive() {
        let lock = NavLock::default();
        assert!(lock.acquire());
        assert!(!lock.acquire());
        lock.release();
        assert!(lock.acquire());
    }

    #[test]
    fn test_down_up_restores_level() {
        let mut nav = nav();
        assert_eq!(nav.state(), State::Drives);
        assert_eq!(nav.parent_size(), 1);

        let handle = nav.down("/v", 0).unwrap();
        assert!(handle.wait().is_empty());
        assert!(!nav.is_locked());
        assert_eq!(nav.state(), State::Dirs);
        assert_eq!(nav.parent_size(), 12);

        nav.set_cursor(1);
        assert!(nav.down("a", 1).is_none());
        assert_eq!(nav.entry().unwrap().path(), "/v/a");
        assert_eq!(nav.cursor(), 0);
        assert_eq!(nav.depth(), 1);

        nav.up();
        assert_eq!(nav.entry().unwrap().path(), "/v");
        assert_eq!(nav.cursor(), 1);

        nav.up();
        assert_eq!(nav.state(), State::Drives);
        assert!(nav.entry().is_none());
        assert_eq!(nav.parent_size(), 60);
    }

    #[test]
    fn test_down_into_file_is_ignored() {
        let mut nav = nav();
        nav.down("/v", 0).unwrap().wait();

        assert!(nav.down("f", 3).is_none());
        assert!(nav.down("missing", 3).is_none());
        assert_eq!(nav.entry().unwrap().path(), "/v");
        assert_eq!(nav.depth(), 0);
        assert!(!nav.is_locked());
    }

    #[test]
    fn test_volume_of_longest_prefix() {
        let tree = Arc::new(Tree::new(&ScanConfig::default(), Arc::new(Fixed)));
        let volumes = vec![
            VolumeInfo::from_capacity("/", 10, 0),
            VolumeInfo::from_capacity("/home", 10, 0),
        ];
        let nav = Navigation::new(tree, Box::new(volumes));

        assert_eq!(nav.volume_of("/home/user").unwrap().path, "/home");
        assert_eq!(nav.volume_of("/homework").unwrap().path, "/");
        assert_eq!(nav.volume_of("/").unwrap().path, "/");
    }
}
