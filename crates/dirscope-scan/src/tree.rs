//! The scanned tree: a swappable root plus the scanner that fills it.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use dirscope_core::{DirectoryReader, Entry, ScanConfig, ScanError, TopEntries};

use crate::inode::InodeFilter;
use crate::scanner::{ScanHandle, ScanPass, Scanner};

/// Owns the current root entry and orchestrates passes over it.
#[derive(Debug)]
pub struct Tree {
    root: RwLock<Option<Arc<Entry>>>,
    scanner: Scanner,
    calculating: Mutex<()>,
}

impl Tree {
    /// Create an empty tree.
    pub fn new(config: &ScanConfig, reader: Arc<dyn DirectoryReader>) -> Self {
        Self::with_scanner(Scanner::new(config, reader))
    }

    pub fn with_scanner(scanner: Scanner) -> Self {
        Self {
            root: RwLock::new(None),
            scanner,
            calculating: Mutex::new(()),
        }
    }

    /// Current root, if any.
    pub fn root(&self) -> Option<Arc<Entry>> {
        self.root.read().clone()
    }

    /// Replace the root. The previous tree is dropped once nothing else
    /// holds it.
    pub fn set_root(&self, root: Arc<Entry>) {
        *self.root.write() = Some(root);
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Top files and dominant directories of the current root.
    pub fn top(&self) -> &Arc<TopEntries> {
        self.scanner.top()
    }

    /// Scan the root synchronously. A missing root is a no-op.
    pub fn traverse(&self) -> Result<(), ScanError> {
        match self.root() {
            Some(root) => self.scanner.traverse(&root),
            None => Ok(()),
        }
    }

    /// Start a full background scan of the root.
    pub fn traverse_async(&self) -> Option<ScanHandle> {
        let root = self.root()?;
        self.scanner.traverse_async(&root)
    }

    /// Start a background pass over any entry of the tree.
    ///
    /// A [`ScanPass::Refresh`] drops the entry's current children and
    /// rebuilds them. Objects already reachable elsewhere under the root
    /// are not counted a second time inside the entry.
    pub fn traverse_entry<F>(
        &self,
        entry: &Arc<Entry>,
        kind: ScanPass,
        on_complete: F,
    ) -> Option<ScanHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        match kind {
            ScanPass::Full => self.scanner.traverse_with(entry, kind, on_complete),
            ScanPass::Refresh => {
                let seen = match self.root() {
                    Some(root) => InodeFilter::outside(&root, entry),
                    None => InodeFilter::new(),
                };
                self.scanner.refresh_with(entry, seen, on_complete)
            }
        }
    }

    /// Re-aggregate sizes and counters from the root down.
    ///
    /// Meant for progress updates while a scan runs. Overlapping calls
    /// collapse into one; the losers return the size last stored on the
    /// root.
    pub fn calculate_size(&self) -> u64 {
        let Some(root) = self.root() else {
            return 0;
        };

        let Some(_guard) = self.calculating.try_lock() else {
            return root.size();
        };
        root.calculate_size()
    }

    /// Definitive aggregation after a pass is over. Waits for any
    /// progressive pass still running and then counts every entry.
    pub fn calculate_final_size(&self) -> u64 {
        let Some(root) = self.root() else {
            return 0;
        };

        let _guard = self.calculating.lock();
        root.calculate_final_size()
    }

    /// Rebuild both top trackers from the finished tree.
    pub fn scan_top(&self) {
        if let Some(root) = self.root() {
            self.top().scan_files(&root);
            self.top().scan_dirs(&root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirscope_core::{DirEntryInfo, DirListing};
    use std::io;
    use std::time::Duration;

    struct Flat;

    impl DirectoryReader for Flat {
        fn read_dir(&self, _path: &str) -> io::Result<DirListing> {
            Ok(vec![
                DirEntryInfo::file("x", 3, 0),
                DirEntryInfo::file("y", 4, 0),
            ]
            .into())
        }
    }

    #[test]
    fn test_empty_tree() {
        let tree = Tree::new(&ScanConfig::default(), Arc::new(Flat));
        assert!(tree.root().is_none());
        assert!(tree.traverse().is_ok());
        assert!(tree.traverse_async().is_none());
        assert_eq!(tree.calculate_size(), 0);
        assert_eq!(tree.calculate_final_size(), 0);
    }

    #[test]
    fn test_set_root_and_scan() {
        let tree = Tree::new(&ScanConfig::default(), Arc::new(Flat));
        tree.set_root(Arc::new(Entry::new_dir("/flat", 0)));

        tree.traverse().unwrap();
        assert_eq!(tree.calculate_size(), 7);

        tree.scan_top();
        assert_eq!(tree.top().files().len(), 2);
        assert_eq!(tree.top().dirs().len(), 1);
    }

    #[test]
    fn test_final_size_is_not_skipped_by_progressive_pass() {
        let tree = Arc::new(Tree::new(&ScanConfig::default(), Arc::new(Flat)));
        tree.set_root(Arc::new(Entry::new_dir("/flat", 0)));
        tree.traverse().unwrap();

        // A progressive pass is in flight.
        let guard = tree.calculating.lock();
        assert_eq!(tree.calculate_size(), 0);

        let finisher = {
            let tree = Arc::clone(&tree);
            std::thread::spawn(move || tree.calculate_final_size())
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(!finisher.is_finished());

        drop(guard);
        assert_eq!(finisher.join().unwrap(), 7);
        assert_eq!(tree.root().unwrap().total_files(), 2);
    }
}
