//! Bounded "largest N" trackers for files and dominant directories.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::entry::Entry;

/// Default number of entries kept by each tracker.
pub const DEFAULT_MAX_TOP_ENTRIES: usize = 16;

/// Heap slot: the entry plus the size it had when it was offered.
struct Slot(u64, Arc<Entry>);

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// Keeps the `capacity` largest entries offered to it.
///
/// Internally a min-heap of at most `capacity` items: every push is followed
/// by popping the smallest item once the heap grows past its bound.
pub struct EntrySizeHeap {
    heap: Mutex<BinaryHeap<Reverse<Slot>>>,
    capacity: usize,
}

impl EntrySizeHeap {
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: Mutex::new(BinaryHeap::with_capacity(capacity + 1)),
            capacity,
        }
    }

    /// Offer an entry. Safe to call from many threads at once.
    pub fn push_safe(&self, entry: Arc<Entry>) {
        let size = entry.size();
        let mut heap = self.heap.lock();
        heap.push(Reverse(Slot(size, entry)));
        if heap.len() > self.capacity {
            heap.pop();
        }
    }

    /// Drop every retained entry.
    pub fn reset(&self) {
        self.heap.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained entries ordered by size, largest first. The heap is left
    /// untouched.
    pub fn sorted(&self) -> Vec<Arc<Entry>> {
        let mut items: Vec<(u64, Arc<Entry>)> = self
            .heap
            .lock()
            .iter()
            .map(|Reverse(Slot(size, entry))| (*size, Arc::clone(entry)))
            .collect();
        items.sort_by(|a, b| b.0.cmp(&a.0));
        items.into_iter().map(|(_, entry)| entry).collect()
    }

    /// Remove and return every retained entry, largest first.
    pub fn drain(&self) -> Vec<Arc<Entry>> {
        let mut heap = std::mem::take(&mut *self.heap.lock());
        let mut ascending = Vec::with_capacity(heap.len());
        while let Some(Reverse(Slot(_, entry))) = heap.pop() {
            ascending.push(entry);
        }
        ascending.reverse();
        ascending
    }
}

/// The two top-K trackers kept for a tree: largest files and largest
/// dominant directories.
pub struct TopEntries {
    files: EntrySizeHeap,
    dirs: EntrySizeHeap,
}

impl TopEntries {
    pub fn new(capacity: usize) -> Self {
        Self {
            files: EntrySizeHeap::new(capacity),
            dirs: EntrySizeHeap::new(capacity),
        }
    }

    /// Largest files tracker.
    pub fn files(&self) -> &EntrySizeHeap {
        &self.files
    }

    /// Largest dominant directories tracker.
    pub fn dirs(&self) -> &EntrySizeHeap {
        &self.dirs
    }

    /// Clear both trackers.
    pub fn reset(&self) {
        self.files.reset();
        self.dirs.reset();
    }

    /// Rebuild the file tracker from a finished tree.
    pub fn scan_files(&self, root: &Arc<Entry>) {
        if !root.is_dir() {
            return;
        }

        self.files.reset();

        let mut queue = VecDeque::from([Arc::clone(root)]);
        while let Some(node) = queue.pop_front() {
            for child in node.children() {
                if child.is_dir() {
                    queue.push_back(child);
                } else {
                    self.files.push_safe(child);
                }
            }
        }
    }

    /// Rebuild the directory tracker from a finished, aggregated tree.
    ///
    /// Walks breadth-first from `root`. A directory whose nested
    /// subdirectories hold less than half of its size is offered and not
    /// descended into; any other directory is a pass-through container and
    /// its subdirectories are visited instead. Empty directories are never
    /// offered.
    pub fn scan_dirs(&self, root: &Arc<Entry>) {
        if !root.is_dir() {
            return;
        }

        self.dirs.reset();

        let mut queue = VecDeque::from([Arc::clone(root)]);
        while let Some(node) = queue.pop_front() {
            let size = node.size();
            let own_files: u64 = node.entries(false).map(|file| file.size()).sum();
            let nested = size.saturating_sub(own_files);

            if nested < size / 2 {
                self.dirs.push_safe(node);
                continue;
            }

            queue.extend(node.entries(true));
        }
    }
}

impl Default for TopEntries {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TOP_ENTRIES)
    }
}
