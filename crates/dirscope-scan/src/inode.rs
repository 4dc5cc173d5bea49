//! Physical-identity tracking for a single scan pass.

use std::sync::Arc;

use dashmap::DashSet;
use dirscope_core::{Entry, FileId};

/// Remembers which filesystem objects a scan pass has already visited.
///
/// Hard links and bind mounts make one object reachable under several
/// names. Workers consult the filter before attaching a child so each
/// `(device, inode)` pair is counted once per pass.
#[derive(Debug, Default)]
pub struct InodeFilter {
    seen: DashSet<FileId>,
}

impl InodeFilter {
    pub fn new() -> Self {
        Self {
            seen: DashSet::new(),
        }
    }

    /// Filter holding the ids of every entry under `root` except `skip` and
    /// its descendants. Seeds the rescan of `skip` so an object already
    /// counted elsewhere in the tree is not counted again inside it.
    pub fn outside(root: &Arc<Entry>, skip: &Arc<Entry>) -> Self {
        let filter = Self::new();
        let mut stack = vec![Arc::clone(root)];

        while let Some(entry) = stack.pop() {
            if Arc::ptr_eq(&entry, skip) {
                continue;
            }
            if let Some(id) = entry.id() {
                filter.add(id);
            }
            stack.extend(entry.children());
        }

        filter
    }

    /// Register an id. Returns `true` the first time it is seen and
    /// `false` on every later call until [`InodeFilter::reset`].
    pub fn add(&self, id: FileId) -> bool {
        self.seen.insert(id)
    }

    /// Check if an id has been registered, without registering it.
    pub fn contains(&self, id: &FileId) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Forget every id.
    pub fn reset(&self) {
        self.seen.clear();
    }
}
