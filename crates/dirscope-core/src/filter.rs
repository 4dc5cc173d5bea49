//! Filters applied while scanning and while browsing.
//!
//! Two families live here. [`FileInfoFilter`]s run during traversal against
//! raw [`DirEntryInfo`] values and decide whether a child enters the tree at
//! all. [`EntryFilter`]s run against finished [`Entry`] values and only
//! affect what a view shows.

use std::fmt;
use std::sync::Arc;

use crate::entry::Entry;
use crate::fs::DirEntryInfo;

/// Scan-time predicate over a directory child.
pub trait FileInfoFilter: Send + Sync {
    /// Return `true` to keep the child.
    fn accept(&self, info: &DirEntryInfo) -> bool;
}

impl<F> FileInfoFilter for F
where
    F: Fn(&DirEntryInfo) -> bool + Send + Sync,
{
    fn accept(&self, info: &DirEntryInfo) -> bool {
        self(info)
    }
}

/// Keeps files whose size lies within inclusive bounds. Directories always
/// pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeFilter {
    min: u64,
    max: u64,
}

impl SizeFilter {
    /// Create a size filter. A `max` of zero means no upper bound.
    pub fn new(min: u64, max: u64) -> Self {
        Self {
            min,
            max: if max == 0 { u64::MAX } else { max },
        }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }
}

impl FileInfoFilter for SizeFilter {
    fn accept(&self, info: &DirEntryInfo) -> bool {
        info.is_dir || (self.min..=self.max).contains(&info.size)
    }
}

/// Drops dot-named files and directories.
#[derive(Debug, Clone, Copy, Default)]
pub struct HiddenFilter;

impl FileInfoFilter for HiddenFilter {
    fn accept(&self, info: &DirEntryInfo) -> bool {
        !info.is_hidden()
    }
}

/// Ordered chain of scan-time filters. A child is kept only when every
/// filter accepts it.
#[derive(Clone, Default)]
pub struct FileFilters {
    filters: Vec<Arc<dyn FileInfoFilter>>,
}

impl FileFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter to the chain.
    pub fn push(&mut self, filter: impl FileInfoFilter + 'static) {
        self.filters.push(Arc::new(filter));
    }

    /// Builder-style variant of [`FileFilters::push`].
    pub fn with(mut self, filter: impl FileInfoFilter + 'static) -> Self {
        self.push(filter);
        self
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Apply every filter in order.
    pub fn accept(&self, info: &DirEntryInfo) -> bool {
        self.filters.iter().all(|filter| filter.accept(info))
    }
}

impl fmt::Debug for FileFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileFilters")
            .field("len", &self.filters.len())
            .finish()
    }
}

/// Unique identifier of a view filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterId {
    DirsOnly,
    FilesOnly,
    EmptyDirs,
    Name,
}

/// View-time predicate over an [`Entry`].
///
/// `toggle` and `reset` default to no-ops for filters that are always on.
pub trait EntryFilter: Send {
    fn id(&self) -> FilterId;

    /// Return `true` to show the entry.
    fn filter(&self, entry: &Entry) -> bool;

    fn toggle(&mut self) {}

    fn reset(&mut self) {}
}

/// Shows directories only while enabled.
#[derive(Debug, Default)]
pub struct DirsOnly {
    enabled: bool,
}

impl EntryFilter for DirsOnly {
    fn id(&self) -> FilterId {
        FilterId::DirsOnly
    }

    fn filter(&self, entry: &Entry) -> bool {
        !self.enabled || entry.is_dir()
    }

    fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    fn reset(&mut self) {
        self.enabled = false;
    }
}

/// Shows files only while enabled.
#[derive(Debug, Default)]
pub struct FilesOnly {
    enabled: bool,
}

impl EntryFilter for FilesOnly {
    fn id(&self) -> FilterId {
        FilterId::FilesOnly
    }

    fn filter(&self, entry: &Entry) -> bool {
        !self.enabled || entry.is_file()
    }

    fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    fn reset(&mut self) {
        self.enabled = false;
    }
}

/// Hides directories without a single file anywhere below them.
#[derive(Debug, Default)]
pub struct EmptyDirs;

impl EntryFilter for EmptyDirs {
    fn id(&self) -> FilterId {
        FilterId::EmptyDirs
    }

    fn filter(&self, entry: &Entry) -> bool {
        entry.is_file() || entry.total_files() > 0
    }
}

/// Case-insensitive substring match on the entry name.
#[derive(Debug, Default)]
pub struct NameFilter {
    query: String,
    enabled: bool,
}

impl NameFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the query.
    pub fn set_query(&mut self, query: impl AsRef<str>) {
        self.query = query.as_ref().to_lowercase();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl EntryFilter for NameFilter {
    fn id(&self) -> FilterId {
        FilterId::Name
    }

    fn filter(&self, entry: &Entry) -> bool {
        entry.name().to_lowercase().contains(&self.query)
    }

    fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    fn reset(&mut self) {
        self.enabled = false;
        self.query.clear();
    }
}

/// Set of view filters keyed by id.
#[derive(Default)]
pub struct FilterList {
    filters: Vec<Box<dyn EntryFilter>>,
}

impl FilterList {
    /// Build a list; a later filter replaces an earlier one with the same id.
    pub fn new(filters: impl IntoIterator<Item = Box<dyn EntryFilter>>) -> Self {
        let mut list = Self::default();
        for filter in filters {
            list.insert(filter);
        }
        list
    }

    pub fn insert(&mut self, filter: Box<dyn EntryFilter>) {
        let id = filter.id();
        self.filters.retain(|existing| existing.id() != id);
        self.filters.push(filter);
    }

    pub fn get_mut(&mut self, id: FilterId) -> Option<&mut (dyn EntryFilter + 'static)> {
        self.filters
            .iter_mut()
            .find(|filter| filter.id() == id)
            .map(|filter| filter.as_mut())
    }

    /// Whether the entry passes every filter.
    pub fn valid(&self, entry: &Entry) -> bool {
        self.filters.iter().all(|filter| filter.filter(entry))
    }

    /// Toggle the filter with this id. Unknown ids are ignored.
    pub fn toggle(&mut self, id: FilterId) {
        if let Some(filter) = self.get_mut(id) {
            filter.toggle();
        }
    }

    /// Reset every filter.
    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    /// Children of `entry` that pass the list, largest first.
    pub fn apply(&self, entry: &Entry) -> Vec<Arc<Entry>> {
        entry
            .sorted_children()
            .into_iter()
            .filter(|child| self.valid(child))
            .collect()
    }
}
