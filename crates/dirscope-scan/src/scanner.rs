//! Concurrent breadth-first directory scanner.
//!
//! A pass starts with the root directory in a bounded queue. Each worker
//! takes one directory, lists it through the [`DirectoryReader`], attaches
//! the surviving children and hands the new subdirectories back to the
//! queue. When the queue is full the worker keeps the overflow in a private
//! backlog and works through it itself, so no worker ever blocks on a send.
//!
//! Completion is detected by counting: `pending` holds the number of
//! directories discovered but not yet expanded. Children are added to it
//! before their parent is subtracted, so it reaches zero exactly once, when
//! the last directory has been expanded. The worker that observes zero
//! closes the stop channel and every idle worker exits. The last worker out
//! runs the completion callback and closes the done signal. A watchdog
//! thread abandons the pass if no directory is processed within the stall
//! timeout.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{
    Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError, bounded, select, unbounded,
};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use dirscope_core::{
    DirectoryReader, Entry, FileFilters, ScanConfig, ScanError, TopEntries, join_path,
};

use crate::inode::InodeFilter;
use crate::progress::{ProgressCounters, ScanProgress};

/// Kind of traversal pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanPass {
    /// Fresh scan of a new root. Clears the shared inode filter and the top
    /// trackers first.
    Full,
    /// Rescan of an already-known subtree in place. The subtree's children
    /// are dropped and rebuilt under a private inode filter, so ids
    /// registered by the original pass do not hide the subtree. The top
    /// trackers are left alone.
    Refresh,
}

/// Parallel directory scanner.
///
/// Cheap to clone: the reader, inode filter and top trackers are shared
/// between clones.
#[derive(Clone)]
pub struct Scanner {
    reader: Arc<dyn DirectoryReader>,
    exclude: Arc<[String]>,
    filters: FileFilters,
    inodes: Arc<InodeFilter>,
    top: Arc<TopEntries>,
    workers: usize,
    queue_capacity: usize,
    idle_tick: Duration,
    stall_timeout: Duration,
}

impl Scanner {
    /// Create a scanner from a configuration and a directory reader.
    pub fn new(config: &ScanConfig, reader: Arc<dyn DirectoryReader>) -> Self {
        Self {
            reader,
            exclude: config.exclude_rules().into(),
            filters: config.file_filters(),
            inodes: Arc::new(InodeFilter::new()),
            top: Arc::new(TopEntries::new(config.top_entries.max(1))),
            workers: config.worker_count().max(1),
            queue_capacity: config.queue_capacity.max(1),
            idle_tick: config.idle_tick(),
            stall_timeout: config.stall_timeout(),
        }
    }

    /// Inode filter shared by full passes.
    pub fn inodes(&self) -> &Arc<InodeFilter> {
        &self.inodes
    }

    /// Top files and directories trackers.
    pub fn top(&self) -> &Arc<TopEntries> {
        &self.top
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Whether a path matches one of the exclude rules.
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.exclude.is_empty() {
            return false;
        }

        let path = path.to_lowercase();
        self.exclude.iter().any(|rule| path.contains(rule.as_str()))
    }

    /// Scan `root` on the calling thread and fold every listing failure into
    /// one error.
    ///
    /// A non-directory root is a no-op.
    pub fn traverse(&self, root: &Arc<Entry>) -> Result<(), ScanError> {
        if !root.is_dir() {
            return Ok(());
        }

        self.inodes.reset();
        self.top.reset();

        let progress = ProgressCounters::new();
        let mut queue = VecDeque::from([Arc::clone(root)]);
        let mut errors = Vec::new();

        while let Some(dir) = queue.pop_front() {
            match self.expand(&dir, &self.inodes, Some(&*self.top), &progress) {
                Ok(expansion) => {
                    queue.extend(expansion.subdirs);
                    errors.extend(expansion.skipped);
                }
                Err(err) => errors.push(err),
            }
        }

        let progress = progress.snapshot();
        debug!(
            root = root.path(),
            dirs = progress.dirs_scanned,
            files = progress.files_scanned,
            errors = errors.len(),
            elapsed = ?progress.elapsed,
            "scan finished"
        );

        match ScanError::join(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Start a full scan of `root` in the background.
    ///
    /// Returns `None` when `root` is not a directory.
    pub fn traverse_async(&self, root: &Arc<Entry>) -> Option<ScanHandle> {
        self.traverse_with(root, ScanPass::Full, || {})
    }

    /// Start a background pass of the given kind.
    ///
    /// `on_complete` runs exactly once, right before the done signal closes,
    /// on whichever thread finishes the pass. It is not called when `root`
    /// is not a directory and `None` is returned.
    pub fn traverse_with<F>(
        &self,
        root: &Arc<Entry>,
        kind: ScanPass,
        on_complete: F,
    ) -> Option<ScanHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        match kind {
            ScanPass::Full => {
                if !root.is_dir() {
                    return None;
                }
                self.inodes.reset();
                self.top.reset();
                Some(self.launch(root, Arc::clone(&self.inodes), kind, Box::new(on_complete)))
            }
            ScanPass::Refresh => self.refresh_with(root, InodeFilter::new(), on_complete),
        }
    }

    /// Start a [`ScanPass::Refresh`] of `dir` whose inode filter starts out
    /// with `seen`, typically [`InodeFilter::outside`] of the tree root.
    pub fn refresh_with<F>(
        &self,
        dir: &Arc<Entry>,
        seen: InodeFilter,
        on_complete: F,
    ) -> Option<ScanHandle>
    where
        F: FnOnce() + Send + 'static,
    {
        if !dir.is_dir() {
            return None;
        }

        dir.clear_children();
        Some(self.launch(dir, Arc::new(seen), ScanPass::Refresh, Box::new(on_complete)))
    }

    fn launch(
        &self,
        root: &Arc<Entry>,
        inodes: Arc<InodeFilter>,
        kind: ScanPass,
        on_complete: Box<dyn FnOnce() + Send>,
    ) -> ScanHandle {
        let (queue_tx, queue_rx) = bounded(self.queue_capacity);
        let (stop_tx, stop_rx) = bounded(0);
        let (done_tx, done_rx) = bounded(0);
        let (err_tx, err_rx) = unbounded();
        let progress = Arc::new(ProgressCounters::new());

        let pass = Arc::new(Pass {
            scanner: self.clone(),
            root: root.path().to_string(),
            inodes,
            track_top: kind == ScanPass::Full,
            queue_tx,
            queue_rx,
            stop_tx: Mutex::new(Some(stop_tx)),
            stop_rx,
            pending: AtomicUsize::new(1),
            live: AtomicUsize::new(1),
            progress: Arc::clone(&progress),
            errors: err_tx,
            finish: Mutex::new(Some(Finish {
                done: done_tx,
                on_complete,
            })),
        });

        // The queue is empty and has room for at least one item.
        let _ = pass.queue_tx.try_send(Arc::clone(root));

        info!(root = root.path(), workers = self.workers, ?kind, "scan started");

        for id in 0..self.workers {
            pass.live.fetch_add(1, Ordering::AcqRel);
            let worker = Arc::clone(&pass);
            let spawned = thread::Builder::new()
                .name(format!("dirscope-scan-{id}"))
                .spawn(move || {
                    worker.run();
                    worker.exit();
                });

            if let Err(err) = spawned {
                pass.live.fetch_sub(1, Ordering::AcqRel);
                warn!(%err, "failed to spawn scan worker");
                let _ = pass.errors.send(ScanError::io(root.path(), err));
                break;
            }
        }

        if !self.stall_timeout.is_zero() {
            let watchdog = Arc::clone(&pass);
            if let Err(err) = thread::Builder::new()
                .name("dirscope-scan-watchdog".to_string())
                .spawn(move || watchdog.watch())
            {
                warn!(%err, "failed to spawn scan watchdog");
            }
        }

        // Drop the launcher's token. With no worker running this finishes
        // the pass right here.
        pass.exit();

        ScanHandle {
            done: done_rx,
            errors: err_rx,
            progress,
        }
    }

    /// List one directory and attach its surviving children. Returns the
    /// new subdirectories for further expansion.
    fn expand(
        &self,
        dir: &Arc<Entry>,
        inodes: &InodeFilter,
        top: Option<&TopEntries>,
        progress: &ProgressCounters,
    ) -> Result<Expansion, ScanError> {
        let mut expansion = Expansion::default();
        if !dir.is_dir() || self.is_excluded(dir.path()) {
            return Ok(expansion);
        }

        let listing = self.reader.read_dir(dir.path()).map_err(|err| {
            progress.record_error();
            ScanError::io(dir.path(), err)
        })?;
        progress.record_dir();

        for name in listing.invalid_names {
            progress.record_error();
            expansion.skipped.push(ScanError::InvalidName {
                path: Path::new(dir.path()).join(name),
            });
        }

        for info in listing.entries {
            if !self.filters.accept(&info) {
                continue;
            }

            if let Some(id) = info.id {
                if !inodes.add(id) {
                    continue;
                }
            }

            let path = join_path(dir.path(), &info.name);
            let mut child = if info.is_dir {
                Entry::new_dir(path, info.mod_time)
            } else {
                Entry::new_file(path, info.size, info.mod_time)
            };
            if let Some(id) = info.id {
                child = child.with_id(id);
            }
            let child = Arc::new(child);

            if info.is_dir {
                dir.add_child(Arc::clone(&child));
                expansion.subdirs.push(child);
            } else {
                progress.record_file(info.size);
                if let Some(top) = top {
                    top.files().push_safe(Arc::clone(&child));
                }
                dir.add_child(child);
            }
        }

        Ok(expansion)
    }
}

/// Outcome of listing one directory.
#[derive(Default)]
struct Expansion {
    /// New subdirectories, still to be expanded.
    subdirs: Vec<Arc<Entry>>,
    /// Entries left out of the tree.
    skipped: Vec<ScanError>,
}

impl fmt::Debug for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("exclude", &self.exclude)
            .field("filters", &self.filters)
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity)
            .field("stall_timeout", &self.stall_timeout)
            .finish()
    }
}

/// Receiving side of a background scan.
///
/// `done` never yields a value; it disconnects exactly once, when the pass
/// is over. `errors` carries listing failures and disconnects after `done`.
#[derive(Debug)]
pub struct ScanHandle {
    done: Receiver<()>,
    errors: Receiver<ScanError>,
    progress: Arc<ProgressCounters>,
}

impl ScanHandle {
    /// A handle whose pass is already over, e.g. for a tree loaded from the
    /// cache.
    pub fn completed() -> Self {
        let (_, done) = bounded(0);
        let (_, errors) = unbounded();
        Self {
            done,
            errors,
            progress: Arc::new(ProgressCounters::new()),
        }
    }

    /// Done signal, for use in `select!`.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    /// Error stream.
    pub fn errors(&self) -> &Receiver<ScanError> {
        &self.errors
    }

    /// Whether the pass is over.
    pub fn is_done(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Block for at most `timeout`. Returns `true` once the pass is over.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        matches!(
            self.done.recv_timeout(timeout),
            Err(RecvTimeoutError::Disconnected)
        )
    }

    /// Block until the pass is over and return every error it reported.
    pub fn wait(self) -> Vec<ScanError> {
        let mut collected = Vec::new();

        loop {
            select! {
                recv(self.errors) -> msg => match msg {
                    Ok(err) => collected.push(err),
                    Err(_) => break,
                },
                recv(self.done) -> _ => {
                    collected.extend(self.errors.try_iter());
                    break;
                }
            }
        }

        collected
    }

    /// Snapshot of the pass counters.
    pub fn progress(&self) -> ScanProgress {
        self.progress.snapshot()
    }

    /// Split into the done signal and the error stream.
    pub fn into_parts(self) -> (Receiver<()>, Receiver<ScanError>) {
        (self.done, self.errors)
    }
}

struct Finish {
    done: Sender<()>,
    on_complete: Box<dyn FnOnce() + Send>,
}

/// State shared by the threads of one background pass.
struct Pass {
    scanner: Scanner,
    root: String,
    inodes: Arc<InodeFilter>,
    track_top: bool,
    queue_tx: Sender<Arc<Entry>>,
    queue_rx: Receiver<Arc<Entry>>,
    stop_tx: Mutex<Option<Sender<()>>>,
    stop_rx: Receiver<()>,
    /// Directories discovered but not yet expanded.
    pending: AtomicUsize,
    /// Running workers plus the launcher's token.
    live: AtomicUsize,
    progress: Arc<ProgressCounters>,
    errors: Sender<ScanError>,
    finish: Mutex<Option<Finish>>,
}

impl Pass {
    fn run(&self) {
        let mut backlog = VecDeque::new();

        loop {
            while let Some(dir) = backlog.pop_front() {
                match self.queue_tx.try_send(dir) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dir)) => {
                        backlog.push_front(dir);
                        break;
                    }
                    Err(TrySendError::Disconnected(_)) => return,
                }
            }

            // Anything left in the backlog means the queue is full.
            let dir = match backlog.pop_front() {
                Some(dir) => dir,
                None => select! {
                    recv(self.queue_rx) -> msg => match msg {
                        Ok(dir) => dir,
                        Err(_) => return,
                    },
                    recv(self.stop_rx) -> _ => return,
                },
            };

            self.process(dir, &mut backlog);
        }
    }

    fn process(&self, dir: Arc<Entry>, backlog: &mut VecDeque<Arc<Entry>>) {
        let top = self.track_top.then(|| &*self.scanner.top);
        match self.scanner.expand(&dir, &self.inodes, top, &self.progress) {
            Ok(expansion) => {
                for err in expansion.skipped {
                    debug!(%err, "entry skipped");
                    let _ = self.errors.send(err);
                }
                self.pending.fetch_add(expansion.subdirs.len(), Ordering::AcqRel);
                backlog.extend(expansion.subdirs);
            }
            Err(err) => {
                debug!(%err, "directory listing failed");
                // The caller may have stopped listening.
                let _ = self.errors.send(err);
            }
        }

        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.stop();
        }
    }

    /// Release every worker waiting on the queue.
    fn stop(&self) {
        self.stop_tx.lock().take();
    }

    fn exit(&self) {
        if self.live.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.complete();
        }
    }

    fn complete(&self) {
        self.stop();

        let Some(finish) = self.finish.lock().take() else {
            return;
        };

        let progress = self.progress.snapshot();
        info!(
            root = %self.root,
            dirs = progress.dirs_scanned,
            files = progress.files_scanned,
            errors = progress.errors_count,
            elapsed = ?progress.elapsed,
            "scan finished"
        );

        (finish.on_complete)();
        drop(finish.done);
    }

    fn watch(&self) {
        let mut last = self.progress.processed();
        let mut last_change = Instant::now();

        loop {
            match self.stop_rx.recv_timeout(self.scanner.idle_tick) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => return,
            }

            let processed = self.progress.processed();
            if processed != last {
                last = processed;
                last_change = Instant::now();
                continue;
            }

            if last_change.elapsed() >= self.scanner.stall_timeout {
                warn!(
                    root = %self.root,
                    pending = self.pending.load(Ordering::Acquire),
                    "scan made no progress within the stall timeout, abandoning it"
                );
                self.complete();
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dirscope_core::{DirEntryInfo, DirListing, FileId};
    use std::collections::HashMap;
    use std::ffi::OsString;
    use std::io;

    /// In-memory reader keyed by directory path.
    struct MapReader(HashMap<String, Vec<DirEntryInfo>>);

    impl DirectoryReader for MapReader {
        fn read_dir(&self, path: &str) -> io::Result<DirListing> {
            self.0
                .get(path)
                .cloned()
                .map(DirListing::from)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
        }
    }

    fn p(path: &str) -> String {
        path.replace('/', std::path::MAIN_SEPARATOR_STR)
    }

    fn sample_reader() -> Arc<dyn DirectoryReader> {
        let mut map = HashMap::new();
        map.insert(
            p("/r"),
            vec![
                DirEntryInfo::file("a", 100, 0),
                DirEntryInfo::file("b", 150, 0),
                DirEntryInfo::dir("sub", 0),
                DirEntryInfo::dir("locked", 0),
            ],
        );
        map.insert(p("/r/sub"), vec![DirEntryInfo::file("c", 700, 0)]);
        Arc::new(MapReader(map))
    }

    fn config(workers: usize) -> ScanConfig {
        ScanConfig {
            workers,
            ..ScanConfig::default()
        }
    }

    #[test]
    fn test_traverse_collects_errors() {
        let scanner = Scanner::new(&config(1), sample_reader());
        let root = Arc::new(Entry::new_dir(p("/r"), 0));

        let err = scanner.traverse(&root).unwrap_err();
        assert!(matches!(err, ScanError::NotFound { .. }));

        assert_eq!(root.calculate_size(), 950);
        assert_eq!(root.total_files(), 3);
        assert_eq!(root.total_dirs(), 2);
        assert_eq!(scanner.top().files().len(), 3);
    }

    #[test]
    fn test_traverse_async_matches_sync() {
        let scanner = Scanner::new(&config(4), sample_reader());
        let root = Arc::new(Entry::new_dir(p("/r"), 0));

        let handle = scanner.traverse_async(&root).unwrap();
        let errors = handle.wait();
        assert_eq!(errors.len(), 1);

        root.calculate_size();
        assert_eq!(root.size(), 950);
        assert_eq!(root.local_dirs(), 2);
        assert_eq!(root.local_files(), 2);
    }

    #[test]
    fn test_file_root_is_noop() {
        let scanner = Scanner::new(&config(2), sample_reader());
        let file = Arc::new(Entry::new_file(p("/r/a"), 1, 0));
        assert!(scanner.traverse_async(&file).is_none());
        assert!(scanner.traverse(&file).is_ok());
    }

    #[test]
    fn test_on_complete_runs_before_done() {
        let scanner = Scanner::new(&config(2), sample_reader());
        let root = Arc::new(Entry::new_dir(p("/r"), 0));
        let flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let seen = Arc::clone(&flag);

        let handle = scanner
            .traverse_with(&root, ScanPass::Refresh, move || {
                seen.store(true, Ordering::SeqCst);
            })
            .unwrap();
        handle.wait();

        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(root.child_count(), 4);
        assert!(scanner.top().files().is_empty());
    }

    #[test]
    fn test_completed_handle() {
        let handle = ScanHandle::completed();
        assert!(handle.is_done());
        assert!(handle.wait_timeout(Duration::from_millis(1)));
        assert!(handle.wait().is_empty());
    }

    #[test]
    fn test_exclude_is_case_insensitive() {
        let config = ScanConfig {
            exclude: vec!["SUB".to_string()],
            ..config(1)
        };
        let scanner = Scanner::new(&config, sample_reader());
        assert!(scanner.is_excluded(&p("/r/sub")));
        assert!(!scanner.is_excluded(&p("/r/a")));
    }

    /// Lists `/r` with two names that failed to decode.
    struct MangledReader;

    impl DirectoryReader for MangledReader {
        fn read_dir(&self, path: &str) -> io::Result<DirListing> {
            if path != p("/r") {
                return Ok(DirListing::default());
            }
            Ok(DirListing {
                entries: vec![DirEntryInfo::file("ok", 10, 0)],
                invalid_names: vec![OsString::from("bad1"), OsString::from("bad2")],
            })
        }
    }

    #[test]
    fn test_invalid_names_are_reported_not_attached() {
        let scanner = Scanner::new(&config(2), Arc::new(MangledReader));

        let root = Arc::new(Entry::new_dir(p("/r"), 0));
        let err = scanner.traverse(&root).unwrap_err();
        assert_eq!(err.count(), 2);
        assert_eq!(root.child_count(), 1);

        let root = Arc::new(Entry::new_dir(p("/r"), 0));
        let handle = scanner.traverse_async(&root).unwrap();
        assert!(handle.wait_timeout(Duration::from_secs(5)));
        assert_eq!(handle.progress().errors_count, 2);
        let errors = handle.wait();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| matches!(e, ScanError::InvalidName { .. })));
        assert_eq!(root.child_count(), 1);
        assert_eq!(root.calculate_size(), 10);
    }

    #[test]
    fn test_entries_carry_ids() {
        let mut map = HashMap::new();
        map.insert(
            p("/r"),
            vec![DirEntryInfo::file("a", 1, 0).with_id(FileId::new(1, 5))],
        );
        let scanner = Scanner::new(&config(1), Arc::new(MapReader(map)));
        let root = Arc::new(Entry::new_dir(p("/r"), 0));
        scanner.traverse(&root).unwrap();

        assert_eq!(root.children()[0].id(), Some(FileId::new(1, 5)));
    }

    #[test]
    fn test_refresh_rebuilds_children() {
        let scanner = Scanner::new(&config(2), sample_reader());
        let root = Arc::new(Entry::new_dir(p("/r"), 0));
        let _ = scanner.traverse(&root);
        assert_eq!(root.child_count(), 4);

        let handle = scanner
            .refresh_with(&root, InodeFilter::new(), || {})
            .unwrap();
        handle.wait();

        assert_eq!(root.child_count(), 4);
        assert_eq!(root.calculate_size(), 950);
    }
}
