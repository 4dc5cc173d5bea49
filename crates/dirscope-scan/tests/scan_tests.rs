use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, bounded};
use dirscope_scan::{
    DirEntryInfo, DirListing, DirectoryReader, Entry, FileId, FsReader, InodeFilter, ScanConfig,
    ScanError, ScanPass, Scanner, Tree,
};
use tempfile::TempDir;

const ROOT_NAME: &str = "scan_fixture_root";

struct Fixture {
    name: &'static str,
    files: &'static [&'static str],
    dirs: &'static [Fixture],
}

const FILES_1: &[&str] = &["level_1_file_1", "level_1_file_2"];
const FILES_2: &[&str] = &["level_2_file_1", "level_2_file_2"];
const FILES_3: &[&str] = &["level_3_file_1", "level_3_file_2"];

const FIXTURE: Fixture = Fixture {
    name: ROOT_NAME,
    files: &["root_file_1", "root_file_2", "root_file_3"],
    dirs: &[
        Fixture { name: "level_1_1", files: FILES_1, dirs: &[] },
        Fixture { name: "level_1_2", files: FILES_1, dirs: &[] },
        Fixture {
            name: "level_1_3",
            files: FILES_1,
            dirs: &[
                Fixture { name: "level_2_1", files: FILES_2, dirs: &[] },
                Fixture {
                    name: "level_2_2",
                    files: FILES_2,
                    dirs: &[
                        Fixture { name: "level_3_1", files: FILES_3, dirs: &[] },
                        Fixture { name: "level_3_2", files: FILES_3, dirs: &[] },
                    ],
                },
                Fixture { name: "level_2_3", files: FILES_2, dirs: &[] },
            ],
        },
        Fixture { name: "level_1_4", files: FILES_1, dirs: &[] },
    ],
};

fn materialize(fixture: &Fixture, parent: &Path) {
    let dir = parent.join(fixture.name);
    fs::create_dir(&dir).unwrap();
    for file in fixture.files {
        fs::write(dir.join(file), file.as_bytes()).unwrap();
    }
    for sub in fixture.dirs {
        materialize(sub, &dir);
    }
}

fn fixture_root() -> (TempDir, String) {
    let temp = TempDir::new().unwrap();
    materialize(&FIXTURE, temp.path());
    let root = temp.path().join(ROOT_NAME).to_str().unwrap().to_string();
    (temp, root)
}

fn config(exclude: &[&str]) -> ScanConfig {
    ScanConfig::builder()
        .exclude(exclude.iter().map(|s| s.to_string()).collect::<Vec<_>>())
        .workers(4usize)
        .build()
        .unwrap()
}

fn scan_sync(root: &str, exclude: &[&str]) -> Arc<Entry> {
    let tree = Tree::new(&config(exclude), Arc::new(FsReader::new()));
    tree.set_root(Arc::new(Entry::new_dir(root, 0)));
    tree.traverse().unwrap();
    tree.calculate_size();
    tree.root().unwrap()
}

fn scan_async(root: &str, exclude: &[&str]) -> Arc<Entry> {
    let tree = Tree::new(&config(exclude), Arc::new(FsReader::new()));
    tree.set_root(Arc::new(Entry::new_dir(root, 0)));
    let handle = tree.traverse_async().unwrap();
    assert!(handle.wait_timeout(Duration::from_secs(10)), "scan timed out");
    assert!(handle.wait().is_empty());
    tree.calculate_size();
    tree.root().unwrap()
}

fn names(entry: &Entry) -> BTreeSet<String> {
    entry.children().iter().map(|c| c.name().to_string()).collect()
}

fn assert_same_shape(a: &Entry, b: &Entry) {
    assert_eq!(a.path(), b.path());
    assert_eq!(a.size(), b.size());
    assert_eq!(a.local_dirs(), b.local_dirs());
    assert_eq!(a.local_files(), b.local_files());
    assert_eq!(a.total_dirs(), b.total_dirs());
    assert_eq!(a.total_files(), b.total_files());
    assert_eq!(names(a), names(b));

    let mut left = a.children();
    let mut right = b.children();
    left.sort_by(|x, y| x.path().cmp(y.path()));
    right.sort_by(|x, y| x.path().cmp(y.path()));
    for (x, y) in left.iter().zip(right.iter()) {
        assert_same_shape(x, y);
    }
}

fn verify_structure(entry: &Entry, fixture: &Fixture) {
    let expected: BTreeSet<String> = fixture
        .files
        .iter()
        .chain(fixture.dirs.iter().map(|d| &d.name))
        .map(|s| s.to_string())
        .collect();
    assert_eq!(names(entry), expected, "children of {}", entry.path());

    for sub in fixture.dirs {
        let child = entry.child(sub.name).unwrap();
        assert!(child.is_dir());
        verify_structure(&child, sub);
    }

    for file in fixture.files {
        let child = entry.child(file).unwrap();
        assert_eq!(child.size(), file.len() as u64);
    }
}

#[test]
fn test_traverse_counts() {
    let (_temp, root) = fixture_root();
    let entry = scan_sync(&root, &[]);

    assert_eq!(entry.local_dirs(), 4);
    assert_eq!(entry.local_files(), 3);
    assert_eq!(entry.total_files(), 21);
    assert_eq!(entry.total_dirs(), 9);
    verify_structure(&entry, &FIXTURE);
}

#[test]
fn test_traverse_async_matches_sync() {
    let (_temp, root) = fixture_root();
    let sync = scan_sync(&root, &[]);
    let parallel = scan_async(&root, &[]);

    assert_eq!(parallel.total_files(), 21);
    assert_eq!(parallel.total_dirs(), 9);
    assert_same_shape(&sync, &parallel);
    verify_structure(&parallel, &FIXTURE);
}

#[test]
fn test_traverse_exclude() {
    let (_temp, root) = fixture_root();

    let cases: &[(&[&str], u64, u64)] = &[
        (&[ROOT_NAME], 0, 0),
        (&["level_1_1"], 9, 19),
        (&["LEVEL_2"], 7, 11),
        (&["level_3", "level_1_4"], 9, 15),
    ];

    for (exclude, dirs, files) in cases {
        for entry in [scan_sync(&root, exclude), scan_async(&root, exclude)] {
            assert_eq!(entry.total_dirs(), *dirs, "exclude {exclude:?}");
            assert_eq!(entry.total_files(), *files, "exclude {exclude:?}");
        }
    }
}

#[test]
fn test_scenario_sizes() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("a"), vec![0u8; 100]).unwrap();
    fs::write(temp.path().join("b"), vec![0u8; 150]).unwrap();
    fs::create_dir(temp.path().join("sub")).unwrap();
    fs::write(temp.path().join("sub").join("c"), vec![0u8; 700]).unwrap();

    let root = scan_async(temp.path().to_str().unwrap(), &[]);
    assert_eq!(root.size(), 950);
    assert_eq!(root.total_files(), 3);
    assert_eq!(root.total_dirs(), 1);
    assert_eq!(root.child("sub").unwrap().size(), 700);
}

#[test]
fn test_hidden_and_size_filters() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join(".hidden"), vec![0u8; 10]).unwrap();
    fs::write(temp.path().join("small"), vec![0u8; 1]).unwrap();
    fs::write(temp.path().join("large"), vec![0u8; 64]).unwrap();

    let config = ScanConfig::builder()
        .include_hidden(false)
        .min_file_size(Some(8u64))
        .build()
        .unwrap();
    let tree = Tree::new(&config, Arc::new(FsReader::new()));
    tree.set_root(Arc::new(Entry::new_dir(temp.path().to_str().unwrap(), 0)));
    tree.traverse().unwrap();
    tree.calculate_size();

    let root = tree.root().unwrap();
    assert_eq!(names(&root), BTreeSet::from(["large".to_string()]));
    assert_eq!(root.size(), 64);
}

#[test]
fn test_unreadable_dir_reported() {
    let temp = TempDir::new().unwrap();
    let scanner = Scanner::new(&config(&[]), Arc::new(FsReader::new()));
    let root = Arc::new(Entry::new_dir(
        temp.path().join("missing").to_str().unwrap(),
        0,
    ));

    let errors = scanner.traverse_async(&root).unwrap().wait();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].path().is_some());
    assert_eq!(root.child_count(), 0);
}

/// Reader over a fixed map, where several names can share one `FileId`.
struct LinkedReader(HashMap<String, Vec<DirEntryInfo>>);

impl DirectoryReader for LinkedReader {
    fn read_dir(&self, path: &str) -> io::Result<DirListing> {
        Ok(self.0.get(path).cloned().unwrap_or_default().into())
    }
}

fn sep(path: &str) -> String {
    path.replace('/', std::path::MAIN_SEPARATOR_STR)
}

#[test]
fn test_inode_dedup() {
    let shared = FileId::new(1, 42);
    let mut map = HashMap::new();
    map.insert(
        sep("/m"),
        vec![
            DirEntryInfo::dir("left", 0).with_id(FileId::new(1, 1)),
            DirEntryInfo::dir("right", 0).with_id(FileId::new(1, 2)),
        ],
    );
    map.insert(
        sep("/m/left"),
        vec![DirEntryInfo::file("data", 500, 0).with_id(shared)],
    );
    map.insert(
        sep("/m/right"),
        vec![
            DirEntryInfo::file("data-link", 500, 0).with_id(shared),
            // Bind mount looping back onto left.
            DirEntryInfo::dir("loop", 0).with_id(FileId::new(1, 1)),
        ],
    );

    let scanner = Scanner::new(&config(&[]), Arc::new(LinkedReader(map)));

    for _ in 0..2 {
        let root = Arc::new(Entry::new_dir(sep("/m"), 0));
        assert!(scanner.traverse_async(&root).unwrap().wait().is_empty());
        root.calculate_size();

        // Each full pass resets the filter, so the second run counts the
        // same objects again.
        assert_eq!(root.total_files(), 1);
        assert_eq!(root.total_dirs(), 2);
        assert_eq!(root.size(), 500);
    }
}

#[test]
fn test_inode_filter_reset() {
    let filter = InodeFilter::new();
    let id = FileId::new(3, 9);
    assert!(filter.add(id));
    assert!(!filter.add(id));
    filter.reset();
    assert!(filter.add(id));
}

#[cfg(unix)]
#[test]
fn test_hard_links_counted_once() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("original"), vec![0u8; 300]).unwrap();
    fs::hard_link(temp.path().join("original"), temp.path().join("link")).unwrap();

    let root = scan_async(temp.path().to_str().unwrap(), &[]);
    assert_eq!(root.total_files(), 1);
    assert_eq!(root.size(), 300);
}

/// Reader whose listing of `/slow` blocks until the gate is released.
struct GatedReader {
    gate: Receiver<()>,
}

impl DirectoryReader for GatedReader {
    fn read_dir(&self, path: &str) -> io::Result<DirListing> {
        if path.ends_with("slow") {
            let _ = self.gate.recv();
        }
        Ok(DirListing::default())
    }
}

#[test]
fn test_stalled_scan_is_abandoned() {
    let (release, gate) = bounded::<()>(0);
    let config = ScanConfig::builder()
        .workers(1usize)
        .idle_tick_ms(10u64)
        .stall_timeout_ms(200u64)
        .build()
        .unwrap();
    let scanner = Scanner::new(&config, Arc::new(GatedReader { gate }));
    let root = Arc::new(Entry::new_dir(sep("/slow"), 0));

    let handle = scanner.traverse_async(&root).unwrap();
    assert!(!handle.is_done());
    assert!(handle.wait_timeout(Duration::from_secs(10)));

    drop(release);
}

#[test]
fn test_many_directories_overflow_queue() {
    let mut map = HashMap::new();
    let fanout = 300;
    map.insert(
        sep("/wide"),
        (0..fanout).map(|i| DirEntryInfo::dir(format!("d{i}"), 0)).collect(),
    );
    for i in 0..fanout {
        map.insert(
            sep(&format!("/wide/d{i}")),
            vec![DirEntryInfo::file("f", 1, 0)],
        );
    }

    let config = ScanConfig::builder()
        .workers(3usize)
        .queue_capacity(4usize)
        .build()
        .unwrap();
    let scanner = Scanner::new(&config, Arc::new(LinkedReader(map)));
    let root = Arc::new(Entry::new_dir(sep("/wide"), 0));

    let handle = scanner.traverse_async(&root).unwrap();
    assert!(handle.wait_timeout(Duration::from_secs(10)));
    assert_eq!(handle.progress().dirs_scanned, fanout as u64 + 1);

    root.calculate_size();
    assert_eq!(root.total_dirs(), fanout as u64);
    assert_eq!(root.total_files(), fanout as u64);
    assert_eq!(scanner.top().files().len(), 16);
}

#[cfg(target_os = "linux")]
#[test]
fn test_non_utf8_names_do_not_collide() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = TempDir::new().unwrap();
    let first = temp.path().join(OsStr::from_bytes(b"d\xff"));
    let second = temp.path().join(OsStr::from_bytes(b"d\xfe"));
    fs::create_dir(&first).unwrap();
    fs::create_dir(&second).unwrap();
    fs::write(first.join("x"), vec![0u8; 100]).unwrap();
    fs::write(second.join("y"), vec![0u8; 200]).unwrap();
    fs::create_dir(temp.path().join("plain")).unwrap();
    fs::write(temp.path().join("plain/z"), vec![0u8; 50]).unwrap();

    let tree = Tree::new(&config(&[]), Arc::new(FsReader::new()));
    tree.set_root(Arc::new(Entry::new_dir(temp.path().to_str().unwrap(), 0)));
    let handle = tree.traverse_async().unwrap();
    let errors = handle.wait();
    tree.calculate_final_size();

    assert_eq!(errors.len(), 2);
    let mut reported: Vec<_> = errors
        .iter()
        .map(|err| {
            assert!(matches!(err, ScanError::InvalidName { .. }));
            err.path().unwrap().clone()
        })
        .collect();
    reported.sort();
    assert_eq!(reported, vec![second, first]);

    let root = tree.root().unwrap();
    let paths: Vec<_> = root.children().iter().map(|c| c.path().to_string()).collect();
    assert_eq!(paths.len(), 1);
    assert!(paths.iter().all(|p| !p.contains('\u{FFFD}')));
    assert_eq!(root.size(), 50);
    assert_eq!(root.total_files(), 1);
}

#[cfg(unix)]
#[test]
fn test_refresh_keeps_hard_links_counted_once() {
    let temp = TempDir::new().unwrap();
    fs::create_dir(temp.path().join("inner")).unwrap();
    fs::write(temp.path().join("outside"), vec![0u8; 300]).unwrap();
    fs::hard_link(temp.path().join("outside"), temp.path().join("inner/link")).unwrap();
    fs::write(temp.path().join("inner/own"), vec![0u8; 20]).unwrap();

    let tree = Tree::new(&config(&[]), Arc::new(FsReader::new()));
    tree.set_root(Arc::new(Entry::new_dir(temp.path().to_str().unwrap(), 0)));
    assert!(tree.traverse_async().unwrap().wait().is_empty());
    let before = tree.calculate_final_size();
    assert_eq!(before, 320);

    let root = tree.root().unwrap();
    let inner = root.child("inner").unwrap();
    let handle = tree
        .traverse_entry(&inner, ScanPass::Refresh, || {})
        .unwrap();
    assert!(handle.wait().is_empty());

    assert_eq!(tree.calculate_final_size(), before);
    assert_eq!(root.total_files(), 2);
    assert_eq!(inner.child_count(), 1);
    assert!(inner.child("link").is_none());
}
