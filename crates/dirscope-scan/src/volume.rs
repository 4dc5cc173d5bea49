//! Mounted volume discovery.

use std::collections::HashSet;
use std::io;

use dirscope_core::{VolumeEnumerator, VolumeInfo};
use sysinfo::Disks;
use tracing::debug;

/// Filesystem types that never hold user data.
const PSEUDO_FS_TYPES: &[&str] = &[
    "proc", "sysfs", "devtmpfs", "tmpfs", "cgroup", "cgroup2", "overlay", "squashfs", "devpts",
    "securityfs", "pstore", "efivarfs", "bpf", "autofs", "mqueue", "hugetlbfs", "debugfs",
    "tracefs", "fusectl", "configfs", "ramfs", "rpc_pipefs", "nsfs", "binfmt_misc",
];

/// One mounted filesystem as reported by the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    pub device: String,
    pub path: String,
    pub fs_type: String,
    pub total_bytes: u64,
    pub free_bytes: u64,
}

/// Lists volumes through the OS disk list.
#[derive(Debug, Clone, Default)]
pub struct MountTable;

impl MountTable {
    pub fn new() -> Self {
        Self
    }

    /// Every mounted filesystem with a UTF-8 mount point, unfiltered.
    pub fn mounts(&self) -> Vec<MountPoint> {
        let disks = Disks::new_with_refreshed_list();

        disks
            .list()
            .iter()
            .filter_map(|disk| {
                let Some(path) = disk.mount_point().to_str() else {
                    debug!(mount = ?disk.mount_point(), "skipping non UTF-8 mount point");
                    return None;
                };

                Some(MountPoint {
                    device: disk.name().to_string_lossy().into_owned(),
                    path: path.to_string(),
                    fs_type: disk.file_system().to_string_lossy().into_owned(),
                    total_bytes: disk.total_space(),
                    free_bytes: disk.available_space(),
                })
            })
            .collect()
    }
}

impl VolumeEnumerator for MountTable {
    fn list_volumes(&self) -> io::Result<Vec<VolumeInfo>> {
        let volumes = select_volumes(self.mounts());
        debug!(count = volumes.len(), "listed volumes");
        Ok(volumes)
    }
}

/// Turn raw mounts into browsable volumes: pseudo filesystems, mounts
/// without capacity and repeated mount points are dropped. Order is kept.
pub fn select_volumes(mounts: Vec<MountPoint>) -> Vec<VolumeInfo> {
    let mut seen = HashSet::new();

    mounts
        .into_iter()
        .filter(|mount| {
            !PSEUDO_FS_TYPES.contains(&mount.fs_type.as_str())
                && mount.total_bytes > 0
                && seen.insert(mount.path.clone())
        })
        .map(|mount| {
            let mut info =
                VolumeInfo::from_capacity(mount.path, mount.total_bytes, mount.free_bytes);
            info.volume = mount.device;
            info.fs_name = mount.fs_type;
            info
        })
        .collect()
}
