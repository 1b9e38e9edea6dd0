//! Shared unit-test helpers for building fake sysfs trees.

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use tempfile::TempDir;

use crate::inventory::SysfsInventory;

/// Temporary directory laid out like `/sys/block`.
pub struct FakeSysfs {
    root: Utf8PathBuf,
    _tmp: TempDir,
}

impl FakeSysfs {
    /// Creates an empty block directory inside a fresh tempdir.
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
        let root = Utf8PathBuf::from_path_buf(tmp.path().join("block"))
            .unwrap_or_else(|path| panic!("temp path should be utf8: {}", path.display()));
        Dir::create_ambient_dir_all(&root, ambient_authority())
            .unwrap_or_else(|err| panic!("create {root}: {err}"));
        Self { root, _tmp: tmp }
    }

    fn dir(&self) -> Dir {
        Dir::open_ambient_dir(&self.root, ambient_authority())
            .unwrap_or_else(|err| panic!("open {}: {err}", self.root))
    }

    /// Adds a device reporting `sectors` 512-byte sectors.
    pub fn add_device(&self, name: &str, sectors: u64) {
        self.write_size_file(name, &format!("{sectors}\n"));
    }

    /// Writes raw `contents` as the size file of `name`.
    pub fn write_size_file(&self, name: &str, contents: &str) {
        let dir = self.dir();
        dir.create_dir_all(name)
            .unwrap_or_else(|err| panic!("create device dir {name}: {err}"));
        dir.write(Utf8Path::new(name).join("size"), contents)
            .unwrap_or_else(|err| panic!("write size for {name}: {err}"));
    }

    /// Adds a device the way the kernel lays it out: a symlink from the block
    /// directory into a separate device tree.
    #[cfg(unix)]
    pub fn add_linked_device(&self, name: &str, sectors: u64) {
        let target = self.devices_root().join(name);
        Dir::create_ambient_dir_all(&target, ambient_authority())
            .unwrap_or_else(|err| panic!("create {target}: {err}"));
        Dir::open_ambient_dir(&target, ambient_authority())
            .and_then(|dir| dir.write("size", format!("{sectors}\n")))
            .unwrap_or_else(|err| panic!("write size for {name}: {err}"));
        std::os::unix::fs::symlink(&target, self.root.join(name))
            .unwrap_or_else(|err| panic!("link {name}: {err}"));
    }

    #[cfg(unix)]
    fn devices_root(&self) -> Utf8PathBuf {
        self.root
            .parent()
            .map_or_else(|| self.root.join("devices"), |parent| parent.join("devices"))
    }

    /// Removes the device directory, as if the device was detached.
    pub fn remove_device(&self, name: &str) {
        self.dir()
            .remove_dir_all(name)
            .unwrap_or_else(|err| panic!("remove device dir {name}: {err}"));
    }

    /// Returns an inventory reading this tree.
    pub fn inventory(&self) -> SysfsInventory {
        SysfsInventory::new(self.root.clone())
    }
}
