//! Host block device inventory.
//!
//! The inventory is a pure read of host state. Implementations must not
//! cache: the attach workflow relies on observing devices appear between
//! successive calls.

use std::collections::BTreeSet;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use thiserror::Error;

/// Default sysfs directory listing every block device known to the kernel.
pub const DEFAULT_SYSFS_BLOCK_ROOT: &str = "/sys/block";

/// Sysfs reports sizes in fixed 512-byte sectors regardless of the device's
/// logical block size.
const SECTOR_SIZE: u64 = 512;

const SIZE_FILE: &str = "size";

/// Errors raised while probing host devices.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum InventoryError {
    /// Raised when a named device is not live at call time. Callers should
    /// re-enumerate rather than treat this as a hard failure.
    #[error("block device {name} not found")]
    DeviceNotFound {
        /// Kernel device name that was looked up.
        name: String,
    },
    /// Raised when device metadata cannot be interpreted.
    #[error("malformed metadata at {path}: {message}")]
    Malformed {
        /// Metadata file that could not be parsed.
        path: Utf8PathBuf,
        /// Parser error message.
        message: String,
    },
    /// Raised when the host device metadata cannot be read.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
}

/// Read access to the block devices currently visible to the OS.
pub trait DeviceInventory {
    /// Lists the kernel names of every block device, boot device included.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::Io`] when the device listing is unreadable.
    fn list_allocated_devices(&self) -> Result<BTreeSet<String>, InventoryError>;

    /// Returns the size of the named device in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`InventoryError::DeviceNotFound`] when `name` is not a live
    /// device, or another [`InventoryError`] when its metadata is unreadable.
    fn device_size(&self, name: &str) -> Result<u64, InventoryError>;
}

impl<T: DeviceInventory + ?Sized> DeviceInventory for &T {
    fn list_allocated_devices(&self) -> Result<BTreeSet<String>, InventoryError> {
        (**self).list_allocated_devices()
    }

    fn device_size(&self, name: &str) -> Result<u64, InventoryError> {
        (**self).device_size(name)
    }
}

/// Inventory backed by the kernel's sysfs block directory.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SysfsInventory {
    block_root: Utf8PathBuf,
}

impl Default for SysfsInventory {
    fn default() -> Self {
        Self::new(DEFAULT_SYSFS_BLOCK_ROOT)
    }
}

impl SysfsInventory {
    /// Creates an inventory reading devices below `block_root`.
    #[must_use]
    pub fn new(block_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            block_root: block_root.into(),
        }
    }

    /// Returns the sysfs directory being probed.
    #[must_use]
    pub fn block_root(&self) -> &Utf8Path {
        &self.block_root
    }

    fn open_root(&self) -> Result<Dir, InventoryError> {
        Dir::open_ambient_dir(&self.block_root, ambient_authority()).map_err(|err| {
            InventoryError::Io {
                path: self.block_root.clone(),
                message: err.to_string(),
            }
        })
    }
}

impl DeviceInventory for SysfsInventory {
    fn list_allocated_devices(&self) -> Result<BTreeSet<String>, InventoryError> {
        let dir = self.open_root()?;
        let io_error = |err: io::Error| InventoryError::Io {
            path: self.block_root.clone(),
            message: err.to_string(),
        };

        let mut names = BTreeSet::new();
        for entry in dir.entries().map_err(io_error)? {
            let name = entry.and_then(|item| item.file_name()).map_err(io_error)?;
            names.insert(name);
        }
        Ok(names)
    }

    fn device_size(&self, name: &str) -> Result<u64, InventoryError> {
        if !is_plain_name(name) {
            return Err(InventoryError::DeviceNotFound {
                name: name.to_owned(),
            });
        }

        // Entries under /sys/block are symlinks into /sys/devices, so each
        // device directory is opened on its own rather than through the root.
        let device_dir = self.block_root.join(name);
        let path = device_dir.join(SIZE_FILE);
        let not_found = || InventoryError::DeviceNotFound {
            name: name.to_owned(),
        };
        let io_error = |err: io::Error| InventoryError::Io {
            path: path.clone(),
            message: err.to_string(),
        };

        let dir = match Dir::open_ambient_dir(&device_dir, ambient_authority()) {
            Ok(dir) => dir,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(io_error(err)),
        };
        let contents = match dir.read_to_string(SIZE_FILE) {
            Ok(contents) => contents,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Err(not_found()),
            Err(err) => return Err(io_error(err)),
        };

        let sectors = contents
            .trim()
            .parse::<u64>()
            .map_err(|err| InventoryError::Malformed {
                path: path.clone(),
                message: err.to_string(),
            })?;
        sectors
            .checked_mul(SECTOR_SIZE)
            .ok_or_else(|| InventoryError::Malformed {
                path,
                message: format!("{sectors} sectors overflow a byte count"),
            })
    }
}

/// Kernel device names are single path components.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/')
}
