//! Device references and the cloud-side volume record.

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use uuid::Uuid;

/// Root of the device-file namespace on Linux hosts.
pub const DEFAULT_DEVICE_ROOT: &str = "/dev";

/// Absolute path to a block device file, such as `/dev/xvdj`.
///
/// Two references are the same device exactly when their paths are equal.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DevicePath(Utf8PathBuf);

impl DevicePath {
    /// Wraps an existing path without validation.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self(path.into())
    }

    /// Builds the path of kernel device `name` under `root`.
    #[must_use]
    pub fn under(root: &Utf8Path, name: &str) -> Self {
        Self(root.join(name))
    }

    /// Returns the underlying path.
    #[must_use]
    pub fn as_path(&self) -> &Utf8Path {
        &self.0
    }

    /// Returns the kernel device name (the final path component).
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name()
    }

    /// Returns the directory holding the device file.
    #[must_use]
    pub fn parent(&self) -> Option<&Utf8Path> {
        self.0.parent()
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, formatter)
    }
}

impl AsRef<Utf8Path> for DevicePath {
    fn as_ref(&self) -> &Utf8Path {
        self.as_path()
    }
}

impl From<&str> for DevicePath {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<Utf8PathBuf> for DevicePath {
    fn from(value: Utf8PathBuf) -> Self {
        Self(value)
    }
}

/// Errors raised when building a [`Volume`] record.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum VolumeError {
    /// Raised when the provider identifier is blank.
    #[error("blockdevice_id must not be empty")]
    MissingBlockdeviceId,
    /// Raised when the declared size is zero.
    #[error("volume {blockdevice_id} must have a positive size")]
    ZeroSize {
        /// Provider identifier of the offending volume.
        blockdevice_id: String,
    },
}

/// Cloud-side record of a block storage volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Logical dataset backed by this volume; stable across re-creation.
    pub dataset_id: Uuid,
    /// Provider identifier for the volume (for example `vol-0abc`).
    pub blockdevice_id: String,
    /// Declared size in bytes.
    pub size: u64,
    /// Compute instance the volume is attached to, if any.
    pub attached_to: Option<String>,
}

impl Volume {
    /// Creates an unattached volume record, trimming the provider identifier.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError`] when the identifier is blank or the size is
    /// zero.
    pub fn new(
        dataset_id: Uuid,
        blockdevice_id: impl Into<String>,
        size: u64,
    ) -> Result<Self, VolumeError> {
        let trimmed_id = blockdevice_id.into().trim().to_owned();
        if trimmed_id.is_empty() {
            return Err(VolumeError::MissingBlockdeviceId);
        }
        if size == 0 {
            return Err(VolumeError::ZeroSize {
                blockdevice_id: trimmed_id,
            });
        }
        Ok(Self {
            dataset_id,
            blockdevice_id: trimmed_id,
            size,
            attached_to: None,
        })
    }

    /// Returns a copy of the record marked as attached to `compute_id`.
    #[must_use]
    pub fn attached(&self, compute_id: impl Into<String>) -> Self {
        Self {
            attached_to: Some(compute_id.into()),
            ..self.clone()
        }
    }
}
