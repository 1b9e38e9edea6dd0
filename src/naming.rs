//! Translation between requested device slots and kernel device names.
//!
//! Xen-based hypervisors expose a slot requested as `/dev/sdX` to the guest
//! as `/dev/xvdX`. Other virtualisation backends keep the requested name or
//! use their own convention, so the mapping is a strategy rather than a fixed
//! table.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::device::{DEFAULT_DEVICE_ROOT, DevicePath};

/// Basename prefix of the device slots accepted by the cloud attach call.
pub const REQUESTED_PREFIX: &str = "sd";

/// Basename prefix Xen guests use for renamed `sd` slots.
pub const XEN_PREFIX: &str = "xvd";

/// Why a device path was rejected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InvalidDeviceReason {
    /// The path is not directly below the device-file root.
    OutsideDeviceRoot {
        /// Device-file root the path was checked against.
        root: Utf8PathBuf,
    },
    /// The basename is not `<prefix>` followed by lowercase letters.
    UnrecognisedFamily {
        /// Prefix the basename was expected to carry.
        prefix: &'static str,
    },
}

impl fmt::Display for InvalidDeviceReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutsideDeviceRoot { root } => write!(formatter, "not located under {root}"),
            Self::UnrecognisedFamily { prefix } => {
                write!(formatter, "not a {prefix}<letters> device")
            }
        }
    }
}

/// Raised when a device path falls outside the recognised namespace.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("invalid device name {path}: {reason}")]
pub struct InvalidDeviceName {
    /// Rejected path.
    pub path: DevicePath,
    /// Rejection reason.
    pub reason: InvalidDeviceReason,
}

/// Maps requested device slots to the names the kernel will expose.
///
/// Implementations must be bijective on the names they accept so that a
/// discovered device maps back to exactly one requested slot.
pub trait DeviceNaming {
    /// Returns the device path the kernel will expose for `requested`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDeviceName`] when `requested` is not below the device
    /// root or is not an `sd<letters>` slot.
    fn expected_device(&self, requested: &DevicePath) -> Result<DevicePath, InvalidDeviceName>;

    /// Returns the requested slot that surfaces as `discovered`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidDeviceName`] when `discovered` is not a name this
    /// strategy produces.
    fn requested_device(&self, discovered: &DevicePath) -> Result<DevicePath, InvalidDeviceName>;

    /// Returns the slot letters of a kernel name in either the requested or
    /// the exposed family, or `None` for unrelated devices.
    fn slot_letters<'a>(&self, name: &'a str) -> Option<&'a str>;

    /// Returns the device-file root the strategy builds paths under.
    fn device_root(&self) -> &Utf8Path;
}

/// Naming strategy that swaps one basename prefix for another.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PrefixNaming {
    device_root: Utf8PathBuf,
    requested_prefix: &'static str,
    kernel_prefix: &'static str,
}

impl Default for PrefixNaming {
    fn default() -> Self {
        Self::xen(DEFAULT_DEVICE_ROOT)
    }
}

impl PrefixNaming {
    /// Xen convention: `/dev/sdX` surfaces as `/dev/xvdX`.
    #[must_use]
    pub fn xen(device_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
            requested_prefix: REQUESTED_PREFIX,
            kernel_prefix: XEN_PREFIX,
        }
    }

    /// Backends that expose the requested slot unchanged.
    #[must_use]
    pub fn identity(device_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            device_root: device_root.into(),
            requested_prefix: REQUESTED_PREFIX,
            kernel_prefix: REQUESTED_PREFIX,
        }
    }

    fn letters_of<'a>(
        &self,
        path: &'a DevicePath,
        prefix: &'static str,
    ) -> Result<&'a str, InvalidDeviceName> {
        if path.parent() != Some(self.device_root.as_path()) {
            return Err(InvalidDeviceName {
                path: path.clone(),
                reason: InvalidDeviceReason::OutsideDeviceRoot {
                    root: self.device_root.clone(),
                },
            });
        }
        path.file_name()
            .and_then(|name| letters_after(name, prefix))
            .ok_or_else(|| InvalidDeviceName {
                path: path.clone(),
                reason: InvalidDeviceReason::UnrecognisedFamily { prefix },
            })
    }
}

impl DeviceNaming for PrefixNaming {
    fn expected_device(&self, requested: &DevicePath) -> Result<DevicePath, InvalidDeviceName> {
        let letters = self.letters_of(requested, self.requested_prefix)?;
        Ok(DevicePath::under(
            &self.device_root,
            &format!("{}{letters}", self.kernel_prefix),
        ))
    }

    fn requested_device(&self, discovered: &DevicePath) -> Result<DevicePath, InvalidDeviceName> {
        let letters = self.letters_of(discovered, self.kernel_prefix)?;
        Ok(DevicePath::under(
            &self.device_root,
            &format!("{}{letters}", self.requested_prefix),
        ))
    }

    fn slot_letters<'a>(&self, name: &'a str) -> Option<&'a str> {
        letters_after(name, self.kernel_prefix).or_else(|| letters_after(name, self.requested_prefix))
    }

    fn device_root(&self) -> &Utf8Path {
        &self.device_root
    }
}

/// Named naming strategies selectable from configuration.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NamingScheme {
    /// `sdX` surfaces as `xvdX`.
    #[default]
    Xen,
    /// `sdX` surfaces unchanged.
    Identity,
}

impl NamingScheme {
    /// Builds the strategy for this scheme rooted at `device_root`.
    #[must_use]
    pub fn naming(self, device_root: impl Into<Utf8PathBuf>) -> PrefixNaming {
        match self {
            Self::Xen => PrefixNaming::xen(device_root),
            Self::Identity => PrefixNaming::identity(device_root),
        }
    }
}

impl FromStr for NamingScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "xen" => Ok(Self::Xen),
            "identity" => Ok(Self::Identity),
            other => Err(format!("unknown naming scheme '{other}' (expected xen or identity)")),
        }
    }
}

/// Translates `requested` with the Xen convention under `/dev`.
///
/// # Errors
///
/// Returns [`InvalidDeviceName`] when `requested` is not a `/dev/sd<letters>`
/// path.
pub fn expected_device(requested: &DevicePath) -> Result<DevicePath, InvalidDeviceName> {
    PrefixNaming::default().expected_device(requested)
}

fn letters_after<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    name.strip_prefix(prefix)
        .filter(|letters| !letters.is_empty() && letters.bytes().all(|b| b.is_ascii_lowercase()))
}
