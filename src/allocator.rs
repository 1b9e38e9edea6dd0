//! Device slot selection for new attachments.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;

use crate::device::DevicePath;
use crate::naming::{DeviceNaming, PrefixNaming, REQUESTED_PREFIX};

/// Candidate slot letters, in selection order.
const SLOT_LETTERS: std::ops::RangeInclusive<u8> = b'a'..=b'z';

/// Raised when every slot letter is already allocated. Recoverable once
/// devices are detached elsewhere on the host.
#[derive(Clone, Copy, Debug, Default, Error, Eq, PartialEq)]
#[error("no available device slot: all letters a-z are allocated")]
pub struct NoAvailableDevice;

/// Chooses the lowest free `/dev/sd<letter>` slot, treating the Xen-renamed
/// `xvd<letter>` of a slot as occupying it.
///
/// # Errors
///
/// Returns [`NoAvailableDevice`] when all 26 letters are in use.
pub fn select_free_device(allocated: &BTreeSet<String>) -> Result<DevicePath, NoAvailableDevice> {
    select_free_device_with(&PrefixNaming::default(), allocated)
}

/// Chooses the lowest free slot under `naming`'s device root.
///
/// A letter is taken when any allocated kernel name carries exactly that
/// letter in either the requested or the exposed family.
///
/// # Errors
///
/// Returns [`NoAvailableDevice`] when all 26 letters are in use.
pub fn select_free_device_with<N: DeviceNaming + ?Sized>(
    naming: &N,
    allocated: &BTreeSet<String>,
) -> Result<DevicePath, NoAvailableDevice> {
    debug!(in_use = ?allocated, "selecting free device slot");
    let taken = allocated
        .iter()
        .filter_map(|name| naming.slot_letters(name))
        .collect::<BTreeSet<_>>();

    SLOT_LETTERS
        .map(char::from)
        .map(String::from)
        .find(|letter| !taken.contains(letter.as_str()))
        .map(|letter| {
            DevicePath::under(naming.device_root(), &format!("{REQUESTED_PREFIX}{letter}"))
        })
        .ok_or(NoAvailableDevice)
}
