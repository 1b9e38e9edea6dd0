//! Cloud block storage capability consumed by the attach workflow.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use crate::device::DevicePath;

/// Provider tags keyed by tag name.
pub type VolumeTags = BTreeMap<String, String>;

/// Future returned by cloud operations.
pub type ApiFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Attach, detach, and tag lookups implemented by a cloud client.
pub trait BlockDeviceApi {
    /// Provider specific error type. The attach workflow passes these through
    /// unchanged.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Asks the provider to attach `blockdevice_id` to `compute_id` at the
    /// requested device slot.
    fn attach<'a>(
        &'a self,
        blockdevice_id: &'a str,
        compute_id: &'a str,
        device: &'a DevicePath,
    ) -> ApiFuture<'a, (), Self::Error>;

    /// Detaches `blockdevice_id` from whichever instance holds it. Detaching
    /// an already detached volume succeeds.
    fn detach<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, (), Self::Error>;

    /// Returns the provider tags recorded on `blockdevice_id`.
    fn list_tags<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, VolumeTags, Self::Error>;
}

impl<T: BlockDeviceApi + ?Sized + Sync> BlockDeviceApi for &T {
    type Error = T::Error;

    fn attach<'a>(
        &'a self,
        blockdevice_id: &'a str,
        compute_id: &'a str,
        device: &'a DevicePath,
    ) -> ApiFuture<'a, (), Self::Error> {
        (**self).attach(blockdevice_id, compute_id, device)
    }

    fn detach<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, (), Self::Error> {
        (**self).detach(blockdevice_id)
    }

    fn list_tags<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, VolumeTags, Self::Error> {
        (**self).list_tags(blockdevice_id)
    }
}
