//! Core library for attaching cloud block volumes to a host.
//!
//! The crate asks a cloud API to attach a volume at a device slot, watches
//! the host's block devices for the new device, and accepts the attachment
//! only when the kernel exposes it under the name the slot translates to.
//! Anything else is detached again. Host inspection, slot allocation, name
//! translation and polling are usable on their own, as is the cluster
//! ownership check used when enumerating provider volumes.

pub mod allocator;
pub mod attach;
pub mod cloud;
pub mod config;
pub mod device;
pub mod inventory;
pub mod naming;
pub mod ownership;
pub mod poller;
#[cfg(test)]
pub mod test_helpers;
pub mod test_support;

pub use allocator::{NoAvailableDevice, select_free_device, select_free_device_with};
pub use attach::{AttachError, AttachState, AttachedVolume, AttachmentOrchestrator};
pub use cloud::{ApiFuture, BlockDeviceApi, VolumeTags};
pub use config::{AgentConfig, ConfigError};
pub use device::{DevicePath, Volume, VolumeError};
pub use inventory::{DeviceInventory, InventoryError, SysfsInventory};
pub use naming::{
    DeviceNaming, InvalidDeviceName, InvalidDeviceReason, NamingScheme, PrefixNaming,
    expected_device,
};
pub use ownership::{CloudVolume, OwnershipError, is_cluster_volume};
pub use poller::{NewDevice, PollSettings, poll_for_new_device, wait_for_new_device};
