//! Error types for the attach workflow.

use thiserror::Error;

use super::AttachState;
use crate::allocator::NoAvailableDevice;
use crate::device::DevicePath;
use crate::inventory::InventoryError;
use crate::naming::InvalidDeviceName;

/// Errors raised while attaching and verifying a volume.
#[derive(Debug, Error)]
pub enum AttachError<ApiError>
where
    ApiError: std::error::Error + 'static,
{
    /// Raised when every device slot on the host is taken.
    #[error(transparent)]
    NoAvailableDevice(#[from] NoAvailableDevice),
    /// Raised when the requested slot is outside the recognised namespace.
    #[error(transparent)]
    InvalidDeviceName(#[from] InvalidDeviceName),
    /// Raised when the host inventory cannot be read.
    #[error("failed to read host devices: {0}")]
    Inventory(#[from] InventoryError),
    /// Raised when the requested slot, or its kernel name, already holds a
    /// device in the baseline.
    #[error("device slot {requested} is already in use as {expected}")]
    SlotInUse {
        /// Slot passed to the cloud attach call.
        requested: DevicePath,
        /// Kernel name the slot would surface as.
        expected: DevicePath,
    },
    /// Raised when an attach for the same volume is already running.
    #[error("an attach for volume {blockdevice_id} is already in progress")]
    AlreadyInFlight {
        /// Volume that was being attached.
        blockdevice_id: String,
    },
    /// Raised when the cloud accepted the attach but no matching device
    /// surfaced in time. The attachment is left in place.
    #[error(
        "volume {blockdevice_id} attached at {requested} but {expected} never appeared"
    )]
    DeviceNeverAppeared {
        /// Volume that was attached.
        blockdevice_id: String,
        /// Slot passed to the cloud attach call.
        requested: DevicePath,
        /// Kernel name that was awaited.
        expected: DevicePath,
    },
    /// Raised when the volume surfaced under a different name, or under no
    /// single identifiable name. The attachment has been detached.
    #[error(
        "attach at {requested} surfaced as {}; volume detached",
        describe_discovered(.discovered.as_ref())
    )]
    AttachedUnexpectedDevice {
        /// Slot passed to the cloud attach call.
        requested: DevicePath,
        /// Device that appeared instead, when exactly one did.
        discovered: Option<DevicePath>,
    },
    /// Raised when detaching after an unexpected device also failed. The
    /// volume may still be attached.
    #[error(
        "attach at {requested} surfaced as {} and the rollback detach failed: {source}",
        describe_discovered(.discovered.as_ref())
    )]
    RollbackFailed {
        /// Slot passed to the cloud attach call.
        requested: DevicePath,
        /// Device that appeared instead, when exactly one did.
        discovered: Option<DevicePath>,
        /// Provider error from the detach call.
        #[source]
        source: ApiError,
    },
    /// Raised by the cloud API. Passed through unchanged.
    #[error(transparent)]
    Cloud(ApiError),
}

fn describe_discovered(discovered: Option<&DevicePath>) -> String {
    discovered.map_or_else(
        || String::from("no unambiguous device"),
        ToString::to_string,
    )
}

impl<ApiError> AttachError<ApiError>
where
    ApiError: std::error::Error + 'static,
{
    /// Returns `true` when host and cloud state were left as they were and the
    /// caller may retry, possibly after re-enumerating or choosing another
    /// slot.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::NoAvailableDevice(_)
            | Self::SlotInUse { .. }
            | Self::AlreadyInFlight { .. }
            | Self::DeviceNeverAppeared { .. }
            | Self::Inventory(InventoryError::DeviceNotFound { .. }) => true,
            Self::InvalidDeviceName(_)
            | Self::Inventory(_)
            | Self::AttachedUnexpectedDevice { .. }
            | Self::RollbackFailed { .. }
            | Self::Cloud(_) => false,
        }
    }

    /// Returns the state the workflow stopped in.
    #[must_use]
    pub const fn final_state(&self) -> AttachState {
        match self {
            Self::NoAvailableDevice(_)
            | Self::InvalidDeviceName(_)
            | Self::Inventory(_)
            | Self::SlotInUse { .. }
            | Self::AlreadyInFlight { .. } => AttachState::Idle,
            Self::AttachedUnexpectedDevice { .. } => AttachState::RolledBack,
            Self::DeviceNeverAppeared { .. } | Self::RollbackFailed { .. } | Self::Cloud(_) => {
                AttachState::Failed
            }
        }
    }
}
