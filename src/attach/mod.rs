//! Attach a volume and confirm the host sees it under the expected name.
//!
//! The workflow asks the cloud to attach at a requested slot, waits for a
//! device of the volume's size to appear, and accepts it only when its name
//! is the kernel name the slot translates to. Any other device triggers an
//! immediate detach so a volume is never used under a name that might belong
//! to a concurrent attachment.

mod error;

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, error, info, warn};

pub use error::AttachError;

use crate::allocator::select_free_device_with;
use crate::cloud::BlockDeviceApi;
use crate::device::{DevicePath, Volume};
use crate::inventory::DeviceInventory;
use crate::naming::{DeviceNaming, PrefixNaming};
use crate::poller::{NewDevice, PollSettings, poll_for_new_device};

/// Stages of a single attach.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttachState {
    /// Nothing has been sent to the cloud.
    Idle,
    /// The attach call is outstanding.
    Attaching,
    /// The cloud accepted the attach; waiting for the device.
    AwaitingDevice,
    /// A candidate device is being checked against the expected name.
    Verifying,
    /// The expected device appeared.
    Attached,
    /// An unexpected device appeared and the volume was detached.
    RolledBack,
    /// The attach failed, or no device appeared, or the rollback failed.
    Failed,
}

impl AttachState {
    /// Returns `true` when the workflow may move from `self` to `next`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Attaching)
                | (Self::Attaching, Self::AwaitingDevice | Self::Failed)
                | (Self::AwaitingDevice, Self::Verifying | Self::Failed)
                | (
                    Self::Verifying,
                    Self::Attached | Self::RolledBack | Self::Failed
                )
        )
    }

    /// Returns `true` for states the workflow never leaves.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Attached | Self::RolledBack | Self::Failed)
    }
}

impl fmt::Display for AttachState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Attaching => "attaching",
            Self::AwaitingDevice => "awaiting-device",
            Self::Verifying => "verifying",
            Self::Attached => "attached",
            Self::RolledBack => "rolled-back",
            Self::Failed => "failed",
        };
        formatter.write_str(label)
    }
}

/// Volume record and device path returned by a completed attach.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachedVolume {
    /// Volume with `attached_to` set to the target instance.
    pub volume: Volume,
    /// Device the volume is visible as on this host.
    pub device: DevicePath,
}

/// Drives attach, poll, verify and rollback for one host.
///
/// Calls for different volumes may run concurrently. A second call for a
/// volume that is still being attached fails with
/// [`AttachError::AlreadyInFlight`].
#[derive(Debug)]
pub struct AttachmentOrchestrator<A, I, N = PrefixNaming> {
    api: A,
    inventory: I,
    naming: N,
    settings: PollSettings,
    in_flight: Mutex<HashSet<String>>,
}

impl<A, I, N> AttachmentOrchestrator<A, I, N>
where
    A: BlockDeviceApi,
    I: DeviceInventory,
    N: DeviceNaming,
{
    /// Creates an orchestrator over the given cloud API, inventory and naming
    /// strategy.
    #[must_use]
    pub fn new(api: A, inventory: I, naming: N, settings: PollSettings) -> Self {
        Self {
            api,
            inventory,
            naming,
            settings,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Snapshots the inventory, picks a free slot and attaches `volume` to
    /// `compute_id` there.
    ///
    /// # Errors
    ///
    /// Returns [`AttachError::Inventory`] when the baseline cannot be read,
    /// [`AttachError::NoAvailableDevice`] when no slot is free, and any error
    /// of [`Self::attach_and_verify`].
    pub async fn attach_volume(
        &self,
        volume: &Volume,
        compute_id: &str,
    ) -> Result<AttachedVolume, AttachError<A::Error>> {
        let baseline = self.inventory.list_allocated_devices()?;
        let requested = select_free_device_with(&self.naming, &baseline)?;
        debug!(
            blockdevice_id = %volume.blockdevice_id,
            requested = %requested,
            "selected device slot"
        );
        let device = self
            .attach_and_verify(volume, compute_id, &requested, &baseline)
            .await?;
        Ok(AttachedVolume {
            volume: volume.attached(compute_id),
            device,
        })
    }

    /// Attaches `volume` to `compute_id` at `requested` and returns the
    /// device path once the expected kernel device appears.
    ///
    /// `baseline` must be the host's device names captured before this call.
    ///
    /// # Errors
    ///
    /// - [`AttachError::AlreadyInFlight`] when the volume is already being
    ///   attached.
    /// - [`AttachError::InvalidDeviceName`] or [`AttachError::SlotInUse`]
    ///   before any cloud call.
    /// - [`AttachError::Cloud`] when the attach call fails.
    /// - [`AttachError::DeviceNeverAppeared`] when nothing surfaces in time;
    ///   the volume stays attached.
    /// - [`AttachError::AttachedUnexpectedDevice`] after detaching a volume
    ///   that surfaced elsewhere, or [`AttachError::RollbackFailed`] when that
    ///   detach fails.
    pub async fn attach_and_verify(
        &self,
        volume: &Volume,
        compute_id: &str,
        requested: &DevicePath,
        baseline: &BTreeSet<String>,
    ) -> Result<DevicePath, AttachError<A::Error>> {
        let blockdevice_id = volume.blockdevice_id.as_str();
        let Some(_claim) = InFlightClaim::acquire(&self.in_flight, blockdevice_id) else {
            warn!(blockdevice_id, "attach already in progress for volume");
            return Err(AttachError::AlreadyInFlight {
                blockdevice_id: blockdevice_id.to_owned(),
            });
        };

        let expected = self.naming.expected_device(requested)?;
        if is_listed(baseline, requested) || is_listed(baseline, &expected) {
            return Err(AttachError::SlotInUse {
                requested: requested.clone(),
                expected,
            });
        }

        let mut progress = Progress::new(blockdevice_id);
        progress.advance(AttachState::Attaching);
        if let Err(err) = self.api.attach(blockdevice_id, compute_id, requested).await {
            progress.advance(AttachState::Failed);
            return Err(AttachError::Cloud(err));
        }

        progress.advance(AttachState::AwaitingDevice);
        let outcome = poll_for_new_device(&self.inventory, baseline, volume.size, self.settings).await;
        let discovered = match outcome {
            NewDevice::Found(name) => Some(DevicePath::under(self.naming.device_root(), &name)),
            NewDevice::Ambiguous(_) => None,
            NewDevice::NotFound => {
                progress.advance(AttachState::Failed);
                warn!(
                    blockdevice_id,
                    requested = %requested,
                    expected = %expected,
                    time_limit = ?self.settings.time_limit,
                    "attached volume never appeared on the host"
                );
                return Err(AttachError::DeviceNeverAppeared {
                    blockdevice_id: blockdevice_id.to_owned(),
                    requested: requested.clone(),
                    expected,
                });
            }
        };

        progress.advance(AttachState::Verifying);
        if discovered.as_ref() == Some(&expected) {
            progress.advance(AttachState::Attached);
            info!(
                blockdevice_id,
                compute_id,
                device = %expected,
                "volume attached"
            );
            return Ok(expected);
        }

        self.roll_back(&mut progress, requested, &expected, discovered)
            .await
    }

    async fn roll_back(
        &self,
        progress: &mut Progress<'_>,
        requested: &DevicePath,
        expected: &DevicePath,
        discovered: Option<DevicePath>,
    ) -> Result<DevicePath, AttachError<A::Error>> {
        let blockdevice_id = progress.blockdevice_id;
        let discovered_label = discovered
            .as_ref()
            .map_or_else(|| String::from("<ambiguous>"), ToString::to_string);
        warn!(
            blockdevice_id,
            requested = %requested,
            expected = %expected,
            discovered = %discovered_label,
            "volume surfaced as an unexpected device; detaching"
        );

        match self.api.detach(blockdevice_id).await {
            Ok(()) => {
                progress.advance(AttachState::RolledBack);
                Err(AttachError::AttachedUnexpectedDevice {
                    requested: requested.clone(),
                    discovered,
                })
            }
            Err(source) => {
                progress.advance(AttachState::Failed);
                error!(
                    blockdevice_id,
                    requested = %requested,
                    discovered = %discovered_label,
                    error = %source,
                    "failed to detach volume after unexpected attachment"
                );
                Err(AttachError::RollbackFailed {
                    requested: requested.clone(),
                    discovered,
                    source,
                })
            }
        }
    }
}

fn is_listed(baseline: &BTreeSet<String>, device: &DevicePath) -> bool {
    device
        .file_name()
        .is_some_and(|name| baseline.contains(name))
}

struct Progress<'a> {
    blockdevice_id: &'a str,
    state: AttachState,
}

impl<'a> Progress<'a> {
    const fn new(blockdevice_id: &'a str) -> Self {
        Self {
            blockdevice_id,
            state: AttachState::Idle,
        }
    }

    fn advance(&mut self, next: AttachState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal attach transition {} -> {next}",
            self.state
        );
        debug!(
            blockdevice_id = self.blockdevice_id,
            from = %self.state,
            to = %next,
            "attach state transition"
        );
        self.state = next;
    }
}

/// Marks a volume as being attached until dropped.
struct InFlightClaim<'a> {
    registry: &'a Mutex<HashSet<String>>,
    blockdevice_id: String,
}

impl<'a> InFlightClaim<'a> {
    fn acquire(registry: &'a Mutex<HashSet<String>>, blockdevice_id: &str) -> Option<Self> {
        let inserted = registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(blockdevice_id.to_owned());
        inserted.then(|| Self {
            registry,
            blockdevice_id: blockdevice_id.to_owned(),
        })
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.blockdevice_id);
    }
}
