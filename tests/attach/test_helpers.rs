//! Shared fixtures and helpers for attach BDD scenarios.

use std::collections::BTreeSet;
use std::time::Duration;

use blockdevice_agent::test_support::{ScriptedApi, SimulatedInventory};
use blockdevice_agent::{
    AttachError, AttachState, DevicePath, NoAvailableDevice, PollSettings, Volume,
};
use rstest::fixture;
use uuid::Uuid;

pub const VOLUME_SIZE: u64 = 10 * 1024 * 1024 * 1024;
const OTHER_DEVICE_SIZE: u64 = 8 * 1024 * 1024 * 1024;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum AttachOutcome {
    Attached(DevicePath),
    Unexpected {
        requested: DevicePath,
        discovered: Option<DevicePath>,
    },
    NeverAppeared,
    Other(String),
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SlotOutcome {
    Selected(DevicePath),
    Exhausted,
}

impl From<Result<DevicePath, NoAvailableDevice>> for SlotOutcome {
    fn from(result: Result<DevicePath, NoAvailableDevice>) -> Self {
        result.map_or(Self::Exhausted, Self::Selected)
    }
}

#[derive(Clone, Debug)]
pub struct AttachContext {
    pub api: ScriptedApi,
    pub inventory: SimulatedInventory,
    pub baseline: Vec<(String, u64)>,
    pub volume: Volume,
    pub settings: PollSettings,
    pub outcome: Option<(AttachOutcome, AttachState)>,
    pub selection: Option<SlotOutcome>,
}

impl AttachContext {
    pub fn baseline_names(&self) -> BTreeSet<String> {
        self.baseline.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn baseline_entries(&self) -> Vec<(&str, u64)> {
        self.baseline
            .iter()
            .map(|(name, size)| (name.as_str(), *size))
            .collect()
    }
}

#[fixture]
pub fn attach_context() -> AttachContext {
    AttachContext {
        api: ScriptedApi::new(),
        inventory: SimulatedInventory::default(),
        baseline: Vec::new(),
        volume: Volume::new(Uuid::new_v4(), "vol-0abc", VOLUME_SIZE)
            .unwrap_or_else(|err| panic!("volume fixture should be valid: {err}")),
        settings: PollSettings::new(Duration::from_millis(100), Duration::from_millis(2)),
        outcome: None,
        selection: None,
    }
}

pub fn parse_devices(devices: &str) -> Vec<(String, u64)> {
    devices
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_owned(), OTHER_DEVICE_SIZE))
        .collect()
}

pub fn classify<E: std::error::Error + 'static>(result: Result<DevicePath, AttachError<E>>) -> (AttachOutcome, AttachState) {
    match result {
        Ok(device) => (AttachOutcome::Attached(device), AttachState::Attached),
        Err(err) => {
            let state = err.final_state();
            let outcome = match err {
                AttachError::AttachedUnexpectedDevice {
                    requested,
                    discovered,
                } => AttachOutcome::Unexpected {
                    requested,
                    discovered,
                },
                AttachError::DeviceNeverAppeared { .. } => AttachOutcome::NeverAppeared,
                other => AttachOutcome::Other(other.to_string()),
            };
            (outcome, state)
        }
    }
}
