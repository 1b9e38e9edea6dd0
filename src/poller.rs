//! Bounded polling for devices that appear after an attach.

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

use crate::inventory::{DeviceInventory, InventoryError};

/// How long to wait for a device before giving up.
pub const DEFAULT_TIME_LIMIT: Duration = Duration::from_secs(60);

/// Pause between inventory scans.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound applied to any configured time limit.
const MAX_TIME_LIMIT: Duration = Duration::from_secs(24 * 60 * 60);

/// Deadline and pacing for [`wait_for_new_device`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Total time allowed for the device to appear. Limits above one day are
    /// clamped to one day.
    pub time_limit: Duration,
    /// Pause between successive scans.
    pub poll_interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::new(DEFAULT_TIME_LIMIT, DEFAULT_POLL_INTERVAL)
    }
}

impl PollSettings {
    /// Creates settings with an explicit deadline and interval.
    #[must_use]
    pub const fn new(time_limit: Duration, poll_interval: Duration) -> Self {
        Self {
            time_limit,
            poll_interval,
        }
    }
}

/// Result of polling for a newly attached device.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NewDevice {
    /// Exactly one new device of the expected size appeared.
    Found(String),
    /// Several new devices of the expected size were still present when the
    /// deadline passed.
    Ambiguous(BTreeSet<String>),
    /// No qualifying device appeared before the deadline.
    NotFound,
}

impl NewDevice {
    /// Returns the discovered device name, if exactly one was found.
    #[must_use]
    pub fn found(self) -> Option<String> {
        match self {
            Self::Found(name) => Some(name),
            Self::Ambiguous(_) | Self::NotFound => None,
        }
    }
}

enum Scan {
    Unavailable,
    Matches(BTreeSet<String>),
}

/// Waits for a single device absent from `baseline` whose size equals
/// `expected_size`.
///
/// Returns `None` once the time limit elapses without a single qualifying
/// device; the caller decides whether that is fatal. An ambiguous result
/// counts as nothing found and is logged as such.
pub async fn wait_for_new_device<I: DeviceInventory + ?Sized>(
    inventory: &I,
    baseline: &BTreeSet<String>,
    expected_size: u64,
    settings: PollSettings,
) -> Option<String> {
    let outcome = poll_for_new_device(inventory, baseline, expected_size, settings).await;
    if matches!(outcome, NewDevice::Ambiguous(_)) {
        log_not_found(baseline, expected_size, settings.time_limit.min(MAX_TIME_LIMIT));
    }
    outcome.found()
}

/// Polls the inventory until one qualifying device appears or the deadline
/// passes, distinguishing an ambiguous result from an empty one.
///
/// No scan starts at or after the deadline, so a zero time limit returns
/// [`NewDevice::NotFound`] without reading the inventory.
pub async fn poll_for_new_device<I: DeviceInventory + ?Sized>(
    inventory: &I,
    baseline: &BTreeSet<String>,
    expected_size: u64,
    settings: PollSettings,
) -> NewDevice {
    let time_limit = settings.time_limit.min(MAX_TIME_LIMIT);
    let deadline = Instant::now() + time_limit;
    let mut ambiguous: Option<BTreeSet<String>> = None;

    while let Some(remaining) = time_until(deadline) {
        match scan(inventory, baseline, expected_size) {
            Scan::Matches(mut matches) if matches.len() == 1 => {
                if let Some(name) = matches.pop_first() {
                    return NewDevice::Found(name);
                }
            }
            Scan::Matches(matches) if matches.is_empty() => ambiguous = None,
            Scan::Matches(matches) => ambiguous = Some(matches),
            Scan::Unavailable => {}
        }
        sleep(settings.poll_interval.min(remaining)).await;
    }

    if let Some(candidates) = ambiguous {
        warn!(
            expected_size,
            candidates = ?candidates,
            time_limit = ?time_limit,
            "several new devices match the expected size"
        );
        return NewDevice::Ambiguous(candidates);
    }

    log_not_found(baseline, expected_size, time_limit);
    NewDevice::NotFound
}

fn log_not_found(baseline: &BTreeSet<String>, expected_size: u64, time_limit: Duration) {
    warn!(
        expected_size,
        baseline = ?baseline,
        time_limit = ?time_limit,
        "no new device appeared in the OS"
    );
}

fn time_until(deadline: Instant) -> Option<Duration> {
    deadline
        .checked_duration_since(Instant::now())
        .filter(|remaining| !remaining.is_zero())
}

fn scan<I: DeviceInventory + ?Sized>(
    inventory: &I,
    baseline: &BTreeSet<String>,
    expected_size: u64,
) -> Scan {
    let current = match inventory.list_allocated_devices() {
        Ok(current) => current,
        Err(err) => {
            warn!(error = %err, "failed to list block devices; retrying");
            return Scan::Unavailable;
        }
    };

    let matches = current
        .difference(baseline)
        .filter(|name| match inventory.device_size(name) {
            Ok(size) => size == expected_size,
            Err(InventoryError::DeviceNotFound { .. }) => {
                debug!(device = %name, "new device vanished before its size was read");
                false
            }
            Err(err) => {
                warn!(device = %name, error = %err, "failed to read device size; retrying");
                false
            }
        })
        .cloned()
        .collect();
    Scan::Matches(matches)
}
