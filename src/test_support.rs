//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

use crate::cloud::{ApiFuture, BlockDeviceApi, VolumeTags};
use crate::device::DevicePath;
use crate::inventory::{DeviceInventory, InventoryError};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    mutex
        .lock()
        .unwrap_or_else(|err| panic!("lock poisoned: {what}: {err}"))
}

/// Inventory that replays scripted device snapshots.
///
/// Each call to [`DeviceInventory::list_allocated_devices`] serves the next
/// snapshot; the last snapshot keeps being served once the script runs out.
/// Size lookups answer from the snapshot served most recently.
#[derive(Clone, Debug, Default)]
pub struct SimulatedInventory {
    state: Arc<Mutex<InventoryState>>,
}

#[derive(Debug, Default)]
struct InventoryState {
    snapshots: Vec<BTreeMap<String, u64>>,
    cursor: usize,
    current: BTreeMap<String, u64>,
    vanishing: BTreeSet<String>,
    list_calls: usize,
}

impl SimulatedInventory {
    /// Creates an inventory whose first snapshot holds `devices`.
    #[must_use]
    pub fn new(devices: &[(&str, u64)]) -> Self {
        let inventory = Self::default();
        inventory.then_report(devices);
        inventory
    }

    /// Appends a snapshot served after the ones already scripted.
    pub fn then_report(&self, devices: &[(&str, u64)]) -> &Self {
        let snapshot = devices
            .iter()
            .map(|(name, size)| ((*name).to_owned(), *size))
            .collect();
        lock(&self.state, "then_report").snapshots.push(snapshot);
        self
    }

    /// Makes size lookups for `name` fail as if the device vanished right
    /// after being listed.
    pub fn vanish_on_size(&self, name: &str) {
        lock(&self.state, "vanish_on_size")
            .vanishing
            .insert(name.to_owned());
    }

    /// Returns how many times the device list was read.
    #[must_use]
    pub fn list_calls(&self) -> usize {
        lock(&self.state, "list_calls").list_calls
    }
}

impl DeviceInventory for SimulatedInventory {
    fn list_allocated_devices(&self) -> Result<BTreeSet<String>, InventoryError> {
        let mut state = lock(&self.state, "list_allocated_devices");
        state.list_calls += 1;
        let cursor = state.cursor;
        if let Some(snapshot) = state.snapshots.get(cursor).cloned() {
            state.current = snapshot;
        }
        if cursor + 1 < state.snapshots.len() {
            state.cursor = cursor + 1;
        }
        Ok(state.current.keys().cloned().collect())
    }

    fn device_size(&self, name: &str) -> Result<u64, InventoryError> {
        let state = lock(&self.state, "device_size");
        if state.vanishing.contains(name) {
            return Err(InventoryError::DeviceNotFound {
                name: name.to_owned(),
            });
        }
        state
            .current
            .get(name)
            .copied()
            .ok_or_else(|| InventoryError::DeviceNotFound {
                name: name.to_owned(),
            })
    }
}

/// Records a single attach call made through [`ScriptedApi`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AttachCall {
    /// Volume being attached.
    pub blockdevice_id: String,
    /// Target compute instance.
    pub compute_id: String,
    /// Requested device slot.
    pub device: DevicePath,
}

/// Errors raised by [`ScriptedApi`] to model provider rejections.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedApiError {
    /// Simulated attach rejection.
    #[error("simulated attach failure for {0}")]
    Attach(String),
    /// Simulated detach rejection.
    #[error("simulated detach failure for {0}")]
    Detach(String),
    /// Simulated tag lookup failure.
    #[error("simulated tag lookup failure for {0}")]
    Tags(String),
}

/// Cloud API double that records calls and fails on request.
#[derive(Clone, Debug, Default)]
pub struct ScriptedApi {
    state: Arc<Mutex<ApiState>>,
}

#[derive(Debug, Default)]
struct ApiState {
    attach_calls: Vec<AttachCall>,
    detach_calls: Vec<String>,
    list_tags_calls: usize,
    tags: BTreeMap<String, VolumeTags>,
    fail_attach: bool,
    fail_detach: bool,
    fail_tags: bool,
}

impl ScriptedApi {
    /// Creates an API double that accepts every call.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent attach calls fail.
    pub fn fail_attach(&self) {
        lock(&self.state, "fail_attach").fail_attach = true;
    }

    /// Makes subsequent detach calls fail.
    pub fn fail_detach(&self) {
        lock(&self.state, "fail_detach").fail_detach = true;
    }

    /// Makes subsequent tag lookups fail.
    pub fn fail_tags(&self) {
        lock(&self.state, "fail_tags").fail_tags = true;
    }

    /// Records the tags returned for `blockdevice_id`.
    pub fn set_tags(&self, blockdevice_id: &str, tags: VolumeTags) {
        lock(&self.state, "set_tags")
            .tags
            .insert(blockdevice_id.to_owned(), tags);
    }

    /// Returns a snapshot of the attach calls recorded so far.
    #[must_use]
    pub fn attach_calls(&self) -> Vec<AttachCall> {
        lock(&self.state, "attach_calls").attach_calls.clone()
    }

    /// Returns the volume identifiers passed to detach, in call order.
    #[must_use]
    pub fn detach_calls(&self) -> Vec<String> {
        lock(&self.state, "detach_calls").detach_calls.clone()
    }

    /// Returns how many tag lookups were made.
    #[must_use]
    pub fn list_tags_calls(&self) -> usize {
        lock(&self.state, "list_tags_calls").list_tags_calls
    }
}

impl BlockDeviceApi for ScriptedApi {
    type Error = ScriptedApiError;

    fn attach<'a>(
        &'a self,
        blockdevice_id: &'a str,
        compute_id: &'a str,
        device: &'a DevicePath,
    ) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state, "attach");
            state.attach_calls.push(AttachCall {
                blockdevice_id: blockdevice_id.to_owned(),
                compute_id: compute_id.to_owned(),
                device: device.clone(),
            });
            if state.fail_attach {
                return Err(ScriptedApiError::Attach(blockdevice_id.to_owned()));
            }
            Ok(())
        })
    }

    fn detach<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state, "detach");
            state.detach_calls.push(blockdevice_id.to_owned());
            if state.fail_detach {
                return Err(ScriptedApiError::Detach(blockdevice_id.to_owned()));
            }
            Ok(())
        })
    }

    fn list_tags<'a>(&'a self, blockdevice_id: &'a str) -> ApiFuture<'a, VolumeTags, Self::Error> {
        Box::pin(async move {
            let mut state = lock(&self.state, "list_tags");
            state.list_tags_calls += 1;
            if state.fail_tags {
                return Err(ScriptedApiError::Tags(blockdevice_id.to_owned()));
            }
            Ok(state.tags.get(blockdevice_id).cloned().unwrap_or_default())
        })
    }
}

/// A diagnostic event recorded by [`CapturedEvents`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Rendered event message.
    pub message: String,
    /// Structured fields, rendered as strings.
    pub fields: BTreeMap<String, String>,
}

/// `tracing` layer that records events for assertions.
#[derive(Clone, Debug, Default)]
pub struct CapturedEvents {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl CapturedEvents {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `body` with this recorder as the thread's default subscriber.
    pub fn capture<T>(&self, body: impl FnOnce() -> T) -> T {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::with_default(subscriber, body)
    }

    /// Installs this recorder as the thread's default subscriber until the
    /// returned guard drops. Suited to current-thread async tests.
    #[must_use]
    pub fn set_default(&self) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::registry().with(self.clone());
        tracing::subscriber::set_default(subscriber)
    }

    /// Returns every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<CapturedEvent> {
        lock(&self.events, "events").clone()
    }

    /// Returns the messages of every event recorded so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|event| event.message)
            .collect()
    }

    /// Returns `true` when an event with exactly `message` was recorded.
    #[must_use]
    pub fn contains(&self, message: &str) -> bool {
        self.count(message) > 0
    }

    /// Returns how many events carried exactly `message`.
    #[must_use]
    pub fn count(&self, message: &str) -> usize {
        lock(&self.events, "count")
            .iter()
            .filter(|event| event.message == message)
            .count()
    }

    /// Returns `true` when an event with exactly `message` was recorded at
    /// `level`.
    #[must_use]
    pub fn contains_at(&self, level: Level, message: &str) -> bool {
        lock(&self.events, "contains_at")
            .iter()
            .any(|event| event.level == level && event.message == message)
    }

    /// Returns `true` when any event recorded `field` with `value`.
    #[must_use]
    pub fn contains_field(&self, field: &str, value: &str) -> bool {
        lock(&self.events, "contains_field")
            .iter()
            .any(|event| event.fields.get(field).is_some_and(|seen| seen == value))
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut captured = CapturedEvent {
            level: *event.metadata().level(),
            message: String::new(),
            fields: BTreeMap::new(),
        };
        event.record(&mut FieldRecorder(&mut captured));
        lock(&self.events, "on_event").push(captured);
    }
}

struct FieldRecorder<'a>(&'a mut CapturedEvent);

impl Visit for FieldRecorder<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.store(field, value.to_owned());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.store(field, format!("{value:?}"));
    }
}

impl FieldRecorder<'_> {
    fn store(&mut self, field: &Field, rendered: String) {
        if field.name() == "message" {
            self.0.message = rendered;
        } else {
            self.0.fields.insert(field.name().to_owned(), rendered);
        }
    }
}
