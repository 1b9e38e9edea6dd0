//! BDD step definitions for the attach workflow.

use blockdevice_agent::test_support::SimulatedInventory;
use blockdevice_agent::{AttachmentOrchestrator, DevicePath, PrefixNaming, select_free_device};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{AttachContext, AttachOutcome, SlotOutcome, classify, parse_devices};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a host whose devices are \"{devices}\"")]
fn host_with_devices(mut attach_context: AttachContext, devices: String) -> AttachContext {
    attach_context.baseline = parse_devices(&devices);
    attach_context.inventory = SimulatedInventory::new(&attach_context.baseline_entries());
    attach_context
}

#[given("the host later reports \"{name}\" at the volume size")]
fn host_reports_device(attach_context: AttachContext, name: String) -> AttachContext {
    let mut devices = attach_context.baseline_entries();
    devices.push((name.trim(), attach_context.volume.size));
    attach_context.inventory.then_report(&devices);
    attach_context
}

#[when("I attach the volume at \"{path}\"")]
fn attach_volume(mut attach_context: AttachContext, path: String) -> Result<AttachContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let orchestrator = AttachmentOrchestrator::new(
        attach_context.api.clone(),
        attach_context.inventory.clone(),
        PrefixNaming::default(),
        attach_context.settings,
    );
    let requested = DevicePath::from(path.trim());
    let baseline = attach_context.baseline_names();
    let volume = attach_context.volume.clone();

    let result = runtime.block_on(async move {
        orchestrator
            .attach_and_verify(&volume, "i-0123", &requested, &baseline)
            .await
    });
    attach_context.outcome = Some(classify(result));
    Ok(attach_context)
}

#[when("I select a free device slot")]
fn select_slot(mut attach_context: AttachContext) -> AttachContext {
    attach_context.selection = Some(SlotOutcome::from(select_free_device(
        &attach_context.baseline_names(),
    )));
    attach_context
}

#[then("the attach returns \"{path}\"")]
fn attach_returns(attach_context: &AttachContext, path: String) -> Result<(), StepError> {
    let expected = AttachOutcome::Attached(DevicePath::from(path.trim()));
    match &attach_context.outcome {
        Some((outcome, _)) if *outcome == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the attach fails because \"{requested}\" surfaced as \"{discovered}\"")]
fn attach_unexpected(
    attach_context: &AttachContext,
    requested: String,
    discovered: String,
) -> Result<(), StepError> {
    let expected = AttachOutcome::Unexpected {
        requested: DevicePath::from(requested.trim()),
        discovered: Some(DevicePath::from(discovered.trim())),
    };
    match &attach_context.outcome {
        Some((outcome, _)) if *outcome == expected => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected {expected:?}, got {other:?}"
        ))),
    }
}

#[then("the attach fails because the device never appeared")]
fn attach_never_appeared(attach_context: &AttachContext) -> Result<(), StepError> {
    match &attach_context.outcome {
        Some((AttachOutcome::NeverAppeared, _)) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected DeviceNeverAppeared, got {other:?}"
        ))),
    }
}

#[then("the attach ends in state \"{state}\"")]
fn attach_final_state(attach_context: &AttachContext, state: String) -> Result<(), StepError> {
    let Some((_, final_state)) = &attach_context.outcome else {
        return Err(StepError::Assertion(String::from("missing outcome")));
    };
    if final_state.to_string() == state.trim() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected state {state}, got {final_state}"
        )))
    }
}

#[then("the volume was detached {count:u32} times")]
fn detach_count(attach_context: &AttachContext, count: u32) -> Result<(), StepError> {
    let calls = attach_context.api.detach_calls();
    if u32::try_from(calls.len()).ok() == Some(count) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} detach calls, got {calls:?}"
        )))
    }
}

#[then("no device slot is available")]
fn no_slot_available(attach_context: &AttachContext) -> Result<(), StepError> {
    match &attach_context.selection {
        Some(SlotOutcome::Exhausted) => Ok(()),
        other => Err(StepError::Assertion(format!(
            "expected NoAvailableDevice, got {other:?}"
        ))),
    }
}

