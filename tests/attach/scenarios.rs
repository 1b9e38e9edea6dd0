//! BDD scenarios for the attach workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{AttachContext, attach_context};

#[scenario(
    path = "tests/features/attach.feature",
    name = "Accept the volume when it surfaces under the translated name"
)]
fn scenario_expected_device(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Roll back when the volume surfaces in another slot"
)]
fn scenario_unexpected_device(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Leave the attachment in place when no device appears"
)]
fn scenario_device_never_appears(attach_context: AttachContext) {
    let _ = attach_context;
}

#[scenario(
    path = "tests/features/attach.feature",
    name = "Refuse to pick a slot when every letter is taken"
)]
fn scenario_no_available_device(attach_context: AttachContext) {
    let _ = attach_context;
}
