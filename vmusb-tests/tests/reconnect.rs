//! Reconnect-on-fault behavior.

use vmusb_controller::mock::Reply;
use vmusb_controller::{ConnectionPhase, Reconnect};
use vmusb_tests::{FIRMWARE_ID, initialized_controller, script_initialize};

#[test]
fn healthy_connection_needs_no_reconnect() {
    let (mock, mut controller) = initialized_controller().unwrap();

    // The firmware-id probe succeeds, so nothing is torn down.
    mock.push_data(&FIRMWARE_ID.to_le_bytes());
    assert_eq!(controller.reconnect().unwrap(), Reconnect::NotNeeded);

    assert_eq!(mock.reopen_count(), 0);
    assert_eq!(controller.phase(), ConnectionPhase::Operational);
}

#[test]
fn dead_handle_is_reacquired_and_reinitialized() {
    let (mock, mut controller) = initialized_controller().unwrap();

    mock.push_reply(Reply::Fault("device vanished".into())); // probe fails
    script_initialize(&mock); // replies for the re-initialization

    assert_eq!(controller.reconnect().unwrap(), Reconnect::Reestablished);

    assert_eq!(mock.reopen_count(), 1);
    assert_eq!(controller.phase(), ConnectionPhase::Operational);
    assert_eq!(mock.pending_replies(), 0);

    let shadow = controller.shadow();
    assert_eq!(shadow.firmware_id, Some(FIRMWARE_ID));
    assert_eq!(controller.read_irq_mask(), Some(0x7f));
}

#[test]
fn failed_reopen_is_terminal() {
    let (mock, mut controller) = initialized_controller().unwrap();

    mock.push_reply(Reply::Fault("device vanished".into()));
    mock.fail_reopen(true);

    assert!(controller.reconnect().is_err());
    assert_eq!(controller.phase(), ConnectionPhase::Failed);
}
