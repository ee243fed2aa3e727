//! The known-state initialization sequence against a scripted device.

use vmusb_controller::mock::{MockTransport, Reply};
use vmusb_controller::{ConnectionPhase, VmUsb};
use vmusb_tests::{FIRMWARE_ID, initialized_controller};

#[test]
fn initialize_populates_every_shadow_register() {
    let (mock, controller) = initialized_controller().unwrap();

    assert_eq!(controller.phase(), ConnectionPhase::Operational);
    assert_eq!(mock.pending_replies(), 0);

    let shadow = controller.shadow();
    assert_eq!(shadow.firmware_id, Some(FIRMWARE_ID));
    assert_eq!(shadow.global_mode, Some(0));
    assert_eq!(shadow.daq_settings, Some(0xef));
    assert_eq!(shadow.led_source, Some(0x1311_1010));
    assert_eq!(shadow.device_source, Some(0x0000_1110));
    assert_eq!(shadow.dgg_a, Some(0x007f_000f));
    assert_eq!(shadow.dgg_b, Some(0x007f_000f));
    assert_eq!(shadow.dgg_extended, Some(3));
    assert_eq!(shadow.interrupt_vectors, [Some(0x218f_218f); 4]);
    assert_eq!(shadow.bulk_setup, Some(0x0000_0502));
    assert_eq!(shadow.events_per_buffer, Some(1));

    // The irq mask was forced to all-enabled and is tracked from writes.
    assert_eq!(controller.read_irq_mask(), Some(0x7f));
}

#[test]
fn drain_exhaustion_degrades_without_failing() {
    let mock = MockTransport::new();
    let mut controller = VmUsb::new(mock.clone());

    // Every drain attempt fails; the controller logs a warning and moves
    // on (the device may need a power cycle, but the session is usable).
    for _ in 0..5 {
        mock.push_reply(Reply::Fault("endpoint stalled".into()));
    }
    mock.push_reply(Reply::Timeout); // flush: nothing readable either
    mock.push_data(&0u32.to_le_bytes()); // save global mode
    mock.push_data(&1u16.to_le_bytes()); // write mask | 0x8000
    mock.push_data(&0x7fu32.to_le_bytes()); // latch read
    mock.push_data(&1u16.to_le_bytes()); // restore global mode
    mock.push_data(&FIRMWARE_ID.to_le_bytes());
    for _ in 0..13 {
        mock.push_data(&0u32.to_le_bytes());
    }

    controller.initialize().unwrap();
    assert_eq!(controller.phase(), ConnectionPhase::Operational);
    assert_eq!(mock.pending_replies(), 0);
}

#[test]
fn initialize_propagates_irq_dance_failures() {
    let mock = MockTransport::new();
    let mut controller = VmUsb::new(mock.clone());

    mock.push_data(&[]); // drain
    mock.push_reply(Reply::Timeout); // flush
    mock.push_reply(Reply::Fault("wedged".into())); // global-mode save fails

    assert!(controller.initialize().is_err());
    assert_ne!(controller.phase(), ConnectionPhase::Operational);
}
