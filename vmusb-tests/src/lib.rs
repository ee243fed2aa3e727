//! Shared scripting helpers for the cross-crate tests.
//!
//! [`VmUsb::initialize`](vmusb_controller::VmUsb::initialize) performs a
//! fixed sequence of exchanges (drain, flush, irq-mask latch dance, one
//! read per shadowed register); the helper here queues the matching
//! replies on a mock transport so individual tests stay readable.

use vmusb_controller::mock::{MockTransport, Reply};
use vmusb_controller::{VmUsb, VmUsbError};

/// Firmware id the scripted device reports.
pub const FIRMWARE_ID: u32 = 0x8e00_0601;

/// Queue the reply sequence one `initialize()` call consumes: a
/// successful drain, an empty flush, the irq-mask latch dance, and one
/// read per shadowed register.
pub fn script_initialize(mock: &MockTransport) {
    mock.push_data(&[]); // drain read: nothing buffered
    mock.push_reply(Reply::Timeout); // flush: the pipe is empty
    // write_irq_mask(0x7f)
    mock.push_data(&0u32.to_le_bytes()); // save global mode
    mock.push_data(&1u16.to_le_bytes()); // write mask | 0x8000
    mock.push_data(&0x7fu32.to_le_bytes()); // latch read, discarded
    mock.push_data(&1u16.to_le_bytes()); // restore global mode
    // shadow repopulation, in controller order
    mock.push_data(&FIRMWARE_ID.to_le_bytes());
    for value in [
        0u32,        // global mode: 13 kword buffers
        0xef,        // daq settings
        0x1311_1010, // led source
        0x0000_1110, // device source
        0x007f_000f, // dgg a
        0x007f_000f, // dgg b
        0x0000_0003, // dgg extended
        0x218f_218f, // isv 1/2
        0x218f_218f, // isv 3/4
        0x218f_218f, // isv 5/6
        0x218f_218f, // isv 7/8
        0x0000_0502, // bulk transfer setup
        0x0000_0001, // events per buffer
    ] {
        mock.push_data(&value.to_le_bytes());
    }
}

/// A controller that has gone through the full initialization sequence
/// against a scripted device.
pub fn initialized_controller() -> Result<(MockTransport, VmUsb<MockTransport>), VmUsbError> {
    let mock = MockTransport::new();
    let mut controller = VmUsb::new(mock.clone());
    script_initialize(&mock);
    controller.initialize()?;
    Ok((mock, controller))
}
