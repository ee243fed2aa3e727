//! # VM-USB libusb backend
//!
//! Platform access for the Wiener VM-USB VME bus bridge: device discovery
//! by serial number, the open/claim/reset connection lifecycle, and the
//! bulk-endpoint transport the controller crate drives. Everything here
//! talks to the hardware through `rusb` (libusb); the protocol and
//! transaction logic live in `vmusb-controller`.
pub mod backends;

use vmusb_controller::{VmUsb, VmUsbError};

use crate::backends::libusb::LibusbTransport;

/// Open the controller with the given serial number and bring it into a
/// known state: the full enumerate/open/reset/claim sequence followed by
/// the drain/irq-mask/shadow initialization.
pub fn open_vmusb(serial: &str) -> Result<VmUsb<LibusbTransport>, VmUsbError> {
    let transport = LibusbTransport::open(serial)?;
    let mut controller = VmUsb::new(transport);
    controller.initialize()?;
    Ok(controller)
}
