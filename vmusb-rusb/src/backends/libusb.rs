//! # libusb Transport Backend
//!
//! Connection management for a physical VM-USB: enumeration by the
//! controller's fixed vendor/product identifier pair, selection by serial
//! number, the open/reset/claim sequence, and reconnection after a USB
//! fault.
//!
//! ## Example Usage
//!
//! ```ignore
//! use vmusb_controller::VmUsb;
//! use vmusb_rusb::backends::libusb::LibusbTransport;
//!
//! let transport = LibusbTransport::open("VM0353")?;
//! let mut controller = VmUsb::new(transport);
//! controller.initialize()?;
//! ```

use std::thread;
use std::time::Duration;

use rusb::{Device, DeviceDescriptor, DeviceHandle, GlobalContext};
use vmusb_controller::{BulkTransport, TransferError, VmUsbError};

/// Wiener's USB vendor id.
pub const VENDOR_ID: u16 = 0x16dc;
/// The VM-USB product id.
pub const PRODUCT_ID: u16 = 0x000b;

const ENDPOINT_OUT: u8 = 0x02;
const ENDPOINT_IN: u8 = 0x86;
const CONTROL_INTERFACE: u8 = 0;
const CONFIGURATION: u8 = 1;

// The device needs time to settle around handle churn; these are the
// empirically safe delays.
const SETTLE_AFTER_CLAIM: Duration = Duration::from_millis(10);
const SETTLE_BEFORE_REOPEN: Duration = Duration::from_millis(1);
const SETTLE_AFTER_CLOSE: Duration = Duration::from_millis(5);

/// Bulk transport over a claimed libusb device handle.
///
/// The handle is valid between a successful open/claim and a
/// close/release; any USB fault invalidates it, after which
/// [`reopen`](BulkTransport::reopen) must re-acquire the device before
/// further use. The device is tracked by serial number, never by a cached
/// device reference: a reset invalidates the host-side enumeration.
pub struct LibusbTransport {
    handle: Option<DeviceHandle<GlobalContext>>,
    serial: String,
}

fn serial_number(
    device: &Device<GlobalContext>,
    descriptor: &DeviceDescriptor,
) -> rusb::Result<String> {
    let handle = device.open()?;
    handle.read_serial_number_string_ascii(descriptor)
}

fn map_transfer_error(err: rusb::Error) -> TransferError {
    match err {
        rusb::Error::Timeout => TransferError::Timeout,
        rusb::Error::Interrupted | rusb::Error::Busy => TransferError::Interrupted,
        other => TransferError::Fault(other.to_string()),
    }
}

impl LibusbTransport {
    /// Serial numbers of every attached VM-USB. An empty list simply
    /// means no controller is plugged in; devices whose serial cannot be
    /// read (e.g. held by another process) are skipped.
    pub fn enumerate() -> rusb::Result<Vec<String>> {
        let mut serials = Vec::new();
        for device in rusb::devices()?.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }
            match serial_number(&device, &descriptor) {
                Ok(serial) => serials.push(serial),
                Err(err) => log::debug!("skipping device without readable serial: {}", err),
            }
        }
        Ok(serials)
    }

    /// Open and claim the controller with the given serial number.
    pub fn open(serial: &str) -> Result<LibusbTransport, VmUsbError> {
        let mut transport = LibusbTransport {
            handle: None,
            serial: serial.to_string(),
        };
        transport.acquire()?;
        Ok(transport)
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    fn find_device(&self) -> Result<Device<GlobalContext>, VmUsbError> {
        let devices = rusb::devices().map_err(|err| {
            log::debug!("usb enumeration failed: {}", err);
            VmUsbError::EnumerationFailed {
                serial: self.serial.clone(),
            }
        })?;
        for device in devices.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            if descriptor.vendor_id() != VENDOR_ID || descriptor.product_id() != PRODUCT_ID {
                continue;
            }
            match serial_number(&device, &descriptor) {
                Ok(found) if found == self.serial => return Ok(device),
                Ok(_) => {}
                Err(err) => log::debug!("skipping device without readable serial: {}", err),
            }
        }
        Err(VmUsbError::EnumerationFailed {
            serial: self.serial.clone(),
        })
    }

    /// The full open sequence: find by serial, open, reset, find and open
    /// again (the reset drops the device off the bus), set the
    /// configuration and claim the control interface.
    fn acquire(&mut self) -> Result<(), VmUsbError> {
        log::debug!("opening VM-USB {}", self.serial);
        let device = self.find_device()?;
        let mut handle = device
            .open()
            .map_err(|err| VmUsbError::DeviceOpenFailed(err.to_string()))?;

        match handle.reset() {
            Ok(()) => {}
            // libusb reports the lost enumeration as NotFound; after a
            // reset that is the expected outcome, not a failure.
            Err(rusb::Error::NotFound) => {}
            Err(err) => return Err(VmUsbError::ResetFailed(err.to_string())),
        }
        drop(handle);
        thread::sleep(SETTLE_BEFORE_REOPEN);

        let device = self.find_device()?;
        let mut handle = device
            .open()
            .map_err(|err| VmUsbError::DeviceOpenFailed(err.to_string()))?;
        if let Err(err) = handle.set_active_configuration(CONFIGURATION) {
            log::debug!("set_configuration: {}", err);
        }
        match handle.claim_interface(CONTROL_INTERFACE) {
            Ok(()) => {}
            Err(rusb::Error::Busy) => return Err(VmUsbError::InterfaceBusy),
            Err(rusb::Error::NoMem) => {
                return Err(VmUsbError::InterfaceClaimFailed(
                    "insufficient kernel resources".into(),
                ));
            }
            Err(err) => return Err(VmUsbError::InterfaceClaimFailed(err.to_string())),
        }
        thread::sleep(SETTLE_AFTER_CLAIM);

        log::info!("claimed VM-USB {}", self.serial);
        self.handle = Some(handle);
        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.release_interface(CONTROL_INTERFACE) {
                log::debug!("release_interface: {}", err);
            }
            drop(handle);
            thread::sleep(SETTLE_AFTER_CLOSE);
        }
    }

    fn handle(&self) -> Result<&DeviceHandle<GlobalContext>, TransferError> {
        self.handle
            .as_ref()
            .ok_or_else(|| TransferError::Fault("device handle is not open".into()))
    }
}

impl BulkTransport for LibusbTransport {
    fn bulk_write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransferError> {
        self.handle()?
            .write_bulk(ENDPOINT_OUT, data, timeout)
            .map_err(map_transfer_error)
    }

    fn bulk_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransferError> {
        self.handle()?
            .read_bulk(ENDPOINT_IN, buf, timeout)
            .map_err(map_transfer_error)
    }

    fn reopen(&mut self) -> Result<(), VmUsbError> {
        log::info!("reopening VM-USB {}", self.serial);
        self.release();
        thread::sleep(SETTLE_BEFORE_REOPEN);
        self.acquire()
    }

    fn close(&mut self) {
        self.release();
    }
}

impl Drop for LibusbTransport {
    fn drop(&mut self) {
        self.release();
    }
}
