//! # VM-USB Controller Library
//!
//! This crate drives a Wiener/JTec VM-USB VME bus bridge: it executes
//! readout lists built with [`vmusb_protocol`], keeps a host-side shadow
//! of every controller register, and manages the connection lifecycle
//! across USB faults.
//!
//! ## Architecture
//!
//! The crate is built around two traits:
//!
//! - **[`BulkTransport`]**: the seam to the physical device. A transport
//!   moves raw bytes over the controller's two bulk endpoints and can
//!   re-acquire the device after a fault. The `vmusb-rusb` crate provides
//!   the libusb implementation; [`mock::MockTransport`] provides a
//!   scripted one for tests.
//! - **[`VmeController`]**: the capability set callers depend on
//!   (register access, list execution, list loading, autonomous-mode
//!   reads). [`VmUsb`] implements it for any transport.
//!
//! ## How a transaction works
//!
//! Most controller operations are symmetric: a bulk write of the out
//! packet followed by one or more bulk reads of the reply. A reply may
//! arrive fragmented across several reads and may legitimately be
//! truncated: a VME bus error in the middle of a block transfer ends the
//! data early, and a timeout after the first read returns whatever has
//! accumulated rather than an error. The reassembly loop and its bounded
//! retry budget live in [`engine`].
//!
//! ## Basic Usage
//!
//! ```ignore
//! use vmusb_controller::VmUsb;
//! use vmusb_protocol::{ReadoutList, Width};
//!
//! let mut controller = VmUsb::new(transport);
//! controller.initialize()?;
//!
//! let mut list = ReadoutList::new();
//! list.add_read(Width::D32, 0x0100_0000, 0x09);
//! let mut reply = [0u8; 4];
//! let bytes = controller.execute_list(&list, &mut reply)?;
//! ```
//!
//! ## Concurrency
//!
//! Every public operation that touches the device serializes on one
//! re-entrant lock, so multiple threads can share a controller and a
//! helper composing several register operations never deadlocks itself.
//! [`VmUsb::lock`] hands out that lock as an explicit guard for callers
//! that need a multi-operation sequence to run without interleaving.
//! Lifecycle operations (`initialize`, `reconnect`, `close`) take
//! `&mut self`: a reconnect can never run concurrently with an in-flight
//! transaction on the same handle.
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics: packet hex dumps at
//! `trace`, transaction flow at `debug`, and degraded-but-usable
//! conditions (a drain that never converged) at `warn`.

use std::time::Duration;

pub mod controller;
pub mod engine;
pub mod error;
pub mod mock;
pub mod phase;
pub mod registers;

pub use controller::{DEFAULT_TIMEOUT, Reconnect, TransactionLock, VmUsb};
pub use error::{TransferError, VmUsbError};
pub use phase::ConnectionPhase;
pub use registers::{ShadowRegisters, action, buffer_size, regs};

use vmusb_protocol::ReadoutList;

/// Raw byte pipe to the controller's pair of bulk endpoints.
///
/// Implementations are expected to block for at most `timeout` per call.
/// The error granularity matters to the transaction engine: a
/// [`TransferError::Timeout`] after the first read of a transaction is a
/// normal partial-data outcome, and [`TransferError::Interrupted`] is
/// retried as a zero-byte transfer.
pub trait BulkTransport {
    /// Write one packet to the bulk OUT endpoint.
    fn bulk_write(&mut self, data: &[u8], timeout: Duration) -> Result<usize, TransferError>;

    /// Read once from the bulk IN endpoint into `buf`, returning the
    /// number of bytes transferred (zero is a valid result).
    fn bulk_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, TransferError>;

    /// Re-acquire the device after a fault invalidated the handle. For a
    /// real device this repeats the full enumerate/open/claim sequence by
    /// serial number.
    fn reopen(&mut self) -> Result<(), VmUsbError>;

    /// Release the device. Dropping the transport must have the same
    /// effect; this hook exists for explicit teardown.
    fn close(&mut self) {}
}

/// The controller capability set callers program against.
///
/// [`VmUsb`] implements this for every transport, so code that drives
/// instrumentation can take a `&dyn VmeController` and stay independent
/// of the concrete backend.
pub trait VmeController {
    /// Read an internal controller register.
    fn read_register(&self, address: u32) -> Result<u32, VmUsbError>;

    /// Write an internal controller register.
    fn write_register(&self, address: u32, data: u32) -> Result<(), VmUsbError>;

    /// Execute a readout list immediately and collect its reply into
    /// `reply`, returning the number of bytes received. The count may be
    /// short; callers needing an exact length must check it.
    fn execute_list(&self, list: &ReadoutList, reply: &mut [u8]) -> Result<usize, VmUsbError>;

    /// Load a readout list into list-memory slot `slot` (0..=7) at
    /// `word_offset` for later triggered execution.
    fn load_list(&self, slot: u8, list: &ReadoutList, word_offset: u16)
    -> Result<(), VmUsbError>;

    /// Read a buffer of autonomously acquired data with an explicit
    /// per-call timeout.
    fn usb_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, VmUsbError>;
}
