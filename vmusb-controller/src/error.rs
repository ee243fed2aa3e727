//! Typed errors for the controller crate.
//!
//! The taxonomy mirrors the distinct failure conditions of the device:
//! connection-lifecycle failures surface to the caller as identifiable
//! variants carrying the platform reason string, while transient
//! conditions inside the read-reassembly loop are handled internally and
//! never appear here.

use thiserror::Error;
use vmusb_protocol::error::ProtocolError;

/// Outcome of a single bulk transfer, reported by a
/// [`BulkTransport`](crate::BulkTransport).
#[derive(Debug, Error)]
pub enum TransferError {
    /// No data moved within the allotted timeout.
    #[error("transfer timed out")]
    Timeout,

    /// The transfer was interrupted or the endpoint was momentarily
    /// unavailable; retrying is expected to succeed.
    #[error("transfer interrupted")]
    Interrupted,

    /// Any other transport failure, with the platform reason.
    #[error("{0}")]
    Fault(String),
}

/// The canonical error type of the controller crate.
#[derive(Debug, Error)]
pub enum VmUsbError {
    /// No attached controller carries the requested serial number.
    #[error("no controller with serial number {serial} could be enumerated")]
    EnumerationFailed { serial: String },

    /// The device was found but could not be opened.
    #[error("unable to open the device: {0}")]
    DeviceOpenFailed(String),

    /// Another process has already claimed the control interface.
    #[error("the control interface is busy (claimed by another process)")]
    InterfaceBusy,

    /// Claiming the control interface failed (resource exhaustion or
    /// another platform error, with the reason).
    #[error("failed to claim the control interface: {0}")]
    InterfaceClaimFailed(String),

    /// The bulk write of an out packet failed.
    #[error("usb bulk write failed: {0}")]
    UsbWriteFault(String),

    /// A bulk read failed (a timeout on the *first* read of a transaction
    /// lands here; later timeouts yield a partial result instead).
    #[error("usb bulk read failed: {0}")]
    UsbReadFault(String),

    /// The VME bus signalled BERR: the USB exchange succeeded but the
    /// single reply word was zero.
    #[error("vme bus error")]
    BusError,

    /// A register selector outside its valid range, e.g. an
    /// interrupt-vector index not in 1..=4.
    #[error("invalid register selector {0}")]
    InvalidRegisterSelector(u32),

    /// Resetting the device failed.
    #[error("device reset failed: {0}")]
    ResetFailed(String),

    /// A malformed list or packet.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// An operation that is not legal in the current connection phase.
    #[error("connection lifecycle violation: {0}")]
    StateViolation(&'static str),
}

impl VmUsbError {
    /// The controller's legacy numeric status surface: `0` is success,
    /// `-1` a write failure, `-2` a read failure, `-3` a VME bus error.
    /// Errors outside the transaction layer report as a generic `-1`.
    pub fn status_code(&self) -> i32 {
        match self {
            VmUsbError::UsbReadFault(_) => -2,
            VmUsbError::BusError => -3,
            _ => -1,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_codes_match_the_wire_convention() {
        assert_eq!(VmUsbError::UsbWriteFault("x".into()).status_code(), -1);
        assert_eq!(VmUsbError::UsbReadFault("x".into()).status_code(), -2);
        assert_eq!(VmUsbError::BusError.status_code(), -3);
    }

    #[test]
    fn display_carries_the_platform_reason() {
        let err = VmUsbError::InterfaceClaimFailed("insufficient memory".into());
        assert!(err.to_string().contains("insufficient memory"));
    }

    #[test]
    fn protocol_errors_convert() {
        let err: VmUsbError = ProtocolError::InvalidListSlot(9).into();
        assert!(matches!(err, VmUsbError::Protocol(_)));
    }
}
