//! Connection lifecycle state machine.
//!
//! ```text
//!  Disconnected ──► Opening ──► Claimed ──► Operational
//!                      │ ▲         │             │
//!                      ▼ └─────────┼─────────────┘ (fault-triggered reconnect)
//!                    Failed ◄──────┘
//! ```
//!
//! Transitions validate the current phase and return `Result` instead of
//! panicking; `Failed` is terminal.

use crate::error::VmUsbError;

/// The current phase of a controller connection.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ConnectionPhase {
    /// No device handle. Initial / post-close state.
    #[default]
    Disconnected,

    /// Enumerating, opening and resetting the device.
    Opening,

    /// Interface claimed; the hardware is not yet in a known state.
    Claimed,

    /// Initialized and ready for transactions.
    Operational,

    /// Unrecoverable enumeration or claim failure. Terminal.
    Failed,
}

impl std::fmt::Display for ConnectionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "Disconnected",
            Self::Opening => "Opening",
            Self::Claimed => "Claimed",
            Self::Operational => "Operational",
            Self::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}

impl ConnectionPhase {
    pub fn is_operational(&self) -> bool {
        matches!(self, Self::Operational)
    }

    /// Transition to `Opening`.
    ///
    /// Valid from: `Disconnected`, or `Operational` when a fault triggers
    /// a reconnect.
    pub fn begin_open(&mut self) -> Result<(), VmUsbError> {
        match self {
            Self::Disconnected | Self::Operational => {
                *self = Self::Opening;
                Ok(())
            }
            _ => Err(VmUsbError::StateViolation(
                "cannot open: not Disconnected or Operational",
            )),
        }
    }

    /// Transition to `Claimed`.
    ///
    /// Valid from: `Opening`.
    pub fn claimed(&mut self) -> Result<(), VmUsbError> {
        match self {
            Self::Opening => {
                *self = Self::Claimed;
                Ok(())
            }
            _ => Err(VmUsbError::StateViolation("cannot claim: not Opening")),
        }
    }

    /// Transition to `Operational`.
    ///
    /// Valid from: `Claimed`.
    pub fn operational(&mut self) -> Result<(), VmUsbError> {
        match self {
            Self::Claimed => {
                *self = Self::Operational;
                Ok(())
            }
            _ => Err(VmUsbError::StateViolation(
                "cannot become operational: not Claimed",
            )),
        }
    }

    /// Force the terminal `Failed` state on an unrecoverable enumeration
    /// or claim error.
    pub fn fail(&mut self) {
        *self = Self::Failed;
    }

    /// Return to `Disconnected` after releasing the device.
    pub fn disconnect(&mut self) {
        *self = Self::Disconnected;
    }
}
