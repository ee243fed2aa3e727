use std::{error::Error, fmt::Display};

/// Errors raised while building or decoding readout-list data.
#[derive(Debug)]
pub enum ProtocolError {
    /// A list-slot id outside the controller's 0..=7 range.
    InvalidListSlot(u8),
    /// A stack image ended in the middle of a line.
    TruncatedStack { at_word: usize },
    /// A mode word that does not describe any known stack line.
    UnknownStackLine(u32),
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::InvalidListSlot(slot) => {
                write!(f, "List slot {} is out of range (0..=7)", slot)
            }
            ProtocolError::TruncatedStack { at_word } => {
                write!(f, "Stack image truncated at word {}", at_word)
            }
            ProtocolError::UnknownStackLine(mode) => {
                write!(f, "Unrecognized stack line mode word {:#010x}", mode)
            }
        }
    }
}

impl Error for ProtocolError {}
