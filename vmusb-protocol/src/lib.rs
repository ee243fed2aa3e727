//! # VM-USB Protocol Library
//!
//! This crate implements the wire protocol of the Wiener/JTec VM-USB, a USB
//! attached VME bus bridge used to read out laboratory instrumentation.
//! It covers the two pure-data layers of the driver stack:
//!
//! - Building *readout lists* (the controller manual calls them stacks):
//!   ordered sequences of VME bus operations that the controller executes
//!   as a unit, either immediately or autonomously on trigger
//! - Encoding a readout list plus a transfer-address word into the binary
//!   out-packet the controller accepts on its bulk OUT endpoint, and the
//!   little-endian helpers used to parse its replies
//!
//! No I/O happens here. The transaction engine that ships these packets
//! over USB lives in the `vmusb-controller` crate.
//!
//! ## Packet Format
//!
//! Every out-packet starts with the 16-bit transfer-address word. Its size
//! field is a protocol quirk: **32 bits** when the immediate-execution bit
//! is set, otherwise **16 bits** followed by a 16-bit list-memory load
//! offset. The payload is the serialized stack, each 32-bit word split
//! into two little-endian 16-bit halves, low half first. The size field
//! always equals the number of payload half-words plus one.
//!
//! ## Basic Usage
//!
//! ### Building and encoding a list for immediate execution
//!
//! ```
//! use vmusb_protocol::{ReadoutList, TransferAddress, encode_packet};
//!
//! let mut list = ReadoutList::new();
//! list.add_register_read(0x04);
//! let packet = encode_packet(TransferAddress::immediate(), &list, 0);
//!
//! // TA word, 32-bit size (half-words + 1), one two-word stack line.
//! assert_eq!(
//!     packet,
//!     vec![
//!         0x0C, 0x00,
//!         0x05, 0x00, 0x00, 0x00,
//!         0x00, 0x05, 0x00, 0x00,
//!         0x04, 0x00, 0x00, 0x00,
//!     ]
//! );
//! ```
//!
//! ### Parsing reply data
//!
//! ```
//! use std::io::Cursor;
//! use vmusb_protocol::read_u32;
//!
//! let reply = [0x78, 0x56, 0x34, 0x12];
//! let mut cursor = Cursor::new(&reply[..]);
//! assert_eq!(read_u32(&mut cursor).unwrap(), 0x1234_5678);
//! ```
//!
//! ## Error Handling
//!
//! Malformed inputs (an out-of-range list slot, a stack image that cannot
//! be decoded) are reported through [`error::ProtocolError`]. Address
//! modifiers are carried as opaque bytes and never interpreted; their
//! validity is the caller's responsibility.
//!
//! ## Thread Safety
//!
//! All types in this crate are plain data and safe to share across
//! threads.

pub mod list;
pub use list::*;
pub mod packet;
pub use packet::*;
pub mod error;
