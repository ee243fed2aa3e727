//! Out-packet assembly and the little-endian pack/unpack helpers.
//!
//! The transfer-address word in front of every packet tells the controller
//! what to do with the payload: execute it immediately, or load it into
//! one of eight list-memory slots for triggered execution.

use std::io::{self, Read, Write};

use crate::error::ProtocolError;
use crate::list::ReadoutList;

// Bits in the transfer-address word.
const TA_ID0: u16 = 0x01; // list-slot id bit 0
const TA_SELECT: u16 = 0x02; // select list-memory transfer
const TA_WRITE: u16 = 0x04; // write direction
const TA_IMMEDIATE: u16 = 0x08; // execute immediately
const TA_ID1: u16 = 0x10; // list-slot id bit 1
const TA_ID2: u16 = 0x20; // list-slot id bit 2

/// The 16-bit header word selecting how the controller interprets a
/// packet. The 3-bit list-slot id is scattered over bits 0, 4 and 5.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TransferAddress(u16);

impl TransferAddress {
    /// A packet the controller executes as soon as it arrives.
    pub fn immediate() -> TransferAddress {
        TransferAddress(TA_WRITE | TA_IMMEDIATE)
    }

    /// A packet loaded into list-memory slot `slot` (0..=7) for later
    /// triggered execution.
    pub fn list_load(slot: u8) -> Result<TransferAddress, ProtocolError> {
        if slot > 7 {
            return Err(ProtocolError::InvalidListSlot(slot));
        }
        let mut ta = TA_SELECT | TA_WRITE;
        if slot & 1 != 0 {
            ta |= TA_ID0;
        }
        if slot & 2 != 0 {
            ta |= TA_ID1;
        }
        if slot & 4 != 0 {
            ta |= TA_ID2;
        }
        Ok(TransferAddress(ta))
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    pub fn is_immediate(self) -> bool {
        self.0 & TA_IMMEDIATE != 0
    }

    /// The list-slot id carried in bits 0, 4 and 5.
    pub fn slot(self) -> u8 {
        let mut slot = 0;
        if self.0 & TA_ID0 != 0 {
            slot |= 1;
        }
        if self.0 & TA_ID1 != 0 {
            slot |= 2;
        }
        if self.0 & TA_ID2 != 0 {
            slot |= 4;
        }
        slot
    }
}

/// Append a 16-bit datum to a packet, low byte first.
pub fn write_u16(writer: &mut impl Write, datum: u16) -> io::Result<()> {
    writer.write_all(&datum.to_le_bytes())
}

/// Append a 32-bit datum to a packet, low byte first.
pub fn write_u32(writer: &mut impl Write, datum: u32) -> io::Result<()> {
    writer.write_all(&datum.to_le_bytes())
}

/// Unpack a little-endian 16-bit datum, advancing the cursor by two
/// bytes.
pub fn read_u16(reader: &mut impl Read) -> io::Result<u16> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_le_bytes(bytes))
}

/// Unpack a little-endian 32-bit datum, advancing the cursor by four
/// bytes.
pub fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

/// Encode a readout list into the controller's out-packet form.
///
/// The size field is 32 bits wide for immediate execution and 16 bits
/// followed by the 16-bit `load_offset` for list loads; both branches are
/// fixed by the wire protocol. `load_offset` is ignored in immediate mode
/// and counts 32-bit list-memory words otherwise (the units are the
/// controller's documented convention; confirm against the datasheet
/// revision in use).
pub fn encode_packet(ta: TransferAddress, list: &ReadoutList, load_offset: u16) -> Vec<u8> {
    let words = list.serialize();
    let half_words = words.len() * 2;
    let mut out = Vec::with_capacity(6 + words.len() * 4);

    out.extend_from_slice(&ta.bits().to_le_bytes());
    if ta.is_immediate() {
        out.extend_from_slice(&(half_words as u32 + 1).to_le_bytes());
    } else {
        out.extend_from_slice(&(half_words as u16 + 1).to_le_bytes());
        out.extend_from_slice(&load_offset.to_le_bytes());
    }
    for word in words {
        // Each payload word goes out as two little-endian 16-bit halves,
        // low half first.
        out.extend_from_slice(&(word as u16).to_le_bytes());
        out.extend_from_slice(&((word >> 16) as u16).to_le_bytes());
    }
    out
}

/// Encode a readout list directly to a writer. See [`encode_packet`].
pub fn write_packet(
    writer: &mut impl Write,
    ta: TransferAddress,
    list: &ReadoutList,
    load_offset: u16,
) -> io::Result<()> {
    writer.write_all(&encode_packet(ta, list, load_offset))
}

/// The action register cannot be reached through a readout list; it takes
/// its own fixed three-half-word packet: the register-block transfer
/// address, the action-register selector, then the value.
pub fn action_register_packet(value: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(6);
    out.extend_from_slice(&(TA_WRITE | TA_ID0).to_le_bytes());
    out.extend_from_slice(&0x000au16.to_le_bytes());
    out.extend_from_slice(&value.to_le_bytes());
    out
}

#[test]
fn action_register_packet_layout() {
    assert_eq!(
        action_register_packet(0x0001),
        vec![0x05, 0x00, 0x0a, 0x00, 0x01, 0x00]
    );
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::list::{ReadoutList, Width};
    use std::io::Cursor;

    fn sample_list() -> ReadoutList {
        let mut list = ReadoutList::new();
        list.add_write(Width::D16, 0xbb00_6034, 0x0e, 1);
        list.add_register_read(0x1c);
        list
    }

    #[test]
    fn immediate_header_uses_a_32_bit_size_field() {
        let list = sample_list();
        let packet = encode_packet(TransferAddress::immediate(), &list, 0);

        // 5 payload words -> 10 half-words -> size field 11.
        assert_eq!(&packet[..2], &[0x0c, 0x00]);
        assert_eq!(&packet[2..6], &[0x0b, 0x00, 0x00, 0x00]);
        assert_eq!(packet.len(), 6 + 5 * 4);
    }

    #[test]
    fn list_load_header_uses_16_bit_size_plus_offset() {
        let list = sample_list();
        let ta = TransferAddress::list_load(5).unwrap();
        let packet = encode_packet(ta, &list, 0x0040);

        // Slot 5 scatters over id bits 0 and 2: select|write|id0|id2.
        assert_eq!(&packet[..2], &[0x27, 0x00]);
        assert_eq!(&packet[2..4], &[0x0b, 0x00]);
        assert_eq!(&packet[4..6], &[0x40, 0x00]);
        assert_eq!(packet.len(), 6 + 5 * 4);
    }

    #[test]
    fn both_headers_carry_the_same_payload_image() {
        let list = sample_list();
        let immediate = encode_packet(TransferAddress::immediate(), &list, 0);
        let load = encode_packet(TransferAddress::list_load(5).unwrap(), &list, 0x0040);
        assert_eq!(&immediate[6..], &load[6..]);
    }

    #[test]
    fn payload_words_split_into_le_half_words_low_first() {
        let mut list = ReadoutList::new();
        list.add_marker(0xbde7);
        let packet = encode_packet(TransferAddress::immediate(), &list, 0);

        // Mode word 0x00002000, then the marker literal.
        assert_eq!(
            &packet[6..],
            &[0x00, 0x20, 0x00, 0x00, 0xe7, 0xbd, 0x00, 0x00]
        );
    }

    #[test]
    fn empty_list_has_size_field_one() {
        let list = ReadoutList::new();
        let packet = encode_packet(TransferAddress::immediate(), &list, 0);
        assert_eq!(packet, vec![0x0c, 0x00, 0x01, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn slot_round_trips_through_the_scattered_id_bits() {
        for slot in 0..=7 {
            let ta = TransferAddress::list_load(slot).unwrap();
            assert_eq!(ta.slot(), slot);
            assert!(!ta.is_immediate());
        }
    }

    #[test]
    fn slot_out_of_range_is_rejected() {
        match TransferAddress::list_load(8) {
            Err(crate::error::ProtocolError::InvalidListSlot(8)) => {}
            other => panic!("expected InvalidListSlot, got {:?}", other),
        }
    }

    #[test]
    fn cursor_helpers_round_trip() {
        let mut buffer = Vec::new();
        write_u16(&mut buffer, 0xbde7).unwrap();
        write_u32(&mut buffer, 0x1234_5678).unwrap();

        let mut cursor = Cursor::new(&buffer[..]);
        assert_eq!(read_u16(&mut cursor).unwrap(), 0xbde7);
        assert_eq!(read_u32(&mut cursor).unwrap(), 0x1234_5678);
        assert_eq!(cursor.position(), 6);
    }

    #[test]
    fn write_packet_matches_encode_packet() {
        let list = sample_list();
        let mut streamed = Vec::new();
        write_packet(&mut streamed, TransferAddress::immediate(), &list, 0).unwrap();
        assert_eq!(
            streamed,
            encode_packet(TransferAddress::immediate(), &list, 0)
        );
    }
}
