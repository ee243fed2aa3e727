//! Readout-list ("stack") construction and its 32-bit stack-word image.
//!
//! A list is an ordered sequence of VME bus operations. Serialized, every
//! operation becomes a *stack line*: a mode word, an address word and, for
//! write cycles, a data word. Block and FIFO reads longer than one burst
//! expand into several lines.
//!
//! The mode-word field assignment below follows the VME signal set (AM
//! code, data strobes, LWORD). Confirm it against the controller datasheet
//! before loading lists into a controller with unfamiliar firmware.

use crate::error::ProtocolError;

// Fields in the mode word of a stack line.
const MODE_AM_MASK: u32 = 0x3f;
const MODE_DS0: u32 = 0x40;
const MODE_DS1: u32 = 0x80;
const MODE_NW: u32 = 0x100; // read cycle ("no write")
const MODE_LW: u32 = 0x200; // long-word (32-bit) cycle
const MODE_SLF: u32 = 0x400; // internal controller register access
const MODE_NA: u32 = 0x800; // no address increment (FIFO)
const MODE_MB: u32 = 0x1000; // block burst line
const MODE_MRK: u32 = 0x2000; // marker: next word is a literal datum
const BURST_SHIFT: u32 = 16;
const BURST_MASK: u32 = 0x00ff_0000;

/// Transfers carried by one full burst line. A zero burst-count field in
/// the mode word denotes a full burst.
pub const MAX_BURST_TRANSFERS: u32 = 256;

/// Data width of a single-shot VME cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Width {
    D8,
    D16,
    D32,
}

/// Data width of a FIFO block transfer. The controller bursts only 16-
/// and 32-bit cycles.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FifoWidth {
    D16,
    D32,
}

/// A single VME bus operation held in a [`ReadoutList`].
///
/// Address modifiers (`amod`) are opaque bytes; this layer never
/// interprets them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operation {
    /// Write one datum to the bus.
    Write {
        width: Width,
        address: u32,
        amod: u8,
        data: u32,
    },
    /// Read one datum from the bus.
    Read { width: Width, address: u32, amod: u8 },
    /// Block read of `count` 32-bit transfers from incrementing addresses.
    BlockRead32 { base: u32, amod: u8, count: u32 },
    /// Block read of `count` transfers from one fixed (FIFO) address.
    FifoRead {
        width: FifoWidth,
        address: u32,
        amod: u8,
        count: u32,
    },
    /// Read an internal controller register.
    RegisterRead { offset: u32 },
    /// Write an internal controller register.
    RegisterWrite { offset: u32, data: u32 },
    /// Insert a literal word into the output stream without a bus cycle.
    Marker { value: u16 },
}

fn strobes(width: Width, address: u32) -> u32 {
    match width {
        // Byte cycles assert a single data strobe; the address parity
        // selects the lane.
        Width::D8 if address & 1 != 0 => MODE_DS1,
        Width::D8 => MODE_DS0,
        Width::D16 => MODE_DS0 | MODE_DS1,
        Width::D32 => MODE_DS0 | MODE_DS1 | MODE_LW,
    }
}

fn burst_field(count: u32) -> u32 {
    // A full burst is encoded as zero.
    (count % MAX_BURST_TRANSFERS) << BURST_SHIFT
}

impl Operation {
    /// Number of 32-bit words this operation occupies when serialized.
    pub fn word_count(&self) -> usize {
        match self {
            Operation::Write { .. } | Operation::RegisterWrite { .. } => 3,
            Operation::Read { .. } | Operation::RegisterRead { .. } => 2,
            Operation::Marker { .. } => 2,
            Operation::BlockRead32 { count, .. } => {
                2 * count.div_ceil(MAX_BURST_TRANSFERS) as usize
            }
            Operation::FifoRead { count, .. } => 2 * count.div_ceil(MAX_BURST_TRANSFERS) as usize,
        }
    }

    fn encode_into(&self, out: &mut Vec<u32>) {
        match *self {
            Operation::Write {
                width,
                address,
                amod,
                data,
            } => {
                out.push(u32::from(amod) & MODE_AM_MASK | strobes(width, address));
                out.push(address);
                out.push(data);
            }
            Operation::Read {
                width,
                address,
                amod,
            } => {
                out.push(u32::from(amod) & MODE_AM_MASK | strobes(width, address) | MODE_NW);
                out.push(address);
            }
            Operation::BlockRead32 { base, amod, count } => {
                let mode = u32::from(amod) & MODE_AM_MASK
                    | MODE_DS0
                    | MODE_DS1
                    | MODE_LW
                    | MODE_NW
                    | MODE_MB;
                let mut address = base;
                let mut remaining = count;
                while remaining > 0 {
                    let burst = remaining.min(MAX_BURST_TRANSFERS);
                    out.push(mode | burst_field(burst));
                    out.push(address);
                    address = address.wrapping_add(MAX_BURST_TRANSFERS * 4);
                    remaining -= burst;
                }
            }
            Operation::FifoRead {
                width,
                address,
                amod,
                count,
            } => {
                let width_bits = match width {
                    FifoWidth::D16 => MODE_DS0 | MODE_DS1,
                    FifoWidth::D32 => MODE_DS0 | MODE_DS1 | MODE_LW,
                };
                let mode =
                    u32::from(amod) & MODE_AM_MASK | width_bits | MODE_NW | MODE_MB | MODE_NA;
                let mut remaining = count;
                while remaining > 0 {
                    let burst = remaining.min(MAX_BURST_TRANSFERS);
                    out.push(mode | burst_field(burst));
                    out.push(address);
                    remaining -= burst;
                }
            }
            Operation::RegisterRead { offset } => {
                out.push(MODE_SLF | MODE_NW);
                out.push(offset);
            }
            Operation::RegisterWrite { offset, data } => {
                out.push(MODE_SLF);
                out.push(offset);
                out.push(data);
            }
            Operation::Marker { value } => {
                out.push(MODE_MRK);
                out.push(u32::from(value));
            }
        }
    }
}

/// An ordered, append-only sequence of VME bus operations.
///
/// The list itself enforces no upper bound on its serialized length;
/// keeping a list within the controller's list-memory / single-packet
/// limit is the caller's responsibility.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ReadoutList {
    ops: Vec<Operation>,
}

impl ReadoutList {
    pub fn new() -> ReadoutList {
        ReadoutList::default()
    }

    pub fn add_write(&mut self, width: Width, address: u32, amod: u8, data: u32) {
        self.ops.push(Operation::Write {
            width,
            address,
            amod,
            data,
        });
    }

    pub fn add_read(&mut self, width: Width, address: u32, amod: u8) {
        self.ops.push(Operation::Read {
            width,
            address,
            amod,
        });
    }

    /// Append a block read of `count` 32-bit transfers starting at
    /// `base`. Bursts crossing the block boundary are split into full
    /// bursts with stepped addresses plus a trailing partial burst.
    pub fn add_block_read32(&mut self, base: u32, amod: u8, count: u32) {
        self.ops.push(Operation::BlockRead32 { base, amod, count });
    }

    /// Append a FIFO read: like a block read, but every transfer targets
    /// the same address.
    pub fn add_fifo_read(&mut self, width: FifoWidth, address: u32, amod: u8, count: u32) {
        self.ops.push(Operation::FifoRead {
            width,
            address,
            amod,
            count,
        });
    }

    pub fn add_register_read(&mut self, offset: u32) {
        self.ops.push(Operation::RegisterRead { offset });
    }

    pub fn add_register_write(&mut self, offset: u32, data: u32) {
        self.ops.push(Operation::RegisterWrite { offset, data });
    }

    pub fn add_marker(&mut self, value: u16) {
        self.ops.push(Operation::Marker { value });
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    /// Number of operations in the list.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn operations(&self) -> &[Operation] {
        &self.ops
    }

    /// Number of 32-bit words in the serialized stack image.
    pub fn word_count(&self) -> usize {
        self.ops.iter().map(Operation::word_count).sum()
    }

    /// Serialize the list into its stack-word image.
    pub fn serialize(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(self.word_count());
        for op in &self.ops {
            op.encode_into(&mut out);
        }
        out
    }

    /// Rebuild a list from a stack-word image.
    ///
    /// Every non-block operation round-trips exactly. Block and FIFO
    /// reads come back as one operation per burst line, so reads longer
    /// than [`MAX_BURST_TRANSFERS`] decode into several operations.
    pub fn deserialize(words: &[u32]) -> Result<ReadoutList, ProtocolError> {
        let mut ops = Vec::new();
        let mut at = 0;
        while at < words.len() {
            let mode = words[at];
            let operand = |offset: usize| {
                words
                    .get(at + offset)
                    .copied()
                    .ok_or(ProtocolError::TruncatedStack { at_word: at })
            };
            if mode & MODE_MRK != 0 {
                ops.push(Operation::Marker {
                    value: operand(1)? as u16,
                });
                at += 2;
            } else if mode & MODE_SLF != 0 {
                let offset = operand(1)?;
                if mode & MODE_NW != 0 {
                    ops.push(Operation::RegisterRead { offset });
                    at += 2;
                } else {
                    ops.push(Operation::RegisterWrite {
                        offset,
                        data: operand(2)?,
                    });
                    at += 3;
                }
            } else if mode & MODE_MB != 0 {
                let field = (mode & BURST_MASK) >> BURST_SHIFT;
                let count = if field == 0 {
                    MAX_BURST_TRANSFERS
                } else {
                    field
                };
                let amod = (mode & MODE_AM_MASK) as u8;
                let address = operand(1)?;
                if mode & MODE_NA != 0 {
                    let width = if mode & MODE_LW != 0 {
                        FifoWidth::D32
                    } else {
                        FifoWidth::D16
                    };
                    ops.push(Operation::FifoRead {
                        width,
                        address,
                        amod,
                        count,
                    });
                } else {
                    ops.push(Operation::BlockRead32 {
                        base: address,
                        amod,
                        count,
                    });
                }
                at += 2;
            } else {
                let width = match (mode & (MODE_DS0 | MODE_DS1), mode & MODE_LW != 0) {
                    (s, true) if s == MODE_DS0 | MODE_DS1 => Width::D32,
                    (s, false) if s == MODE_DS0 | MODE_DS1 => Width::D16,
                    (MODE_DS0, false) | (MODE_DS1, false) => Width::D8,
                    _ => return Err(ProtocolError::UnknownStackLine(mode)),
                };
                let amod = (mode & MODE_AM_MASK) as u8;
                let address = operand(1)?;
                if mode & MODE_NW != 0 {
                    ops.push(Operation::Read {
                        width,
                        address,
                        amod,
                    });
                    at += 2;
                } else {
                    ops.push(Operation::Write {
                        width,
                        address,
                        amod,
                        data: operand(2)?,
                    });
                    at += 3;
                }
            }
        }
        Ok(ReadoutList { ops })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const A32_DATA: u8 = 0x09;
    const A24_DATA: u8 = 0x39;

    #[test]
    fn round_trip_single_shot_operations() {
        let mut list = ReadoutList::new();
        list.add_write(Width::D32, 0xbb00_6030, A32_DATA, 0xdead_beef);
        list.add_write(Width::D16, 0xbb00_6034, A24_DATA, 1);
        list.add_write(Width::D8, 0xbb00_6035, A24_DATA, 0x7f);
        list.add_read(Width::D32, 0x0100_0000, A32_DATA);
        list.add_read(Width::D16, 0x0100_0002, A24_DATA);
        list.add_read(Width::D8, 0x0100_0004, A24_DATA);
        list.add_register_read(0x1c);
        list.add_register_write(0x10, 0x1110);
        list.add_marker(0xbde7);

        let decoded = ReadoutList::deserialize(&list.serialize()).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn byte_writes_pick_the_strobe_from_address_parity() {
        let mut even = ReadoutList::new();
        even.add_write(Width::D8, 0x1000, A24_DATA, 0xab);
        let mut odd = ReadoutList::new();
        odd.add_write(Width::D8, 0x1001, A24_DATA, 0xab);

        assert_eq!(even.serialize()[0] & (MODE_DS0 | MODE_DS1), MODE_DS0);
        assert_eq!(odd.serialize()[0] & (MODE_DS0 | MODE_DS1), MODE_DS1);
    }

    #[test]
    fn block_read_steps_addresses_across_bursts() {
        let mut list = ReadoutList::new();
        list.add_block_read32(0x0800_0000, 0x0b, 600);

        // 600 transfers: two full bursts plus a trailing partial one.
        let words = list.serialize();
        assert_eq!(words.len(), 6);
        assert_eq!(list.word_count(), 6);

        assert_eq!((words[0] & BURST_MASK) >> BURST_SHIFT, 0); // full burst
        assert_eq!(words[1], 0x0800_0000);
        assert_eq!((words[2] & BURST_MASK) >> BURST_SHIFT, 0);
        assert_eq!(words[3], 0x0800_0400);
        assert_eq!((words[4] & BURST_MASK) >> BURST_SHIFT, 88);
        assert_eq!(words[5], 0x0800_0800);
    }

    #[test]
    fn fifo_read_never_steps_the_address() {
        let mut list = ReadoutList::new();
        list.add_fifo_read(FifoWidth::D32, 0x0606_0000, 0x0f, 300);

        let words = list.serialize();
        assert_eq!(words.len(), 4);
        assert_eq!(words[1], 0x0606_0000);
        assert_eq!(words[3], 0x0606_0000);
        assert_ne!(words[0] & MODE_NA, 0);
    }

    #[test]
    fn single_burst_reads_round_trip() {
        let mut list = ReadoutList::new();
        list.add_block_read32(0x0800_0000, 0x0b, MAX_BURST_TRANSFERS);
        list.add_fifo_read(FifoWidth::D16, 0x0606_0000, 0x0f, 37);

        let decoded = ReadoutList::deserialize(&list.serialize()).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn clear_empties_the_list() {
        let mut list = ReadoutList::new();
        list.add_marker(1);
        assert_eq!(list.len(), 1);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.word_count(), 0);
    }

    #[test]
    fn deserialize_rejects_truncated_stack() {
        let mut list = ReadoutList::new();
        list.add_register_write(0x10, 0x99);
        let mut words = list.serialize();
        words.pop();

        match ReadoutList::deserialize(&words) {
            Err(ProtocolError::TruncatedStack { at_word: 0 }) => {}
            other => panic!("expected TruncatedStack, got {:?}", other),
        }
    }

    #[test]
    fn deserialize_rejects_strobeless_mode_word() {
        // AM code only, no strobes: not a valid cycle.
        match ReadoutList::deserialize(&[0x0000_0009, 0]) {
            Err(ProtocolError::UnknownStackLine(0x09)) => {}
            other => panic!("expected UnknownStackLine, got {:?}", other),
        }
    }
}
