//! The controller's internal register map and the host-side shadow.

/// Register addresses as the controller publishes them.
pub mod regs {
    /// Firmware id (read-only).
    pub const FIRMWARE_ID: u32 = 0x00;
    /// Action register. Write-only, and the one register that cannot be
    /// reached through a readout list; it takes its own sequenced packet.
    pub const ACTION: u32 = 0x01;
    /// Global mode register; its low nibble selects the buffering
    /// granularity (see [`buffer_size`](super::buffer_size)).
    pub const GLOBAL_MODE: u32 = 0x04;
    /// Data-acquisition delay/settings register.
    pub const DAQ_SETTINGS: u32 = 0x08;
    /// LED source selectors.
    pub const LED_SOURCE: u32 = 0x0c;
    /// Device (gate generator / scaler / NIM output) source selectors.
    pub const DEVICE_SOURCE: u32 = 0x10;
    /// Delay/gate generator A settings.
    pub const DGG_A: u32 = 0x14;
    /// Delay/gate generator B settings.
    pub const DGG_B: u32 = 0x18;
    /// Scaler A counter (read-only).
    pub const SCALER_A: u32 = 0x1c;
    /// Scaler B counter (read-only).
    pub const SCALER_B: u32 = 0x20;
    /// Events-per-buffer count / extract mask (12 bits).
    pub const EVENTS_PER_BUFFER: u32 = 0x24;
    /// Interrupt service vectors 1 and 2.
    pub const ISV12: u32 = 0x28;
    /// Interrupt service vectors 3 and 4.
    pub const ISV34: u32 = 0x2c;
    /// Interrupt service vectors 5 and 6.
    pub const ISV56: u32 = 0x30;
    /// Interrupt service vectors 7 and 8.
    pub const ISV78: u32 = 0x34;
    /// High-order gate-width bits extending both delay/gate generators.
    pub const DGG_EXTENDED: u32 = 0x38;
    /// USB bulk transfer setup.
    pub const USB_SETUP: u32 = 0x3c;
}

/// Bits of the write-only action register.
pub mod action {
    /// Start autonomous data taking; writing zero stops it.
    pub const START_DAQ: u16 = 0x01;
    /// Produce a USB-initiated trigger.
    pub const USB_TRIGGER: u16 = 0x02;
    /// Clear the controller's data buffers.
    pub const CLEAR_BUFFERS: u16 = 0x04;
}

/// All interrupt levels enabled; written during initialization so the
/// write-tracked irq-mask shadow starts from a known value.
pub const IRQ_MASK_ALL: u8 = 0x7f;

/// Sentinel returned by [`buffer_size`] when the controller closes
/// buffers after a fixed event count rather than at a fixed size.
pub const EVENT_COUNT_MODE: i32 = -1;

/// Buffering granularity, in 16-bit words, selected by the low nibble of
/// the global mode register. Code 9 means event-count buffering and
/// reports [`EVENT_COUNT_MODE`]; a code outside the table falls back to
/// the largest size.
pub fn buffer_size(global_mode: u16) -> i32 {
    match global_mode & 0xf {
        0 => 13 * 1024,
        1 => 8 * 1024,
        2 => 4 * 1024,
        3 => 2 * 1024,
        4 => 1024,
        5 => 512,
        6 => 256,
        7 => 128,
        8 => 56,
        9 => EVENT_COUNT_MODE,
        _ => 13 * 1024,
    }
}

/// Last value observed in every shadowed control register.
///
/// A field is `None` until its register has been read or written once
/// over the current connection. The irq mask is write-tracked only: the
/// hardware register cannot be read back without corrupting controller
/// state, so its field reflects the last value written.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ShadowRegisters {
    pub firmware_id: Option<u32>,
    pub global_mode: Option<u16>,
    pub daq_settings: Option<u32>,
    pub led_source: Option<u32>,
    pub device_source: Option<u32>,
    pub dgg_a: Option<u32>,
    pub dgg_b: Option<u32>,
    pub dgg_extended: Option<u32>,
    /// One entry per interrupt-vector pair register (ISV12..ISV78).
    pub interrupt_vectors: [Option<u32>; 4],
    pub irq_mask: Option<u8>,
    pub bulk_setup: Option<u32>,
    pub events_per_buffer: Option<u32>,
}
