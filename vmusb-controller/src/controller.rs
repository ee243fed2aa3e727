//! The controller proper: transaction execution, register access with
//! shadow upkeep, and the connection lifecycle.

use std::cell::RefCell;
use std::time::Duration;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use vmusb_protocol::{
    ReadoutList, TransferAddress, Width, action_register_packet, encode_packet,
};

use crate::engine::{Reassembly, SCRATCH_SIZE, retry_budget};
use crate::error::{TransferError, VmUsbError};
use crate::phase::ConnectionPhase;
use crate::registers::{IRQ_MASK_ALL, ShadowRegisters, action, buffer_size, regs};
use crate::{BulkTransport, VmeController};

/// Timeout used for reads unless the caller overrides it.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

// Bulk writes always use the fixed default; only the read side of a
// transaction honors the runtime-adjustable timeout.
const WRITE_TIMEOUT: Duration = Duration::from_millis(2000);

// Stopping in-flight data taking during initialization.
const DRAIN_RETRIES: usize = 5;
const DRAIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// The largest buffer the controller can hand us: 13 kwords of 16 bits.
const MAX_BUFFER_BYTES: usize = 13 * 1024 * 2;

/// Whether [`VmUsb::reconnect`] had to re-acquire the device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reconnect {
    /// The firmware-id probe succeeded; the connection is healthy and
    /// nothing was changed.
    NotNeeded,
    /// The device was re-enumerated, reopened and reinitialized.
    Reestablished,
}

struct Inner<B> {
    transport: B,
    shadow: ShadowRegisters,
    timeout: Duration,
    phase: ConnectionPhase,
}

/// A Wiener VM-USB controller over some [`BulkTransport`].
///
/// All transaction-level methods take `&self` and serialize internally on
/// one re-entrant lock, so a controller can be shared between threads.
/// Lifecycle methods ([`initialize`](VmUsb::initialize),
/// [`reconnect`](VmUsb::reconnect), [`close`](VmUsb::close)) take
/// `&mut self`; they mutate the handle itself and must not overlap any
/// transaction.
pub struct VmUsb<B> {
    state: ReentrantMutex<RefCell<Inner<B>>>,
}

/// Exclusive access to the controller for a multi-operation sequence.
///
/// The per-transaction lock only keeps individual transactions atomic.
/// A caller that needs several operations to execute as a unit (say, a
/// register read-modify-write) holds one of these across them; the lock
/// is re-entrant, so the individual calls still acquire it without
/// deadlocking.
pub struct TransactionLock<'a, B> {
    _guard: ReentrantMutexGuard<'a, RefCell<Inner<B>>>,
}

impl<B: BulkTransport> VmUsb<B> {
    /// Wrap an opened, claimed transport. The controller starts in the
    /// `Claimed` phase; call [`initialize`](VmUsb::initialize) to bring
    /// the hardware into a known state before taking data.
    pub fn new(transport: B) -> VmUsb<B> {
        VmUsb {
            state: ReentrantMutex::new(RefCell::new(Inner {
                transport,
                shadow: ShadowRegisters::default(),
                timeout: DEFAULT_TIMEOUT,
                phase: ConnectionPhase::Claimed,
            })),
        }
    }

    /// Acquire the controller lock for a composed sequence of calls.
    pub fn lock(&self) -> TransactionLock<'_, B> {
        TransactionLock {
            _guard: self.state.lock(),
        }
    }

    /// Replace the session read timeout used by transactions.
    pub fn set_default_timeout(&self, timeout: Duration) {
        let guard = self.state.lock();
        guard.borrow_mut().timeout = timeout;
    }

    pub fn default_timeout(&self) -> Duration {
        let guard = self.state.lock();
        let timeout = guard.borrow().timeout;
        timeout
    }

    pub fn phase(&self) -> ConnectionPhase {
        let guard = self.state.lock();
        let phase = guard.borrow().phase;
        phase
    }

    /// Snapshot of the last known value of every shadowed register.
    pub fn shadow(&self) -> ShadowRegisters {
        let guard = self.state.lock();
        let shadow = guard.borrow().shadow;
        shadow
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Put the controller into a known state: stop any in-flight
    /// autonomous data taking, flush stale buffers, force the irq mask to
    /// a known value and repopulate every shadow register via reads.
    ///
    /// Exhausting the drain retries is degraded but non-fatal: a warning
    /// is logged and initialization continues, though the device may need
    /// a physical power cycle before autonomous mode behaves.
    pub fn initialize(&mut self) -> Result<(), VmUsbError> {
        let inner = self.state.get_mut().get_mut();
        if inner.phase != ConnectionPhase::Claimed {
            return Err(VmUsbError::StateViolation(
                "initialize requires a freshly claimed device",
            ));
        }
        log::debug!("initializing controller to a known state");

        inner.write_action(action::CLEAR_BUFFERS)?;

        // Data taking can only be stopped once the FIFO has been read at
        // least once, so each attempt pairs a read with an action clear.
        let mut drain = vec![0u8; MAX_BUFFER_BYTES];
        let mut stopped = false;
        for attempt in 1..=DRAIN_RETRIES {
            let read_ok = inner.usb_read(&mut drain, DRAIN_READ_TIMEOUT).is_ok();
            if read_ok && inner.write_action(0).is_ok() {
                stopped = true;
                break;
            }
            log::debug!("drain attempt {}/{} failed", attempt, DRAIN_RETRIES);
        }
        if !stopped {
            log::warn!(
                "unable to stop autonomous data taking; the controller may need a power cycle"
            );
        }

        for _ in 0..DRAIN_RETRIES {
            match inner.usb_read(&mut drain, inner.timeout) {
                Ok(n) => log::debug!("flushed {} stale buffer bytes", n),
                Err(_) => break,
            }
        }

        // Writing the mask with every bit set is the only way to bring
        // the write-tracked shadow field in line with the register.
        inner.write_irq_mask(IRQ_MASK_ALL)?;
        inner.initialize_shadow()?;

        inner.phase.operational()?;
        log::debug!("controller initialized, firmware id {:?}", inner.shadow.firmware_id);
        Ok(())
    }

    /// Probe the connection and re-acquire the device if it is dead.
    ///
    /// A successful firmware-id read means the connection is healthy and
    /// nothing changes. Otherwise the transport reopens the device (a
    /// reset invalidates host-side enumeration, so the transport searches
    /// again by serial number) and the full initialization sequence runs
    /// again, restoring every shadow register from fresh reads.
    pub fn reconnect(&mut self) -> Result<Reconnect, VmUsbError> {
        {
            let inner = self.state.get_mut().get_mut();
            match inner.read_firmware_id() {
                Ok(_) => return Ok(Reconnect::NotNeeded),
                Err(err) => {
                    log::info!("firmware-id probe failed ({}), reopening the device", err)
                }
            }
            inner.phase.begin_open()?;
            if let Err(err) = inner.transport.reopen() {
                inner.phase.fail();
                return Err(err);
            }
            inner.phase.claimed()?;
        }
        self.initialize()?;
        Ok(Reconnect::Reestablished)
    }

    /// Release the device and return to the `Disconnected` phase.
    pub fn close(&mut self) {
        let inner = self.state.get_mut().get_mut();
        inner.transport.close();
        inner.phase.disconnect();
    }

    // ── List operations ──────────────────────────────────────────

    /// Execute `list` immediately and collect the reply. Returns the
    /// number of bytes received, which can legitimately be less than
    /// `reply.len()`; callers needing an exact count (block-read transfer
    /// counts) must check it.
    pub fn execute_list(&self, list: &ReadoutList, reply: &mut [u8]) -> Result<usize, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().execute_list(list, reply);
        result
    }

    /// Execute `list` and return the reply as a vector sized to the bytes
    /// actually received (at most `max_bytes`).
    pub fn execute_list_vec(
        &self,
        list: &ReadoutList,
        max_bytes: usize,
    ) -> Result<Vec<u8>, VmUsbError> {
        let mut reply = vec![0u8; max_bytes];
        let n = self.execute_list(list, &mut reply)?;
        reply.truncate(n);
        Ok(reply)
    }

    /// Load `list` into list-memory slot `slot` (0..=7) at `word_offset`
    /// for later triggered execution. Keeping loaded lists from
    /// overlapping in list memory is the caller's responsibility.
    pub fn load_list(
        &self,
        slot: u8,
        list: &ReadoutList,
        word_offset: u16,
    ) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().load_list(slot, list, word_offset);
        result
    }

    /// Read a buffer of autonomously acquired data. `timeout` is the
    /// per-call override for this read only; unlike a transaction, a
    /// timeout here is a plain read fault.
    pub fn usb_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().usb_read(buf, timeout);
        result
    }

    /// Write the action register. This is the one register that cannot be
    /// reached through a readout list; it takes its own fixed packet and
    /// produces no reply.
    pub fn write_action_register(&self, value: u16) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().write_action(value);
        result
    }

    // ── Single-shot VME operations ───────────────────────────────

    pub fn vme_write32(&self, address: u32, amod: u8, data: u32) -> Result<(), VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_write(Width::D32, address, amod, data);
        let guard = self.state.lock();
        let result = guard.borrow_mut().do_vme_write(&list);
        result
    }

    pub fn vme_write16(&self, address: u32, amod: u8, data: u16) -> Result<(), VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_write(Width::D16, address, amod, u32::from(data));
        let guard = self.state.lock();
        let result = guard.borrow_mut().do_vme_write(&list);
        result
    }

    pub fn vme_write8(&self, address: u32, amod: u8, data: u8) -> Result<(), VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_write(Width::D8, address, amod, u32::from(data));
        let guard = self.state.lock();
        let result = guard.borrow_mut().do_vme_write(&list);
        result
    }

    pub fn vme_read32(&self, address: u32, amod: u8) -> Result<u32, VmUsbError> {
        let mut reply = [0u8; 4];
        self.single_shot_read(Width::D32, address, amod, &mut reply)?;
        Ok(u32::from_le_bytes(reply))
    }

    pub fn vme_read16(&self, address: u32, amod: u8) -> Result<u16, VmUsbError> {
        let mut reply = [0u8; 2];
        self.single_shot_read(Width::D16, address, amod, &mut reply)?;
        Ok(u16::from_le_bytes(reply))
    }

    pub fn vme_read8(&self, address: u32, amod: u8) -> Result<u8, VmUsbError> {
        let mut reply = [0u8; 1];
        self.single_shot_read(Width::D8, address, amod, &mut reply)?;
        Ok(reply[0])
    }

    fn single_shot_read(
        &self,
        width: Width,
        address: u32,
        amod: u8,
        reply: &mut [u8],
    ) -> Result<(), VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_read(width, address, amod);
        let guard = self.state.lock();
        let n = guard.borrow_mut().execute_list(&list, reply)?;
        if n < reply.len() {
            return Err(VmUsbError::UsbReadFault(format!(
                "short reply: {} of {} bytes",
                n,
                reply.len()
            )));
        }
        Ok(())
    }

    /// Block-read `count` 32-bit transfers starting at `base`. The
    /// returned vector holds the transfers that actually completed: a
    /// bus error mid-transfer truncates the data without failing the
    /// call.
    pub fn vme_block_read(
        &self,
        base: u32,
        amod: u8,
        count: usize,
    ) -> Result<Vec<u32>, VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_block_read32(base, amod, count as u32);
        self.bulk_words(&list, count)
    }

    /// FIFO-read `count` 32-bit transfers from one fixed address. Same
    /// truncation contract as [`vme_block_read`](VmUsb::vme_block_read).
    pub fn vme_fifo_read(
        &self,
        address: u32,
        amod: u8,
        count: usize,
    ) -> Result<Vec<u32>, VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_fifo_read(vmusb_protocol::FifoWidth::D32, address, amod, count as u32);
        self.bulk_words(&list, count)
    }

    fn bulk_words(&self, list: &ReadoutList, count: usize) -> Result<Vec<u32>, VmUsbError> {
        let mut reply = vec![0u8; count * 4];
        let n = {
            let guard = self.state.lock();
            let n = guard.borrow_mut().execute_list(list, &mut reply)?;
            n
        };
        Ok(reply[..n - n % 4]
            .chunks_exact(4)
            .map(|bytes| u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect())
    }

    // ── Register accessors ───────────────────────────────────────
    //
    // Every accessor keeps the shadow current as a side effect, so the
    // last observed value is available without another bus transaction.

    pub fn read_firmware_id(&self) -> Result<u32, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().read_firmware_id();
        result
    }

    pub fn read_global_mode(&self) -> Result<u16, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().read_global_mode();
        result
    }

    pub fn write_global_mode(&self, value: u16) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().write_global_mode(value);
        result
    }

    pub fn read_daq_settings(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::DAQ_SETTINGS, |shadow, v| shadow.daq_settings = Some(v))
    }

    pub fn write_daq_settings(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::DAQ_SETTINGS, value, |shadow, v| {
            shadow.daq_settings = Some(v)
        })
    }

    pub fn read_led_source(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::LED_SOURCE, |shadow, v| shadow.led_source = Some(v))
    }

    pub fn write_led_source(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::LED_SOURCE, value, |shadow, v| {
            shadow.led_source = Some(v)
        })
    }

    pub fn read_device_source(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::DEVICE_SOURCE, |shadow, v| {
            shadow.device_source = Some(v)
        })
    }

    pub fn write_device_source(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::DEVICE_SOURCE, value, |shadow, v| {
            shadow.device_source = Some(v)
        })
    }

    pub fn read_dgg_a(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::DGG_A, |shadow, v| shadow.dgg_a = Some(v))
    }

    pub fn write_dgg_a(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::DGG_A, value, |shadow, v| shadow.dgg_a = Some(v))
    }

    pub fn read_dgg_b(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::DGG_B, |shadow, v| shadow.dgg_b = Some(v))
    }

    pub fn write_dgg_b(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::DGG_B, value, |shadow, v| shadow.dgg_b = Some(v))
    }

    pub fn read_dgg_extended(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::DGG_EXTENDED, |shadow, v| {
            shadow.dgg_extended = Some(v)
        })
    }

    pub fn write_dgg_extended(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::DGG_EXTENDED, value, |shadow, v| {
            shadow.dgg_extended = Some(v)
        })
    }

    pub fn read_bulk_setup(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::USB_SETUP, |shadow, v| shadow.bulk_setup = Some(v))
    }

    pub fn write_bulk_setup(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::USB_SETUP, value, |shadow, v| {
            shadow.bulk_setup = Some(v)
        })
    }

    pub fn read_events_per_buffer(&self) -> Result<u32, VmUsbError> {
        self.read_shadowed(regs::EVENTS_PER_BUFFER, |shadow, v| {
            shadow.events_per_buffer = Some(v)
        })
    }

    /// The register holds 12 bits; the value is masked accordingly.
    pub fn write_events_per_buffer(&self, value: u32) -> Result<(), VmUsbError> {
        self.write_shadowed(regs::EVENTS_PER_BUFFER, value & 0xfff, |shadow, v| {
            shadow.events_per_buffer = Some(v)
        })
    }

    /// Read one of the four interrupt-service-vector pair registers
    /// (`which` in 1..=4).
    pub fn read_vector(&self, which: u32) -> Result<u32, VmUsbError> {
        let address = isv_register(which)?;
        self.read_shadowed(address, move |shadow, v| {
            shadow.interrupt_vectors[which as usize - 1] = Some(v)
        })
    }

    /// Write one of the four interrupt-service-vector pair registers
    /// (`which` in 1..=4).
    pub fn write_vector(&self, which: u32, value: u32) -> Result<(), VmUsbError> {
        let address = isv_register(which)?;
        self.write_shadowed(address, value, move |shadow, v| {
            shadow.interrupt_vectors[which as usize - 1] = Some(v)
        })
    }

    /// Scaler counters are live values and intentionally unshadowed.
    pub fn read_scaler_a(&self) -> Result<u32, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().read_register(regs::SCALER_A);
        result
    }

    pub fn read_scaler_b(&self) -> Result<u32, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().read_register(regs::SCALER_B);
        result
    }

    /// Write the interrupt mask through the firmware's mandated sequence
    /// (see the module docs of [`registers`](crate::registers) and the
    /// inner implementation); the shadow is updated only after the full
    /// sequence completes.
    pub fn write_irq_mask(&self, mask: u8) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().write_irq_mask(mask);
        result
    }

    /// Last irq mask written, without any bus traffic: the hardware
    /// register cannot be read back without corrupting controller state.
    /// `None` until the first write over this connection.
    pub fn read_irq_mask(&self) -> Option<u8> {
        let guard = self.state.lock();
        let mask = guard.borrow().shadow.irq_mask;
        mask
    }

    /// Buffering granularity in 16-bit words from the shadowed global
    /// mode, or the negative event-count-mode sentinel. An unpopulated
    /// shadow reads as the largest size.
    pub fn buffer_size(&self) -> i32 {
        let guard = self.state.lock();
        let size = guard.borrow().buffer_size();
        size
    }
}

impl<B: BulkTransport> VmeController for VmUsb<B> {
    fn read_register(&self, address: u32) -> Result<u32, VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().read_register(address);
        result
    }

    fn write_register(&self, address: u32, data: u32) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let result = guard.borrow_mut().write_register(address, data);
        result
    }

    fn execute_list(&self, list: &ReadoutList, reply: &mut [u8]) -> Result<usize, VmUsbError> {
        VmUsb::execute_list(self, list, reply)
    }

    fn load_list(
        &self,
        slot: u8,
        list: &ReadoutList,
        word_offset: u16,
    ) -> Result<(), VmUsbError> {
        VmUsb::load_list(self, slot, list, word_offset)
    }

    fn usb_read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize, VmUsbError> {
        VmUsb::usb_read(self, buf, timeout)
    }
}

impl<B: BulkTransport> VmUsb<B> {
    fn read_shadowed(
        &self,
        address: u32,
        update: impl FnOnce(&mut ShadowRegisters, u32),
    ) -> Result<u32, VmUsbError> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        let value = inner.read_register(address)?;
        update(&mut inner.shadow, value);
        Ok(value)
    }

    fn write_shadowed(
        &self,
        address: u32,
        value: u32,
        update: impl FnOnce(&mut ShadowRegisters, u32),
    ) -> Result<(), VmUsbError> {
        let guard = self.state.lock();
        let mut inner = guard.borrow_mut();
        inner.write_register(address, value)?;
        update(&mut inner.shadow, value);
        Ok(())
    }
}

fn isv_register(which: u32) -> Result<u32, VmUsbError> {
    match which {
        1 => Ok(regs::ISV12),
        2 => Ok(regs::ISV34),
        3 => Ok(regs::ISV56),
        4 => Ok(regs::ISV78),
        _ => Err(VmUsbError::InvalidRegisterSelector(which)),
    }
}

impl<B: BulkTransport> Inner<B> {
    fn buffer_size(&self) -> i32 {
        buffer_size(self.shadow.global_mode.unwrap_or(0))
    }

    /// One symmetric exchange: bulk-write the packet, then reassemble the
    /// reply from as many bulk reads as the retry budget allows.
    fn transaction(&mut self, packet: &[u8], reply: &mut [u8]) -> Result<usize, VmUsbError> {
        log::trace!("out packet: {:02x?}", packet);
        self.transport
            .bulk_write(packet, WRITE_TIMEOUT)
            .map_err(|err| VmUsbError::UsbWriteFault(err.to_string()))?;

        let mut scratch = [0u8; SCRATCH_SIZE];
        let budget = retry_budget(reply.len(), self.buffer_size());
        let mut assembly = Reassembly::new(reply.len(), budget);

        while assembly.wants_more() {
            match self.transport.bulk_read(&mut scratch, self.timeout) {
                Ok(n) => {
                    let at = assembly.collected();
                    let take = assembly.accept(n);
                    reply[at..at + take].copy_from_slice(&scratch[..take]);
                    log::trace!("read {} bytes, {} collected", n, assembly.collected());
                }
                // An interrupted read transferred nothing but still
                // consumes an attempt.
                Err(TransferError::Interrupted) => {
                    assembly.accept(0);
                }
                Err(TransferError::Timeout) => {
                    if assembly.awaiting_first_read() {
                        return Err(VmUsbError::UsbReadFault("transfer timed out".into()));
                    }
                    // Partial data on a later timeout is a valid result,
                    // e.g. a bus error truncating a block transfer.
                    assembly.timed_out();
                }
                Err(TransferError::Fault(reason)) => {
                    return Err(VmUsbError::UsbReadFault(reason));
                }
            }
        }
        log::debug!(
            "transaction complete: {} of {} reply bytes",
            assembly.collected(),
            reply.len()
        );
        Ok(assembly.collected())
    }

    fn execute_list(&mut self, list: &ReadoutList, reply: &mut [u8]) -> Result<usize, VmUsbError> {
        let packet = encode_packet(TransferAddress::immediate(), list, 0);
        self.transaction(&packet, reply)
    }

    fn load_list(
        &mut self,
        slot: u8,
        list: &ReadoutList,
        word_offset: u16,
    ) -> Result<(), VmUsbError> {
        let ta = TransferAddress::list_load(slot)?;
        let packet = encode_packet(ta, list, word_offset);
        self.transport
            .bulk_write(&packet, WRITE_TIMEOUT)
            .map_err(|err| VmUsbError::UsbWriteFault(err.to_string()))?;
        Ok(())
    }

    fn usb_read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, VmUsbError> {
        self.transport
            .bulk_read(buf, timeout)
            .map_err(|err| VmUsbError::UsbReadFault(err.to_string()))
    }

    fn write_action(&mut self, value: u16) -> Result<(), VmUsbError> {
        let packet = action_register_packet(value);
        self.transport
            .bulk_write(&packet, WRITE_TIMEOUT)
            .map_err(|err| VmUsbError::UsbWriteFault(err.to_string()))?;
        Ok(())
    }

    /// Raw register read: no shadow update. Shadow upkeep happens in the
    /// typed accessors.
    fn read_register(&mut self, address: u32) -> Result<u32, VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_register_read(address);
        let mut reply = [0u8; 4];
        let n = self.execute_list(&list, &mut reply)?;
        if n < 4 {
            return Err(VmUsbError::UsbReadFault(format!(
                "short register reply: {} of 4 bytes",
                n
            )));
        }
        Ok(u32::from_le_bytes(reply))
    }

    /// Raw register write. The controller answers a register write with a
    /// 16-bit status word that carries no information; it is read to keep
    /// the exchange symmetric and discarded.
    fn write_register(&mut self, address: u32, data: u32) -> Result<(), VmUsbError> {
        let mut list = ReadoutList::new();
        list.add_register_write(address, data);
        let mut reply = [0u8; 2];
        self.transaction(
            &encode_packet(TransferAddress::immediate(), &list, 0),
            &mut reply,
        )?;
        Ok(())
    }

    fn do_vme_write(&mut self, list: &ReadoutList) -> Result<(), VmUsbError> {
        let packet = encode_packet(TransferAddress::immediate(), list, 0);
        let mut reply = [0u8; 2];
        self.transaction(&packet, &mut reply)?;
        // On the wire a bus error during a write is a successful USB
        // exchange whose single reply word is zero.
        if u16::from_le_bytes(reply) == 0 {
            return Err(VmUsbError::BusError);
        }
        Ok(())
    }

    fn read_firmware_id(&mut self) -> Result<u32, VmUsbError> {
        let value = self.read_register(regs::FIRMWARE_ID)?;
        self.shadow.firmware_id = Some(value);
        Ok(value)
    }

    fn read_global_mode(&mut self) -> Result<u16, VmUsbError> {
        let value = self.read_register(regs::GLOBAL_MODE)? as u16;
        self.shadow.global_mode = Some(value);
        Ok(value)
    }

    fn write_global_mode(&mut self, value: u16) -> Result<(), VmUsbError> {
        self.write_register(regs::GLOBAL_MODE, u32::from(value))?;
        self.shadow.global_mode = Some(value);
        Ok(())
    }

    /// The irq mask register cannot be written directly; the firmware
    /// mandates this sequence, in this order:
    ///   1. save the global mode register,
    ///   2. write `mask | 0x8000` into global mode,
    ///   3. pulse the action register's USB-trigger bit,
    ///   4. read the firmware-id register (the value is not a firmware
    ///      id while the latch is armed and is discarded),
    ///   5. restore the saved global mode.
    /// Only then does the write-tracked shadow field change.
    fn write_irq_mask(&mut self, mask: u8) -> Result<(), VmUsbError> {
        let saved = self.read_global_mode()?;
        self.write_global_mode(u16::from(mask) | 0x8000)?;
        self.write_action(action::USB_TRIGGER)?;
        let _ = self.read_register(regs::FIRMWARE_ID)?;
        self.write_global_mode(saved)?;

        self.shadow.irq_mask = Some(mask);
        Ok(())
    }

    /// Repopulate every shadowed register from the hardware.
    fn initialize_shadow(&mut self) -> Result<(), VmUsbError> {
        self.read_firmware_id()?;
        self.read_global_mode()?;
        self.shadow.daq_settings = Some(self.read_register(regs::DAQ_SETTINGS)?);
        self.shadow.led_source = Some(self.read_register(regs::LED_SOURCE)?);
        self.shadow.device_source = Some(self.read_register(regs::DEVICE_SOURCE)?);
        self.shadow.dgg_a = Some(self.read_register(regs::DGG_A)?);
        self.shadow.dgg_b = Some(self.read_register(regs::DGG_B)?);
        self.shadow.dgg_extended = Some(self.read_register(regs::DGG_EXTENDED)?);
        for (index, address) in [regs::ISV12, regs::ISV34, regs::ISV56, regs::ISV78]
            .into_iter()
            .enumerate()
        {
            self.shadow.interrupt_vectors[index] = Some(self.read_register(address)?);
        }
        self.shadow.bulk_setup = Some(self.read_register(regs::USB_SETUP)?);
        self.shadow.events_per_buffer = Some(self.read_register(regs::EVENTS_PER_BUFFER)?);
        Ok(())
    }
}
