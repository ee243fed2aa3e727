//! The read-reassembly state machine of the transaction engine.
//!
//! A reply can arrive fragmented over several bulk reads, and the number
//! of extra reads worth attempting depends on mutable device state (the
//! buffering granularity selected in the global mode register). The
//! machine here is pure (the I/O loop in [`controller`](crate::controller)
//! feeds it transfer outcomes), so the attempt bound and its quirks are
//! testable without a device.

/// Bytes of the scratch buffer one bulk read fills.
pub(crate) const SCRATCH_SIZE: usize = 8192;

/// How many bulk reads beyond the first are worth attempting for a
/// `requested`-byte reply.
///
/// With fixed-size buffering the controller delivers `2 * buffer_size`
/// bytes per buffer at most, so the budget is the number of scratch-sized
/// chunks in the request, plus one: the first read has been observed to
/// spuriously return zero bytes, and the extra attempt absorbs that. In
/// event-count buffering mode (`buffer_size` is the negative sentinel)
/// the reply is a single buffer and no retries are made.
pub(crate) fn retry_budget(requested: usize, buffer_size: i32) -> usize {
    if buffer_size < 0 {
        return 0;
    }
    let chunk = SCRATCH_SIZE.min(buffer_size as usize * 2);
    requested / chunk + 1
}

/// Where a transaction's read side currently stands.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ReadPhase {
    /// The first bulk read has not completed yet.
    AwaitingFirstRead,
    /// The first read came up short; `attempts_left` more reads may run.
    Retrying { attempts_left: usize },
    /// The requested byte count was collected, or the budget ran out.
    Done,
    /// A later read timed out; the bytes collected so far are the result.
    TimedOutPartial,
}

/// Tracks one transaction's progress toward `requested` reply bytes.
#[derive(Debug)]
pub(crate) struct Reassembly {
    requested: usize,
    collected: usize,
    budget: usize,
    phase: ReadPhase,
}

impl Reassembly {
    pub(crate) fn new(requested: usize, budget: usize) -> Reassembly {
        Reassembly {
            requested,
            collected: 0,
            budget,
            phase: ReadPhase::AwaitingFirstRead,
        }
    }

    /// `true` while another bulk read should run.
    pub(crate) fn wants_more(&self) -> bool {
        matches!(
            self.phase,
            ReadPhase::AwaitingFirstRead | ReadPhase::Retrying { .. }
        )
    }

    pub(crate) fn awaiting_first_read(&self) -> bool {
        self.phase == ReadPhase::AwaitingFirstRead
    }

    /// Total bytes accepted so far.
    pub(crate) fn collected(&self) -> usize {
        self.collected
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> &ReadPhase {
        &self.phase
    }

    /// Record a read that transferred `n` bytes. Returns how many of them
    /// belong in the caller's buffer (`n` clipped to the bytes still
    /// missing). An interrupted read is fed through here as `n == 0` and
    /// consumes an attempt like any other read.
    pub(crate) fn accept(&mut self, n: usize) -> usize {
        let take = n.min(self.requested - self.collected);
        self.collected += take;

        if self.collected >= self.requested {
            self.phase = ReadPhase::Done;
            return take;
        }
        self.phase = match self.phase {
            ReadPhase::AwaitingFirstRead if self.budget > 0 => ReadPhase::Retrying {
                attempts_left: self.budget,
            },
            ReadPhase::Retrying { attempts_left } if attempts_left > 1 => ReadPhase::Retrying {
                attempts_left: attempts_left - 1,
            },
            _ => ReadPhase::Done,
        };
        take
    }

    /// Record a timeout on a read after the first. The transaction ends
    /// with whatever has accumulated; this is a valid outcome, not an
    /// error (a bus error truncating a block transfer looks exactly like
    /// this).
    pub(crate) fn timed_out(&mut self) {
        self.phase = ReadPhase::TimedOutPartial;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn budget_counts_scratch_chunks_plus_one() {
        // 13 kword buffers clamp the chunk to the scratch size.
        assert_eq!(retry_budget(200, 13 * 1024), 1);
        assert_eq!(retry_budget(8192, 13 * 1024), 2);
        assert_eq!(retry_budget(40_000, 13 * 1024), 5);
        // Small buffers shrink the chunk below the scratch size.
        assert_eq!(retry_budget(200, 56), 2);
        assert_eq!(retry_budget(1024, 128), 5);
    }

    #[test]
    fn event_count_mode_disables_retries() {
        assert_eq!(retry_budget(40_000, -1), 0);

        let mut assembly = Reassembly::new(200, 0);
        assembly.accept(100);
        assert_eq!(*assembly.phase(), ReadPhase::Done);
        assert!(!assembly.wants_more());
        assert_eq!(assembly.collected(), 100);
    }

    #[test]
    fn fragmented_reply_is_reassembled() {
        let mut assembly = Reassembly::new(200, 2);
        assert!(assembly.awaiting_first_read());

        assert_eq!(assembly.accept(100), 100);
        assert_eq!(
            *assembly.phase(),
            ReadPhase::Retrying { attempts_left: 2 }
        );
        assert_eq!(assembly.accept(50), 50);
        assert_eq!(
            *assembly.phase(),
            ReadPhase::Retrying { attempts_left: 1 }
        );
        assert_eq!(assembly.accept(50), 50);
        assert_eq!(*assembly.phase(), ReadPhase::Done);
        assert_eq!(assembly.collected(), 200);
    }

    #[test]
    fn extra_attempt_absorbs_a_spurious_zero_byte_first_read() {
        let mut assembly = Reassembly::new(200, 1);
        assembly.accept(0);
        assert_eq!(
            *assembly.phase(),
            ReadPhase::Retrying { attempts_left: 1 }
        );
        assembly.accept(200);
        assert_eq!(*assembly.phase(), ReadPhase::Done);
        assert_eq!(assembly.collected(), 200);
    }

    #[test]
    fn budget_exhaustion_finishes_short() {
        let mut assembly = Reassembly::new(300, 1);
        assembly.accept(100);
        assembly.accept(100);
        assert_eq!(*assembly.phase(), ReadPhase::Done);
        assert_eq!(assembly.collected(), 200);
    }

    #[test]
    fn later_timeout_is_a_partial_result() {
        let mut assembly = Reassembly::new(200, 3);
        assembly.accept(80);
        assembly.timed_out();
        assert_eq!(*assembly.phase(), ReadPhase::TimedOutPartial);
        assert!(!assembly.wants_more());
        assert_eq!(assembly.collected(), 80);
    }

    #[test]
    fn oversized_read_is_clipped_to_the_request() {
        let mut assembly = Reassembly::new(100, 2);
        assert_eq!(assembly.accept(120), 100);
        assert_eq!(assembly.collected(), 100);
        assert_eq!(*assembly.phase(), ReadPhase::Done);
    }
}
