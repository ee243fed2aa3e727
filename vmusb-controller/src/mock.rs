//! A scripted transport for exercising the controller without hardware.
//!
//! Tests queue up read outcomes, hand a clone of the transport to
//! [`VmUsb`](crate::VmUsb), and afterwards inspect the packets the
//! controller wrote. Clones share state, so the scripting side keeps
//! working after the controller has taken ownership of its clone.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::{TransferError, VmUsbError};
use crate::BulkTransport;

/// One scripted outcome for a bulk read.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Deliver these bytes.
    Data(Vec<u8>),
    /// Time out without transferring anything.
    Timeout,
    /// Report a transient interruption.
    Interrupted,
    /// Fail the read with this reason.
    Fault(String),
}

#[derive(Default)]
struct MockState {
    replies: VecDeque<Reply>,
    written: Vec<Vec<u8>>,
    fail_writes: bool,
    fail_reopen: bool,
    reopened: usize,
    closed: bool,
}

/// Shared-state scripted transport. An exhausted reply script reads as a
/// timeout, which is what an idle device looks like.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Queue an arbitrary read outcome.
    pub fn push_reply(&self, reply: Reply) {
        self.state.lock().replies.push_back(reply);
    }

    /// Queue a data-bearing read.
    pub fn push_data(&self, bytes: &[u8]) {
        self.push_reply(Reply::Data(bytes.to_vec()));
    }

    /// Make every subsequent bulk write fail.
    pub fn fail_writes(&self, fail: bool) {
        self.state.lock().fail_writes = fail;
    }

    /// Make [`BulkTransport::reopen`] fail.
    pub fn fail_reopen(&self, fail: bool) {
        self.state.lock().fail_reopen = fail;
    }

    /// Every packet written so far, oldest first.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.lock().written.clone()
    }

    /// Number of scripted replies not yet consumed.
    pub fn pending_replies(&self) -> usize {
        self.state.lock().replies.len()
    }

    pub fn reopen_count(&self) -> usize {
        self.state.lock().reopened
    }

    pub fn was_closed(&self) -> bool {
        self.state.lock().closed
    }
}

impl BulkTransport for MockTransport {
    fn bulk_write(&mut self, data: &[u8], _timeout: Duration) -> Result<usize, TransferError> {
        let mut state = self.state.lock();
        if state.fail_writes {
            return Err(TransferError::Fault("scripted write failure".into()));
        }
        state.written.push(data.to_vec());
        Ok(data.len())
    }

    fn bulk_read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize, TransferError> {
        match self.state.lock().replies.pop_front() {
            Some(Reply::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Reply::Interrupted) => Err(TransferError::Interrupted),
            Some(Reply::Fault(reason)) => Err(TransferError::Fault(reason)),
            Some(Reply::Timeout) | None => Err(TransferError::Timeout),
        }
    }

    fn reopen(&mut self) -> Result<(), VmUsbError> {
        let mut state = self.state.lock();
        if state.fail_reopen {
            return Err(VmUsbError::DeviceOpenFailed(
                "scripted reopen failure".into(),
            ));
        }
        state.reopened += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn clones_share_the_script_and_the_write_log() {
        let mock = MockTransport::new();
        let mut clone = mock.clone();

        mock.push_data(&[1, 2, 3]);
        let mut buf = [0u8; 8];
        assert_eq!(clone.bulk_read(&mut buf, Duration::ZERO).unwrap(), 3);
        assert_eq!(&buf[..3], &[1, 2, 3]);

        clone.bulk_write(&[9], Duration::ZERO).unwrap();
        assert_eq!(mock.written(), vec![vec![9]]);
    }

    #[test]
    fn an_exhausted_script_reads_as_a_timeout() {
        let mut mock = MockTransport::new();
        let mut buf = [0u8; 8];
        assert!(matches!(
            mock.bulk_read(&mut buf, Duration::ZERO),
            Err(TransferError::Timeout)
        ));
    }
}
