//! Framed request/response channel for the probe link.
//!
//! Every request is the opcode repeated six times; the device answers with
//! a fixed number of data bytes and one acknowledgment byte. An exchange is
//! retried, unmodified, until the device acks it — up to a bounded attempt
//! cap, after which the query fails with `ProtocolExhausted`. Failed
//! attempts are counted per channel instance and can be inspected with
//! [`FramedChannel::failed_attempts`].
//!
//! Multi-frame opcodes (identity, settings) continue the exchange: after
//! each acknowledged frame the channel sends a continue frame and reads
//! another chunk, concatenating data until the completion ack arrives.
//!
//! Short reads (the transport timed out mid-reply) are failed attempts
//! eligible for retry, not fatal errors. Transport-level I/O failures are
//! propagated immediately and never retried here.

use crate::frame::{ACK_COMPLETE, ACK_RECEIVED, CONTINUE_FRAME, Opcode};
use crate::transport::Transport;
use kiln_common::error::DeviceError;
use tracing::{debug, trace};

/// Capacity of the reply accumulator. Generous for the largest known
/// multi-frame reply; overflow means the device never signaled completion.
pub const REPLY_CAPACITY: usize = 256;

/// Accumulated reply bytes of one exchange. Fixed capacity, no heap.
pub type ReplyBuf = heapless::Vec<u8, REPLY_CAPACITY>;

/// Retry-until-acknowledged exchange engine over a [`Transport`].
#[derive(Debug)]
pub struct FramedChannel<T: Transport> {
    transport: T,
    max_attempts: u32,
    failed_attempts: u64,
}

impl<T: Transport> FramedChannel<T> {
    /// Wrap a transport. `max_attempts` bounds the acknowledgment retry
    /// loop for a single exchange; it must be at least 1.
    pub fn new(transport: T, max_attempts: u32) -> Self {
        Self {
            transport,
            max_attempts: max_attempts.max(1),
            failed_attempts: 0,
        }
    }

    /// Total unacknowledged attempts since this channel was created.
    #[inline]
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    /// Fire-and-forget: transmit one request frame, read nothing back.
    ///
    /// # Errors
    /// `DeviceError::Transport` if the write fails.
    pub fn send(&mut self, opcode: Opcode) -> Result<(), DeviceError> {
        trace!(opcode = ?opcode, "sending command frame");
        self.transport.send(&opcode.request_frame())
    }

    /// Run one full query exchange and return the concatenated data bytes.
    ///
    /// # Errors
    /// - `DeviceError::InvalidCommand` for command-only opcodes, before any
    ///   I/O takes place.
    /// - `DeviceError::ProtocolExhausted` once the attempt cap is reached.
    /// - `DeviceError::ReplyOverflow` if a multi-frame reply never
    ///   completes within the accumulator capacity.
    /// - `DeviceError::Transport` on I/O failure (not retried).
    pub fn query(&mut self, opcode: Opcode) -> Result<ReplyBuf, DeviceError> {
        let Some(len) = opcode.reply_len() else {
            return Err(DeviceError::InvalidCommand(format!(
                "opcode {:#04x} has no reply and cannot be queried",
                opcode as u8
            )));
        };

        let mut reply = ReplyBuf::new();

        // First frame: repeat the request until the device acks it.
        let mut attempts = 0u32;
        loop {
            self.transport.send(&opcode.request_frame())?;
            let mut data = [0u8; 32];
            let got = self.transport.recv_exact(&mut data[..len])?;
            let ack = self.read_ack()?;

            if got == len && ack == Some(ACK_RECEIVED) {
                reply
                    .extend_from_slice(&data[..len])
                    .map_err(|_| DeviceError::ReplyOverflow {
                        capacity: REPLY_CAPACITY,
                    })?;
                break;
            }

            self.failed_attempts += 1;
            attempts += 1;
            debug!(
                opcode = ?opcode,
                attempt = attempts,
                got,
                expected = len,
                ack = ?ack,
                "exchange not acknowledged"
            );
            if attempts >= self.max_attempts {
                return Err(DeviceError::ProtocolExhausted { attempts });
            }
        }

        if !opcode.is_multi_frame() {
            return Ok(reply);
        }

        // Continuation: request further chunks until the completion ack.
        let mut attempts = 0u32;
        loop {
            self.transport.send(&CONTINUE_FRAME)?;
            let mut data = [0u8; 32];
            let got = self.transport.recv_exact(&mut data[..len])?;
            let ack = self.read_ack()?;

            match ack {
                Some(a @ (ACK_RECEIVED | ACK_COMPLETE)) if got == len => {
                    reply
                        .extend_from_slice(&data[..len])
                        .map_err(|_| DeviceError::ReplyOverflow {
                            capacity: REPLY_CAPACITY,
                        })?;
                    if a == ACK_COMPLETE {
                        return Ok(reply);
                    }
                    attempts = 0;
                }
                _ => {
                    self.failed_attempts += 1;
                    attempts += 1;
                    debug!(
                        opcode = ?opcode,
                        attempt = attempts,
                        got,
                        ack = ?ack,
                        "continuation not acknowledged"
                    );
                    if attempts >= self.max_attempts {
                        return Err(DeviceError::ProtocolExhausted { attempts });
                    }
                }
            }
        }
    }

    fn read_ack(&mut self) -> Result<Option<u8>, DeviceError> {
        let mut ack = [0u8; 1];
        if self.transport.recv_exact(&mut ack)? == 1 {
            Ok(Some(ack[0]))
        } else {
            Ok(None)
        }
    }
}
