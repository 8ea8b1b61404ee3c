//! Error taxonomy shared across the kiln workspace.
//!
//! Two families:
//! - [`CommandError`] — failures of the text command protocol. Always
//!   reported back to the remote client; never terminates the session.
//! - [`DeviceError`] — failures on a device link (framed probe or SCPI
//!   supply). Surfaced to the caller of the control step, which skips the
//!   step and continues; never fatal to the process.

use thiserror::Error;

/// Errors produced while parsing or dispatching a wire command.
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// Malformed command line (missing `\r` terminator, empty line).
    #[error("ERROR: command {0:?} not valid.")]
    InvalidCommand(String),

    /// A write argument that could not be parsed or is out of range.
    #[error("ERROR: bad argument {0:?}")]
    InvalidArgument(String),
}

/// Errors produced by a device protocol layer.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Opcode or request rejected before any I/O took place.
    #[error("invalid device command: {0}")]
    InvalidCommand(String),

    /// Transport-level I/O failure. Not retried by the protocol layer.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Reply buffer length is not a whole number of 6-byte sections.
    #[error("malformed frame: {len} bytes is not a multiple of 6")]
    MalformedFrame {
        /// Offending buffer length.
        len: usize,
    },

    /// The acknowledgment retry loop reached its attempt cap.
    #[error("device protocol error: no acknowledgment after {attempts} attempts")]
    ProtocolExhausted {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A multi-frame reply outgrew the fixed accumulation buffer.
    #[error("reply overflow: device kept continuing past {capacity} bytes")]
    ReplyOverflow {
        /// Accumulator capacity in bytes.
        capacity: usize,
    },

    /// The device answered, but the payload could not be interpreted.
    #[error("invalid device reply: {0}")]
    InvalidReply(String),
}

impl DeviceError {
    /// Returns true if this error is worth one more attempt at the
    /// channel layer (short read, garbled section framing).
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_error_messages_match_wire_format() {
        let err = CommandError::InvalidCommand("PS:VSET".to_string());
        assert_eq!(format!("{err}"), "ERROR: command \"PS:VSET\" not valid.");

        let err = CommandError::InvalidArgument("abc".to_string());
        assert_eq!(format!("{err}"), "ERROR: bad argument \"abc\"");
    }

    #[test]
    fn malformed_frame_is_retryable() {
        let err = DeviceError::MalformedFrame { len: 7 };
        assert!(err.is_retryable());
    }

    #[test]
    fn exhausted_and_transport_are_not_retryable() {
        let err = DeviceError::ProtocolExhausted { attempts: 5 };
        assert!(!err.is_retryable());

        let err = DeviceError::Transport(std::io::Error::other("link down"));
        assert!(!err.is_retryable());
    }
}
