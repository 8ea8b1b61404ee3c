//! Frame-level constants for the probe's binary protocol.
//!
//! A request is the single opcode byte repeated [`FRAME_REPEAT`] times — a
//! redundancy scheme with no checksum. Replies are a fixed number of data
//! bytes (opcode-dependent) followed by one acknowledgment byte.

/// How many times the opcode byte is repeated in a request frame.
pub const FRAME_REPEAT: usize = 6;

/// Ack byte: the device received the request (more data may follow).
pub const ACK_RECEIVED: u8 = 0x08;

/// Ack byte: a multi-frame reply is complete.
pub const ACK_COMPLETE: u8 = 0x07;

/// Continuation request for multi-frame replies (`ACK_RECEIVED` repeated).
pub const CONTINUE_FRAME: [u8; FRAME_REPEAT] = [ACK_RECEIVED; FRAME_REPEAT];

/// Device operations.
///
/// `Kill` is command-only: it produces no reply and cannot be queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Device identity block (multi-frame ASCII).
    Identity = 0x01,
    /// Device settings block (multi-frame ASCII).
    Settings = 0x02,
    /// One instantaneous sample of all measurables.
    Stream = 0x03,
    /// Like `Stream`, but re-zeroes the device's sample index counter.
    Reset = 0x04,
    /// Abort all device-side processing. No reply.
    Kill = 0xFF,
}

impl Opcode {
    /// Convert from raw `u8`. Returns `None` for unknown values.
    #[inline]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Identity),
            0x02 => Some(Self::Settings),
            0x03 => Some(Self::Stream),
            0x04 => Some(Self::Reset),
            0xFF => Some(Self::Kill),
            _ => None,
        }
    }

    /// Reply length in data bytes, `None` for command-only opcodes.
    ///
    /// The `Reset` reply carries the 30 sample bytes plus one trailing
    /// status byte, hence 31.
    #[inline]
    pub const fn reply_len(&self) -> Option<usize> {
        match self {
            Self::Identity => Some(20),
            Self::Settings => Some(20),
            Self::Stream => Some(30),
            Self::Reset => Some(31),
            Self::Kill => None,
        }
    }

    /// True for opcodes whose reply spans several ack'd frames.
    #[inline]
    pub const fn is_multi_frame(&self) -> bool {
        matches!(self, Self::Identity | Self::Settings)
    }

    /// Build the request frame for this opcode.
    #[inline]
    pub const fn request_frame(&self) -> [u8; FRAME_REPEAT] {
        [*self as u8; FRAME_REPEAT]
    }
}
