//! Fixed-point sample decoder.
//!
//! A sample reply is a sequence of 6-byte sections, one per physical
//! measurable, in transmission order. Within a section:
//!
//! ```text
//! byte 0    reserved
//! byte 1    bit 3: sign (set = negative)
//!           bits 0..2: decimal exponent e (0..=7)
//! bytes 2–5 digits, big-endian u32
//! ```
//!
//! Numeric value = `sign * digits * 10^(-e)`. A buffer whose length is not
//! a whole number of sections is a framing error.
//!
//! This runs on the control step's hot path, so decoding is pure and
//! allocation-free: output goes into a fixed-capacity `heapless::Vec`.

use kiln_common::error::DeviceError;

/// Bytes per measurable section.
pub const SECTION_LEN: usize = 6;

/// Most measurables a single reply can carry.
pub const MAX_READINGS: usize = 8;

const SIGN_BIT: u8 = 0x08;
const EXPONENT_MASK: u8 = 0x07;

/// One decoded measurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reading {
    /// Position of this section in the reply, 0-based.
    pub index: usize,
    /// +1 or −1.
    pub sign: i8,
    /// Decimal digits of the magnitude.
    pub digits: u32,
    /// Decimal exponent, 0..=7; the value is scaled by `10^(-exponent)`.
    pub exponent: u8,
}

impl Reading {
    /// Numeric value of this reading.
    #[inline]
    pub fn value(&self) -> f64 {
        f64::from(self.sign) * f64::from(self.digits) * 10f64.powi(-i32::from(self.exponent))
    }
}

/// Decoded readings of one reply, in transmission order.
pub type Readings = heapless::Vec<Reading, MAX_READINGS>;

/// Decode a reply buffer into its readings.
///
/// # Errors
/// `DeviceError::MalformedFrame` if `buffer.len()` is not a multiple of
/// [`SECTION_LEN`], or the section count exceeds [`MAX_READINGS`].
pub fn decode(buffer: &[u8]) -> Result<Readings, DeviceError> {
    if buffer.len() % SECTION_LEN != 0 {
        return Err(DeviceError::MalformedFrame { len: buffer.len() });
    }

    let mut out = Readings::new();
    for (index, section) in buffer.chunks_exact(SECTION_LEN).enumerate() {
        let flags = section[1];
        let reading = Reading {
            index,
            sign: if flags & SIGN_BIT != 0 { -1 } else { 1 },
            digits: u32::from_be_bytes([section[2], section[3], section[4], section[5]]),
            exponent: flags & EXPONENT_MASK,
        };
        out.push(reading)
            .map_err(|_| DeviceError::MalformedFrame { len: buffer.len() })?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-encode a reading into section bytes (test inverse of `decode`).
    fn encode_section(sign: i8, digits: u32, exponent: u8) -> [u8; SECTION_LEN] {
        let mut flags = exponent & EXPONENT_MASK;
        if sign < 0 {
            flags |= SIGN_BIT;
        }
        let d = digits.to_be_bytes();
        [0x00, flags, d[0], d[1], d[2], d[3]]
    }

    #[test]
    fn worked_example() {
        // 00 08 00 00 27 10 → sign bit set, exponent 0, digits 10000.
        let section = [0x00, 0x08, 0x00, 0x00, 0x27, 0x10];
        let readings = decode(&section).unwrap();
        assert_eq!(readings.len(), 1);

        let r = readings[0];
        assert_eq!(r.sign, -1);
        assert_eq!(r.digits, 10_000);
        assert_eq!(r.exponent, 0);
        assert_eq!(r.value(), -10_000.0);
    }

    #[test]
    fn encode_decode_round_trip() {
        let cases = [
            (1i8, 0u32, 0u8),
            (1, 12_345, 3),
            (-1, 12_345, 3),
            (1, u32::MAX, 7),
            (-1, 1, 7),
            (-1, 999_999, 5),
        ];
        for (sign, digits, exponent) in cases {
            let section = encode_section(sign, digits, exponent);
            let readings = decode(&section).unwrap();
            let r = readings[0];
            assert_eq!((r.sign, r.digits, r.exponent), (sign, digits, exponent));
            // Re-encoding reproduces the original section bytes exactly.
            assert_eq!(encode_section(r.sign, r.digits, r.exponent), section);
        }
    }

    #[test]
    fn multi_section_buffer_decodes_in_order() {
        let mut buffer = Vec::new();
        buffer.extend_from_slice(&encode_section(1, 5, 0));
        buffer.extend_from_slice(&encode_section(-1, 215, 1));
        buffer.extend_from_slice(&encode_section(1, 987_654, 4));

        let readings = decode(&buffer).unwrap();
        assert_eq!(readings.len(), 3);
        assert_eq!(readings[0].index, 0);
        assert_eq!(readings[0].value(), 5.0);
        assert_eq!(readings[1].index, 1);
        assert!((readings[1].value() - (-21.5)).abs() < 1e-12);
        assert!((readings[2].value() - 98.7654).abs() < 1e-9);
    }

    #[test]
    fn remainder_bytes_rejected() {
        for len in [1, 5, 7, 11, 31] {
            let buffer = vec![0u8; len];
            match decode(&buffer) {
                Err(DeviceError::MalformedFrame { len: l }) => assert_eq!(l, len),
                other => panic!("len {len}: expected MalformedFrame, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_buffer_is_zero_readings() {
        assert_eq!(decode(&[]).unwrap().len(), 0);
    }

    #[test]
    fn sign_bit_does_not_leak_into_exponent() {
        // flags = 0x0F → negative, exponent 7.
        let section = [0x00, 0x0F, 0x00, 0x00, 0x00, 0x01];
        let r = decode(&section).unwrap()[0];
        assert_eq!(r.sign, -1);
        assert_eq!(r.exponent, 7);
        assert!((r.value() - (-1e-7)).abs() < 1e-20);
    }
}
