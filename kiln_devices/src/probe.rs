//! Temperature probe driver.
//!
//! Composes the framed channel and the sample decoder into the device the
//! control loop actually samples. Stream replies carry five measurables:
//! section 0 is the device's sample index counter, section 1 the probe
//! temperature in Celsius, sections 2–4 auxiliary and cold-junction
//! channels. Identity and settings replies are `:`-separated ASCII blocks.

use crate::channel::FramedChannel;
use crate::decode::{Readings, decode};
use crate::frame::Opcode;
use crate::transport::Transport;
use kiln_common::error::DeviceError;

/// Stream section holding the probe temperature.
pub const TEMPERATURE_SECTION: usize = 1;

/// Data bytes in one full sample (five 6-byte sections). `Reset` replies
/// append one extra status byte on top of this.
const SAMPLE_LEN: usize = 30;

/// Temperature unit reported by [`TempProbe::temperature`].
///
/// The probe itself always measures in Celsius; conversion happens
/// host-side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TempUnit {
    /// Degrees Celsius.
    #[default]
    Celsius,
    /// Degrees Fahrenheit.
    Fahrenheit,
    /// Kelvin.
    Kelvin,
}

impl TempUnit {
    /// Parse a unit symbol or name (case-insensitive). Returns `None` for
    /// anything unrecognized.
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "C" | "CELSIUS" => Some(Self::Celsius),
            "F" | "FAHRENHEIT" => Some(Self::Fahrenheit),
            "K" | "KELVIN" => Some(Self::Kelvin),
            _ => None,
        }
    }

    /// Single-letter unit symbol, as reported on the wire protocol.
    pub const fn symbol(&self) -> &'static str {
        match self {
            Self::Celsius => "C",
            Self::Fahrenheit => "F",
            Self::Kelvin => "K",
        }
    }

    /// Convert a Celsius value into this unit.
    #[inline]
    pub fn from_celsius(&self, celsius: f64) -> f64 {
        match self {
            Self::Celsius => celsius,
            Self::Fahrenheit => celsius * 1.8 + 32.0,
            Self::Kelvin => celsius + 273.15,
        }
    }
}

impl std::fmt::Display for TempUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// The framed-protocol temperature probe.
#[derive(Debug)]
pub struct TempProbe<T: Transport> {
    channel: FramedChannel<T>,
    unit: TempUnit,
}

impl<T: Transport> TempProbe<T> {
    /// Open a probe over `transport`, with the given acknowledgment retry
    /// cap. Readings default to Celsius.
    pub fn new(transport: T, max_attempts: u32) -> Self {
        Self {
            channel: FramedChannel::new(transport, max_attempts),
            unit: TempUnit::default(),
        }
    }

    /// Currently configured reporting unit.
    #[inline]
    pub fn unit(&self) -> TempUnit {
        self.unit
    }

    /// Change the reporting unit.
    pub fn set_unit(&mut self, unit: TempUnit) {
        self.unit = unit;
    }

    /// Unacknowledged exchange attempts on this probe's channel.
    #[inline]
    pub fn failed_attempts(&self) -> u64 {
        self.channel.failed_attempts()
    }

    /// Device identity block, one field per line.
    pub fn identity(&mut self) -> Result<String, DeviceError> {
        self.text_block(Opcode::Identity)
    }

    /// Device settings block, one field per line.
    pub fn settings(&mut self) -> Result<String, DeviceError> {
        self.text_block(Opcode::Settings)
    }

    /// One instantaneous sample of all measurables.
    pub fn sample(&mut self) -> Result<Readings, DeviceError> {
        let reply = self.channel.query(Opcode::Stream)?;
        decode(&reply)
    }

    /// Like [`sample`](Self::sample), but re-zeroes the device's sample
    /// index counter first. The reply carries a trailing status byte that
    /// is not part of the sample data.
    pub fn sample_from_t0(&mut self) -> Result<Readings, DeviceError> {
        let reply = self.channel.query(Opcode::Reset)?;
        if reply.len() < SAMPLE_LEN {
            return Err(DeviceError::MalformedFrame { len: reply.len() });
        }
        decode(&reply[..SAMPLE_LEN])
    }

    /// Probe temperature in Celsius, the device's native scale. The
    /// control loop regulates in Celsius regardless of the reporting unit.
    ///
    /// # Errors
    /// `DeviceError::InvalidReply` if the sample carries no temperature
    /// section; otherwise whatever the channel surfaced.
    pub fn temperature_celsius(&mut self) -> Result<f64, DeviceError> {
        let readings = self.sample()?;
        let reading = readings.get(TEMPERATURE_SECTION).ok_or_else(|| {
            DeviceError::InvalidReply(format!(
                "sample has {} sections, no temperature",
                readings.len()
            ))
        })?;
        Ok(reading.value())
    }

    /// Probe temperature in the configured unit.
    pub fn temperature(&mut self) -> Result<f64, DeviceError> {
        let celsius = self.temperature_celsius()?;
        Ok(self.unit.from_celsius(celsius))
    }

    /// Abort all device-side processing (fire-and-forget).
    pub fn shutdown(&mut self) -> Result<(), DeviceError> {
        self.channel.send(Opcode::Kill)
    }

    fn text_block(&mut self, opcode: Opcode) -> Result<String, DeviceError> {
        let reply = self.channel.query(opcode)?;
        let text = String::from_utf8_lossy(&reply);
        Ok(text.trim_end_matches(['\0', ' ']).replace(':', "\n"))
    }
}
