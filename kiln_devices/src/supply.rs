//! Bench power supply driver (SCPI-style text protocol).
//!
//! The supply is the heater actuator: the control loop drives its voltage
//! set point, the command protocol exposes everything else. Commands and
//! queries are newline-terminated ASCII over a [`Transport`].
//!
//! Voltage/current limits are software limits held host-side: the supply
//! hardware has no limit feature, so a set request is checked against the
//! active limit before the command goes out.

use crate::transport::Transport;
use bitflags::bitflags;
use kiln_common::error::DeviceError;
use tracing::debug;

/// Output channels on the supply.
pub const CHANNEL_COUNT: u8 = 2;

bitflags! {
    /// Decoded `system:status?` register.
    ///
    /// The supply reports a hex word; one bit per physical state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SupplyStatus: u16 {
        /// Channel 1 in constant-current mode.
        const CH1_CC        = 0x0001;
        /// Channel 2 in constant-current mode.
        const CH2_CC        = 0x0002;
        /// Channel 1 output enabled.
        const CH1_OUTPUT_ON = 0x0010;
        /// Channel 2 output enabled.
        const CH2_OUTPUT_ON = 0x0020;
        /// Timer 1 running.
        const TIMER1_ON     = 0x0040;
        /// Timer 2 running.
        const TIMER2_ON     = 0x0080;
    }
}

impl SupplyStatus {
    /// Output-enable bit for the given 1-based channel.
    #[inline]
    pub fn channel_on(&self, channel: u8) -> bool {
        match channel {
            1 => self.contains(Self::CH1_OUTPUT_ON),
            2 => self.contains(Self::CH2_OUTPUT_ON),
            _ => false,
        }
    }
}

/// Newline-terminated request/reply exchange over a transport.
#[derive(Debug)]
pub struct ScpiLink<T: Transport> {
    transport: T,
}

impl<T: Transport> ScpiLink<T> {
    /// Wrap a transport.
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    /// Send one command line, expect no reply.
    pub fn command(&mut self, cmd: &str) -> Result<(), DeviceError> {
        debug!(cmd, "scpi command");
        let mut line = String::with_capacity(cmd.len() + 1);
        line.push_str(cmd);
        line.push('\n');
        self.transport.send(line.as_bytes())
    }

    /// Send one query line and read the reply up to its terminator.
    ///
    /// # Errors
    /// `DeviceError::InvalidReply` if the device sends nothing within the
    /// transport timeout or never terminates the line.
    pub fn query(&mut self, cmd: &str) -> Result<String, DeviceError> {
        self.command(cmd)?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            if self.transport.recv(&mut byte)? == 0 {
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
            if line.len() > 512 {
                return Err(DeviceError::InvalidReply(format!(
                    "unterminated reply to {cmd:?}"
                )));
            }
        }

        if line.is_empty() {
            return Err(DeviceError::InvalidReply(format!("no reply to {cmd:?}")));
        }
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }
}

/// The heater's bench power supply.
#[derive(Debug)]
pub struct PowerSupply<T: Transport> {
    link: ScpiLink<T>,
    /// Hardware maximum voltage [V].
    max_voltage: f64,
    /// Hardware maximum current [A].
    max_current: f64,
    /// Per-channel software voltage limits [V].
    voltage_limit: [f64; CHANNEL_COUNT as usize],
    /// Per-channel software current limits [A].
    current_limit: [f64; CHANNEL_COUNT as usize],
    /// Channel driving the heater (1-based).
    channel: u8,
}

impl<T: Transport> PowerSupply<T> {
    /// Open a supply over `transport`. Software limits start at the
    /// hardware maxima.
    pub fn new(transport: T, channel: u8, max_voltage: f64, max_current: f64) -> Self {
        Self {
            link: ScpiLink::new(transport),
            max_voltage,
            max_current,
            voltage_limit: [max_voltage; CHANNEL_COUNT as usize],
            current_limit: [max_current; CHANNEL_COUNT as usize],
            channel: channel.clamp(1, CHANNEL_COUNT),
        }
    }

    /// Channel the heater is wired to (1-based).
    #[inline]
    pub fn active_channel(&self) -> u8 {
        self.channel
    }

    /// Select the channel driving the heater.
    ///
    /// # Errors
    /// `DeviceError::InvalidCommand` for channels outside `1..=2`.
    pub fn set_active_channel(&mut self, channel: u8) -> Result<(), DeviceError> {
        Self::channel_index(channel)?;
        self.channel = channel;
        Ok(())
    }

    /// Instrument identity string (`*IDN?`).
    pub fn idn(&mut self) -> Result<String, DeviceError> {
        self.link.query("*IDN?")
    }

    /// Decoded system status register.
    pub fn status(&mut self) -> Result<SupplyStatus, DeviceError> {
        let reply = self.link.query("system:status?")?;
        let hex = reply.trim_start_matches("0x").trim_start_matches("0X");
        let raw = u16::from_str_radix(hex, 16)
            .map_err(|_| DeviceError::InvalidReply(format!("bad status word {reply:?}")))?;
        Ok(SupplyStatus::from_bits_truncate(raw))
    }

    /// Output-enable state of a channel.
    pub fn channel_is_on(&mut self, channel: u8) -> Result<bool, DeviceError> {
        Self::channel_index(channel)?;
        Ok(self.status()?.channel_on(channel))
    }

    /// Switch a channel's output on or off.
    pub fn set_output(&mut self, channel: u8, on: bool) -> Result<(), DeviceError> {
        Self::channel_index(channel)?;
        let state = if on { "ON" } else { "OFF" };
        self.link.command(&format!("Output CH{channel},{state}"))
    }

    /// Request an output voltage. Rounded to millivolts; refused above the
    /// channel's software limit.
    pub fn set_voltage(&mut self, channel: u8, volts: f64) -> Result<(), DeviceError> {
        let idx = Self::channel_index(channel)?;
        let volts = (volts * 1000.0).round() / 1000.0;
        let limit = self.voltage_limit[idx];
        if !(0.0..=limit).contains(&volts) {
            return Err(DeviceError::InvalidCommand(format!(
                "requested {volts} V outside channel {channel} limit 0..={limit} V"
            )));
        }
        self.link.command(&format!("CH{channel}:voltage {volts}"))
    }

    /// Request an output current. Rounded to milliamps; refused above the
    /// channel's software limit.
    pub fn set_current(&mut self, channel: u8, amps: f64) -> Result<(), DeviceError> {
        let idx = Self::channel_index(channel)?;
        let amps = (amps * 1000.0).round() / 1000.0;
        let limit = self.current_limit[idx];
        if !(0.0..=limit).contains(&amps) {
            return Err(DeviceError::InvalidCommand(format!(
                "requested {amps} A outside channel {channel} limit 0..={limit} A"
            )));
        }
        self.link.command(&format!("CH{channel}:current {amps}"))
    }

    /// Requested (set) voltage of a channel.
    pub fn requested_voltage(&mut self, channel: u8) -> Result<f64, DeviceError> {
        Self::channel_index(channel)?;
        let reply = self.link.query(&format!("CH{channel}:voltage?"))?;
        parse_f64(&reply)
    }

    /// Measured output voltage of a channel.
    pub fn measured_voltage(&mut self, channel: u8) -> Result<f64, DeviceError> {
        Self::channel_index(channel)?;
        let reply = self.link.query(&format!("measure:voltage? CH{channel}"))?;
        parse_f64(&reply)
    }

    /// Requested (set) current of a channel.
    pub fn requested_current(&mut self, channel: u8) -> Result<f64, DeviceError> {
        Self::channel_index(channel)?;
        let reply = self.link.query(&format!("CH{channel}:current?"))?;
        parse_f64(&reply)
    }

    /// Measured output current of a channel.
    pub fn measured_current(&mut self, channel: u8) -> Result<f64, DeviceError> {
        Self::channel_index(channel)?;
        let reply = self.link.query(&format!("measure:current? CH{channel}"))?;
        parse_f64(&reply)
    }

    /// Software voltage limit of a channel.
    pub fn voltage_limit(&self, channel: u8) -> Result<f64, DeviceError> {
        Ok(self.voltage_limit[Self::channel_index(channel)?])
    }

    /// Set the software voltage limit. Must stay within the hardware
    /// maximum.
    pub fn set_voltage_limit(&mut self, channel: u8, volts: f64) -> Result<(), DeviceError> {
        let idx = Self::channel_index(channel)?;
        if !(volts > 0.0 && volts <= self.max_voltage) {
            return Err(DeviceError::InvalidCommand(format!(
                "voltage limit {volts} V outside hardware range 0..={} V",
                self.max_voltage
            )));
        }
        self.voltage_limit[idx] = volts;
        Ok(())
    }

    /// Software current limit of a channel.
    pub fn current_limit(&self, channel: u8) -> Result<f64, DeviceError> {
        Ok(self.current_limit[Self::channel_index(channel)?])
    }

    /// Set the software current limit. Must stay within the hardware
    /// maximum.
    pub fn set_current_limit(&mut self, channel: u8, amps: f64) -> Result<(), DeviceError> {
        let idx = Self::channel_index(channel)?;
        if !(amps > 0.0 && amps <= self.max_current) {
            return Err(DeviceError::InvalidCommand(format!(
                "current limit {amps} A outside hardware range 0..={} A",
                self.max_current
            )));
        }
        self.current_limit[idx] = amps;
        Ok(())
    }

    /// Arm the supply for regulation: zero both set values on the active
    /// channel, restore software limits to the hardware maxima, enable the
    /// output.
    pub fn configure(&mut self) -> Result<(), DeviceError> {
        self.voltage_limit = [self.max_voltage; CHANNEL_COUNT as usize];
        self.current_limit = [self.max_current; CHANNEL_COUNT as usize];
        let channel = self.channel;
        self.set_voltage(channel, 0.0)?;
        self.set_current(channel, 0.0)?;
        self.set_output(channel, true)
    }

    /// Drop to a safe state: output off, set values zeroed.
    pub fn stop(&mut self) -> Result<(), DeviceError> {
        let channel = self.channel;
        self.set_output(channel, false)?;
        self.set_voltage(channel, 0.0)?;
        self.set_current(channel, 0.0)
    }

    fn channel_index(channel: u8) -> Result<usize, DeviceError> {
        if (1..=CHANNEL_COUNT).contains(&channel) {
            Ok((channel - 1) as usize)
        } else {
            Err(DeviceError::InvalidCommand(format!(
                "no such channel {channel}"
            )))
        }
    }
}

fn parse_f64(reply: &str) -> Result<f64, DeviceError> {
    reply
        .trim()
        .parse()
        .map_err(|_| DeviceError::InvalidReply(format!("expected a number, got {reply:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;

    fn supply_with(replies: Vec<&str>) -> (PowerSupply<MockTransport>, MockTransport) {
        let mock = MockTransport::new();
        for r in replies {
            mock.push_line(r);
        }
        (PowerSupply::new(mock.clone(), 1, 32.0, 3.3), mock)
    }

    #[test]
    fn idn_queries_and_trims() {
        let (mut supply, mock) = supply_with(vec!["  Siglent SPD3303X,SN123  "]);
        assert_eq!(supply.idn().unwrap(), "Siglent SPD3303X,SN123");
        assert_eq!(mock.sent_text(), "*IDN?\n");
    }

    #[test]
    fn status_word_decodes_channel_bits() {
        let (mut supply, _mock) = supply_with(vec!["0x0010"]);
        let status = supply.status().unwrap();
        assert!(status.channel_on(1));
        assert!(!status.channel_on(2));
    }

    #[test]
    fn status_word_without_prefix() {
        let (mut supply, _mock) = supply_with(vec!["30"]);
        let status = supply.status().unwrap();
        assert!(status.channel_on(1));
        assert!(status.channel_on(2));
    }

    #[test]
    fn set_voltage_formats_command_and_rounds() {
        let (mut supply, mock) = supply_with(vec![]);
        supply.set_voltage(1, 12.3456).unwrap();
        assert_eq!(mock.sent_text(), "CH1:voltage 12.346\n");
    }

    #[test]
    fn set_voltage_above_limit_refused_without_io() {
        let (mut supply, mock) = supply_with(vec![]);
        supply.set_voltage_limit(1, 10.0).unwrap();
        assert!(matches!(
            supply.set_voltage(1, 12.0),
            Err(DeviceError::InvalidCommand(_))
        ));
        assert!(mock.sent_bytes().is_empty());
    }

    #[test]
    fn negative_voltage_refused() {
        let (mut supply, _mock) = supply_with(vec![]);
        assert!(supply.set_voltage(1, -1.0).is_err());
    }

    #[test]
    fn voltage_limit_cannot_exceed_hardware_maximum() {
        let (mut supply, _mock) = supply_with(vec![]);
        assert!(supply.set_voltage_limit(1, 50.0).is_err());
        assert_eq!(supply.voltage_limit(1).unwrap(), 32.0);
    }

    #[test]
    fn configure_zeroes_restores_limits_and_enables_output() {
        let (mut supply, mock) = supply_with(vec![]);
        supply.set_voltage_limit(1, 5.0).unwrap();
        supply.configure().unwrap();

        assert_eq!(supply.voltage_limit(1).unwrap(), 32.0);
        assert_eq!(supply.current_limit(1).unwrap(), 3.3);
        let sent = mock.sent_text();
        assert!(sent.contains("CH1:voltage 0\n"));
        assert!(sent.contains("CH1:current 0\n"));
        assert!(sent.ends_with("Output CH1,ON\n"));
    }

    #[test]
    fn stop_disables_output_then_zeroes() {
        let (mut supply, mock) = supply_with(vec![]);
        supply.stop().unwrap();
        let sent = mock.sent_text();
        assert!(sent.starts_with("Output CH1,OFF\n"));
        assert!(sent.contains("CH1:voltage 0\n"));
        assert!(sent.contains("CH1:current 0\n"));
    }

    #[test]
    fn measured_voltage_parses_reply() {
        let (mut supply, mock) = supply_with(vec!["12.498"]);
        let v = supply.measured_voltage(1).unwrap();
        assert!((v - 12.498).abs() < 1e-12);
        assert_eq!(mock.sent_text(), "measure:voltage? CH1\n");
    }

    #[test]
    fn bad_numeric_reply_is_invalid_reply() {
        let (mut supply, _mock) = supply_with(vec!["whoops"]);
        assert!(matches!(
            supply.requested_voltage(1),
            Err(DeviceError::InvalidReply(_))
        ));
    }

    #[test]
    fn unknown_channel_rejected() {
        let (mut supply, _mock) = supply_with(vec![]);
        assert!(supply.set_output(3, true).is_err());
        assert!(supply.set_active_channel(0).is_err());
        assert!(supply.set_active_channel(2).is_ok());
    }
}
