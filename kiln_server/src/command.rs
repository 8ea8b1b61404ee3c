//! Wire command grammar and dispatch.
//!
//! One command per line, terminated by a carriage return:
//!
//! ```text
//! NAMESPACE:FIELD[ ARGUMENT]\r
//! ```
//!
//! Namespaces: `PS` (power supply), `DQ` (temperature probe), `PD`
//! (controller). An argument of `?` — or no argument — reads the current
//! value; anything else writes it. Replies are the stringified value,
//! terminated by the same `\r` (appended by the session layer).
//!
//! Failure behavior is part of the protocol: a missing terminator or an
//! unparseable argument is reported back as an error line and the session
//! continues; an unknown `(namespace, field)` pair answers with the
//! literal `ERROR: bad command<cmd>` string. Nothing here ever closes the
//! connection.

use crate::control::PidState;
use crate::state::ControlState;
use kiln_common::error::{CommandError, DeviceError};
use kiln_devices::probe::{TempProbe, TempUnit};
use kiln_devices::supply::PowerSupply;
use kiln_devices::transport::Transport;
use tracing::{debug, warn};

/// Line terminator of the wire protocol.
pub const TERMINATOR: char = '\r';

/// Argument marking a read of the current value.
pub const QUERY_MARKER: &str = "?";

/// One parsed command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command<'a> {
    /// Device namespace (`PS`, `DQ`, `PD`).
    pub namespace: &'a str,
    /// Field within the namespace.
    pub field: &'a str,
    /// Optional argument; `?` or absent denotes a read.
    pub argument: Option<&'a str>,
}

/// Parse one wire line into a [`Command`].
///
/// # Errors
/// `CommandError::InvalidCommand` if the terminator is missing, the line
/// is empty, or it carries more than two tokens. Nothing is dispatched —
/// and no state is mutated — for a line that fails here.
pub fn parse(line: &str) -> Result<Command<'_>, CommandError> {
    let Some(body) = line.strip_suffix(TERMINATOR) else {
        return Err(CommandError::InvalidCommand(line.to_string()));
    };

    let mut tokens = body.split_whitespace();
    let head = tokens
        .next()
        .ok_or_else(|| CommandError::InvalidCommand(line.to_string()))?;
    let argument = tokens.next();
    if tokens.next().is_some() {
        return Err(CommandError::InvalidCommand(line.to_string()));
    }

    let (namespace, field) = head.split_once(':').unwrap_or((head, ""));
    Ok(Command {
        namespace,
        field,
        argument,
    })
}

/// Parse, dispatch, and render every failure as a wire-ready error line.
///
/// This is the session layer's single entry point: the returned string
/// (if any) goes back to the client verbatim, terminator appended.
pub fn service_line<S: Transport, P: Transport>(
    line: &str,
    state: &mut ControlState,
    pid: &mut PidState,
    supply: &mut PowerSupply<S>,
    probe: &mut TempProbe<P>,
) -> Option<String> {
    match parse(line) {
        Ok(cmd) => match execute(&cmd, state, pid, supply, probe) {
            Ok(reply) => reply,
            Err(e) => Some(e.to_string()),
        },
        Err(e) => Some(e.to_string()),
    }
}

/// Dispatch one parsed command to its handler.
///
/// Handlers that touch a device run the device's protocol call
/// synchronously; those calls are bounded by the transport timeout, so a
/// dead instrument delays the loop, never hangs it. Device failures are
/// rendered into the reply (`Ok(Some("ERROR: ..."))`) rather than raised:
/// per the error taxonomy they must not tear down the session.
///
/// # Errors
/// `CommandError::InvalidArgument` for unparseable or out-of-range write
/// values. The caller reports it on the wire and carries on.
pub fn execute<S: Transport, P: Transport>(
    cmd: &Command<'_>,
    state: &mut ControlState,
    pid: &mut PidState,
    supply: &mut PowerSupply<S>,
    probe: &mut TempProbe<P>,
) -> Result<Option<String>, CommandError> {
    debug!(namespace = cmd.namespace, field = cmd.field, argument = ?cmd.argument, "dispatch");
    let channel = supply.active_channel();

    let reply = match (cmd.namespace, cmd.field) {
        // ── Power supply ────────────────────────────────────────────
        ("PS", "IDN") => report(supply.idn()),
        ("PS", "RSET") => report_action(supply.configure()),
        ("PS", "STOP") => report_action(supply.stop()),
        ("PS", "REDY") => report_action(supply.configure()),
        ("PS", "VOLT") => match write_arg(cmd) {
            None => report(supply.measured_voltage(channel)),
            Some(arg) => report_action(supply.set_voltage(channel, parse_num(arg)?)),
        },
        ("PS", "VSET") => match write_arg(cmd) {
            None => report(supply.requested_voltage(channel)),
            Some(arg) => report_action(supply.set_voltage(channel, parse_num(arg)?)),
        },
        ("PS", "AMPS") => match write_arg(cmd) {
            None => report(supply.measured_current(channel)),
            Some(arg) => report_action(supply.set_current(channel, parse_num(arg)?)),
        },
        ("PS", "ASET") => match write_arg(cmd) {
            None => report(supply.requested_current(channel)),
            Some(arg) => report_action(supply.set_current(channel, parse_num(arg)?)),
        },
        ("PS", "VLIM") => match write_arg(cmd) {
            None => report(supply.voltage_limit(channel)),
            Some(arg) => report_action(supply.set_voltage_limit(channel, parse_num(arg)?)),
        },
        ("PS", "ALIM") => match write_arg(cmd) {
            None => report(supply.current_limit(channel)),
            Some(arg) => report_action(supply.set_current_limit(channel, parse_num(arg)?)),
        },
        ("PS", "CHIO") => match write_arg(cmd) {
            None => report(supply.channel_is_on(channel).map(u8::from)),
            Some(arg) => report_action(supply.set_output(channel, parse_switch(arg)?)),
        },
        ("PS", "CHAN") => match write_arg(cmd) {
            None => Some(channel.to_string()),
            Some(arg) => {
                let n: u8 = arg
                    .parse()
                    .map_err(|_| CommandError::InvalidArgument(arg.to_string()))?;
                report_action(supply.set_active_channel(n))
            }
        },

        // ── Temperature probe ───────────────────────────────────────
        ("DQ", "IDN") => report(probe.identity()),
        ("DQ", "TEMP") => report(probe.temperature()),
        ("DQ", "UNIT") => match write_arg(cmd) {
            None => Some(probe.unit().to_string()),
            Some(arg) => {
                let unit = TempUnit::from_symbol(arg)
                    .ok_or_else(|| CommandError::InvalidArgument(arg.to_string()))?;
                probe.set_unit(unit);
                None
            }
        },

        // ── Controller ──────────────────────────────────────────────
        ("PD", "IDN") => Some(format!(
            "PID(kp={}, ki={}, kd={})",
            state.gains.kp, state.gains.ki, state.gains.kd
        )),
        ("PD", "KPRO") => match write_arg(cmd) {
            None => Some(state.gains.kp.to_string()),
            Some(arg) => {
                state.gains.kp = parse_num(arg)?;
                None
            }
        },
        ("PD", "KINT") => match write_arg(cmd) {
            None => Some(state.gains.ki.to_string()),
            Some(arg) => {
                state.gains.ki = parse_num(arg)?;
                None
            }
        },
        ("PD", "KDER") => match write_arg(cmd) {
            None => Some(state.gains.kd.to_string()),
            Some(arg) => {
                state.gains.kd = parse_num(arg)?;
                None
            }
        },
        ("PD", "SETP") => match write_arg(cmd) {
            None => Some(state.set_point.to_string()),
            Some(arg) => {
                state.set_point = parse_num(arg)?;
                None
            }
        },
        ("PD", "SAMP") => match write_arg(cmd) {
            None => Some(state.sample_period.as_secs_f64().to_string()),
            Some(arg) => {
                let seconds = parse_num(arg)?;
                if !state.set_sample_period(seconds) {
                    return Err(CommandError::InvalidArgument(arg.to_string()));
                }
                None
            }
        },
        ("PD", "REGT") => match write_arg(cmd) {
            None => Some(u8::from(state.regulating).to_string()),
            Some(arg) => {
                if parse_switch(arg)? {
                    // Arm the supply before closing the loop; if the
                    // device refuses, regulation stays off.
                    match supply.configure() {
                        Ok(()) => {
                            pid.reset();
                            state.last_sample_time = None;
                            state.regulating = true;
                            None
                        }
                        Err(e) => {
                            warn!("cannot arm supply for regulation: {e}");
                            Some(format!("ERROR: {e}"))
                        }
                    }
                } else {
                    state.regulating = false;
                    pid.reset();
                    None
                }
            }
        },

        // ── Unknown ─────────────────────────────────────────────────
        _ => {
            let head = if cmd.field.is_empty() {
                cmd.namespace.to_string()
            } else {
                format!("{}:{}", cmd.namespace, cmd.field)
            };
            Some(format!("ERROR: bad command{head}"))
        }
    };

    Ok(reply)
}

/// `None` for a read (argument absent or `?`), `Some(arg)` for a write.
fn write_arg<'a>(cmd: &Command<'a>) -> Option<&'a str> {
    match cmd.argument {
        None | Some(QUERY_MARKER) => None,
        Some(arg) => Some(arg),
    }
}

fn parse_num(arg: &str) -> Result<f64, CommandError> {
    let value: f64 = arg
        .parse()
        .map_err(|_| CommandError::InvalidArgument(arg.to_string()))?;
    if !value.is_finite() {
        return Err(CommandError::InvalidArgument(arg.to_string()));
    }
    Ok(value)
}

fn parse_switch(arg: &str) -> Result<bool, CommandError> {
    match arg {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(CommandError::InvalidArgument(arg.to_string())),
    }
}

fn report<T: std::fmt::Display>(result: Result<T, DeviceError>) -> Option<String> {
    match result {
        Ok(value) => Some(value.to_string()),
        Err(e) => {
            warn!("device query failed: {e}");
            Some(format!("ERROR: {e}"))
        }
    }
}

fn report_action(result: Result<(), DeviceError>) -> Option<String> {
    match result {
        Ok(()) => None,
        Err(e) => {
            warn!("device command failed: {e}");
            Some(format!("ERROR: {e}"))
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────
