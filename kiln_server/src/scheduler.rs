//! Cooperative control scheduler and client session loop.
//!
//! One thread, one loop. Every pass runs the control tick first, then
//! services at most one pending command line — that order is fixed and is
//! the only arbitration between the two mutators of [`ControlState`].
//! Nothing in the loop blocks without a bound: the client socket is
//! polled non-blocking, device calls ride the transport's read timeout.
//!
//! A control step executes only once per elapsed `sample_period`. A device
//! failure inside a step is logged and the step is skipped for that tick;
//! regulation resumes at the next period boundary. While regulation is
//! off the tick instead forces the actuator command to zero, issuing the
//! supply write once on the non-zero edge so the device link is not
//! flooded with identical writes.

use crate::command::{self, TERMINATOR};
use crate::control::{PidState, pid_compute};
use crate::state::ControlState;
use kiln_common::error::{CommandError, DeviceError};
use kiln_devices::probe::TempProbe;
use kiln_devices::supply::PowerSupply;
use kiln_devices::transport::Transport;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Longest accepted command line. Anything longer with no terminator in
/// sight is rejected as an invalid command and the buffer dropped.
const MAX_LINE: usize = 256;

/// Pause inserted when a pass had nothing to do, bounding CPU spin.
const IDLE_BACKOFF: Duration = Duration::from_millis(5);

// ─── Client port ────────────────────────────────────────────────────

/// Outcome of one non-blocking poll of the client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRead {
    /// `n` bytes arrived.
    Bytes(usize),
    /// Nothing pending right now.
    Idle,
    /// The client hung up (zero-length read).
    Closed,
}

/// Non-blocking view of the remote command connection.
///
/// The scheduler never owns a socket type directly; it polls whatever
/// implements this, so the session loop runs unchanged against a TCP
/// client or a scripted double in tests.
pub trait CommandPort {
    /// Poll for inbound bytes. Must not block beyond the port's own
    /// configured bound.
    ///
    /// # Errors
    /// Transport-level failure on the control connection. Ends the
    /// session.
    fn poll(&mut self, buf: &mut [u8]) -> std::io::Result<PortRead>;

    /// Write one reply line; the terminator is appended here.
    ///
    /// # Errors
    /// Transport-level failure on the control connection.
    fn reply(&mut self, line: &str) -> std::io::Result<()>;
}

/// The stream must be in non-blocking mode (`set_nonblocking(true)`);
/// the accept path in `main` takes care of that.
impl CommandPort for TcpStream {
    fn poll(&mut self, buf: &mut [u8]) -> std::io::Result<PortRead> {
        match self.read(buf) {
            Ok(0) => Ok(PortRead::Closed),
            Ok(n) => Ok(PortRead::Bytes(n)),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(PortRead::Idle),
            Err(e) => Err(e),
        }
    }

    fn reply(&mut self, line: &str) -> std::io::Result<()> {
        let mut out = String::with_capacity(line.len() + 1);
        out.push_str(line);
        out.push(TERMINATOR);
        self.write_all(out.as_bytes())
    }
}

// ─── Loop statistics ────────────────────────────────────────────────

/// Per-session loop statistics. O(1) updates, no allocation.
#[derive(Debug, Clone, Default)]
pub struct LoopStats {
    /// Control steps completed.
    pub steps: u64,
    /// Control steps skipped after a device failure.
    pub steps_failed: u64,
    /// Command lines serviced.
    pub commands: u64,
    /// Longest control step observed [µs].
    pub max_step_us: u64,
}

impl LoopStats {
    #[inline]
    fn record_step(&mut self, elapsed: Duration) {
        self.steps += 1;
        let us = elapsed.as_micros() as u64;
        if us > self.max_step_us {
            self.max_step_us = us;
        }
    }
}

// ─── Regulator ──────────────────────────────────────────────────────

/// How a client session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The remote client disconnected; the server goes back to accept.
    Disconnected,
    /// Shutdown was requested while the session was live.
    ShuttingDown,
}

/// The heater assembly: control state, PID, and both instruments, all
/// owned by the one scheduler loop.
///
/// `ControlState` is passed by exclusive reference into every handler
/// and step call from here; nothing else ever holds it.
pub struct Regulator<S: Transport, P: Transport> {
    /// Shared control state.
    pub state: ControlState,
    /// PID internal state, reset whenever regulation is re-armed.
    pub pid: PidState,
    /// Heater power supply.
    pub supply: PowerSupply<S>,
    /// Temperature probe.
    pub probe: TempProbe<P>,
    /// Loop statistics.
    pub stats: LoopStats,
    /// A supply write still owed by the idle zero-forcing path.
    zero_owed: bool,
}

impl<S: Transport, P: Transport> Regulator<S, P> {
    /// Assemble a regulator. Regulation is expected to start disabled.
    pub fn new(state: ControlState, supply: PowerSupply<S>, probe: TempProbe<P>) -> Self {
        Self {
            state,
            pid: PidState::default(),
            supply,
            probe,
            stats: LoopStats::default(),
            zero_owed: false,
        }
    }

    /// One control tick.
    ///
    /// Regulating: runs a control step if `sample_period` has elapsed
    /// since the last one. Not regulating: forces the actuator command to
    /// zero, writing to the supply only on the non-zero edge.
    pub fn tick(&mut self, now: Instant) {
        if !self.state.regulating {
            self.force_idle_output();
            return;
        }
        if !self.state.step_due(now) {
            return;
        }

        // Stamp before the step so a failed one waits out a full period
        // instead of retrying on the very next pass.
        self.state.last_sample_time = Some(now);
        let started = Instant::now();
        match self.control_step() {
            Ok(()) => self.stats.record_step(started.elapsed()),
            Err(e) => {
                self.stats.steps_failed += 1;
                warn!("control step failed, skipping this tick: {e}");
            }
        }
    }

    /// Sample → compute → actuate.
    fn control_step(&mut self) -> Result<(), DeviceError> {
        let celsius = self.probe.temperature_celsius()?;
        let error = self.state.set_point - celsius;
        let dt = self.state.sample_period.as_secs_f64();
        let output = pid_compute(&mut self.pid, &self.state.gains, error, dt);

        let channel = self.supply.active_channel();
        self.supply.set_voltage(channel, output)?;
        self.zero_owed = true;

        self.state.last_temperature = celsius;
        self.state.actuator_command = output;
        trace!(celsius, output, "control step");
        Ok(())
    }

    fn force_idle_output(&mut self) {
        self.state.actuator_command = 0.0;
        if self.zero_owed {
            let channel = self.supply.active_channel();
            match self.supply.set_voltage(channel, 0.0) {
                Ok(()) => self.zero_owed = false,
                Err(e) => warn!("failed to zero supply output: {e}"),
            }
        }
    }

    /// Drive one client session until it disconnects or shutdown is
    /// requested.
    ///
    /// Pass order is fixed: control tick, then poll, then at most one
    /// complete command line. A pending command is therefore answered
    /// within one loop pass of arriving, delayed at worst by a single
    /// control step.
    ///
    /// # Errors
    /// Only transport-level failures on the control connection itself;
    /// command and device errors are rendered into reply lines.
    pub fn run_session<C: CommandPort>(
        &mut self,
        port: &mut C,
        running: &AtomicBool,
    ) -> std::io::Result<SessionEnd> {
        let mut inbound: Vec<u8> = Vec::with_capacity(MAX_LINE);
        let mut chunk = [0u8; 256];
        info!("session started");

        while running.load(Ordering::SeqCst) {
            self.tick(Instant::now());

            let got = match port.poll(&mut chunk)? {
                PortRead::Closed => {
                    info!(stats = ?self.stats, "client disconnected");
                    return Ok(SessionEnd::Disconnected);
                }
                PortRead::Idle => 0,
                PortRead::Bytes(n) => {
                    inbound.extend_from_slice(&chunk[..n]);
                    n
                }
            };

            match take_line(&mut inbound) {
                Some(line) => {
                    self.stats.commands += 1;
                    debug!(line = line.trim_end(), "servicing command");
                    let reply = command::service_line(
                        &line,
                        &mut self.state,
                        &mut self.pid,
                        &mut self.supply,
                        &mut self.probe,
                    );
                    if let Some(reply) = reply {
                        port.reply(&reply)?;
                    }
                }
                None if inbound.len() > MAX_LINE => {
                    // A terminator is never coming; reject the stream the
                    // same way an unterminated command is rejected.
                    let garbage = String::from_utf8_lossy(&inbound).into_owned();
                    inbound.clear();
                    port.reply(&CommandError::InvalidCommand(garbage).to_string())?;
                }
                None if got == 0 => std::thread::sleep(IDLE_BACKOFF),
                None => {}
            }
        }

        info!(stats = ?self.stats, "shutdown requested, ending session");
        Ok(SessionEnd::ShuttingDown)
    }
}

/// Split the first terminated line (terminator included) out of `buf`.
fn take_line(buf: &mut Vec<u8>) -> Option<String> {
    let pos = buf.iter().position(|&b| b == TERMINATOR as u8)?;
    let line: Vec<u8> = buf.drain(..=pos).collect();
    Some(String::from_utf8_lossy(&line).into_owned())
}

// ─── Tests ──────────────────────────────────────────────────────────
