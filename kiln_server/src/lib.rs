//! # kiln Regulation Server Library
//!
//! The heater's brain: a single-threaded cooperative loop that interleaves
//! periodic temperature-control steps with non-blocking servicing of a
//! line-oriented remote command protocol.
//!
//! ## Structure
//!
//! - [`state`] — the one shared `ControlState`, owned by the scheduler.
//! - [`control`] — the PID control law.
//! - [`command`] — wire grammar parsing and the dispatch table.
//! - [`scheduler`] — the assembly (devices + state) and the session loop.
//!
//! ## Concurrency model
//!
//! There is exactly one thread of execution. Nothing blocks without a
//! bound: the client socket is non-blocking, device links carry per-call
//! timeouts. All mutation of `ControlState` happens inside one loop
//! iteration's synchronous call chain, so single-threadedness is the only
//! concurrency control needed.

pub mod command;
pub mod control;
pub mod scheduler;
pub mod state;
