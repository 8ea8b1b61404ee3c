//! # kiln Device Layer
//!
//! Protocol drivers for the two instruments the regulation server talks to:
//!
//! - A temperature probe speaking a framed, acknowledgment-based binary
//!   protocol over an ordered byte stream ([`channel`], [`decode`],
//!   [`probe`]).
//! - A bench power supply speaking line-oriented SCPI ([`supply`]).
//!
//! Both compose over the [`transport::Transport`] capability trait, so the
//! same driver code runs against a live TCP link or an in-memory test
//! double. Every read on a transport carries a bounded timeout; nothing in
//! this crate blocks indefinitely.

pub mod channel;
pub mod decode;
pub mod frame;
pub mod mock;
pub mod probe;
pub mod supply;
pub mod transport;

pub use transport::{TcpTransport, Transport};
