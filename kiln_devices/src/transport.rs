//! Byte-stream transport capability.
//!
//! Device protocols (framed probe, SCPI supply) compose over [`Transport`]
//! instead of owning a socket type, so the protocol layers can be exercised
//! against in-memory doubles and the wire code stays in one place.
//!
//! Contract: `recv` returns whatever arrived within the transport's bounded
//! timeout — possibly zero bytes. It never blocks indefinitely. Timeouts are
//! NOT errors at this layer; short data is the caller's signal to retry.

use kiln_common::error::DeviceError;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// An ordered, reliable byte stream with bounded-timeout reads.
pub trait Transport {
    /// Write all bytes to the link.
    ///
    /// # Errors
    /// `DeviceError::Transport` on any I/O failure.
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError>;

    /// Read up to `buf.len()` bytes, waiting at most the transport's
    /// configured timeout. Returns the number of bytes read; `0` means
    /// nothing arrived in time.
    ///
    /// # Errors
    /// `DeviceError::Transport` on I/O failures other than a timeout.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError>;

    /// Read exactly `buf.len()` bytes, or fewer if the link goes quiet.
    ///
    /// Loops over `recv` until the buffer is full or a read returns
    /// nothing. Returns the number of bytes actually collected, so a
    /// short count marks a timed-out exchange rather than an error.
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.recv(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

/// TCP-backed transport with a per-call read timeout.
///
/// Both lab instruments are ethernet-attached (the probe through a
/// serial-to-ethernet bridge), so TCP is the only concrete transport.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `addr` and apply `timeout` to reads and writes.
    ///
    /// # Errors
    /// `DeviceError::Transport` if the connection or socket setup fails.
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self, DeviceError> {
        let stream = TcpStream::connect(addr)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Wrap an already-connected stream (timeouts must be set by the caller).
    pub fn from_stream(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        match self.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                Ok(0)
            }
            Err(e) => Err(DeviceError::Transport(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted transport: pops canned reply chunks in order.
    struct Scripted {
        replies: Vec<Vec<u8>>,
    }

    impl Transport for Scripted {
        fn send(&mut self, _bytes: &[u8]) -> Result<(), DeviceError> {
            Ok(())
        }

        fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
            if self.replies.is_empty() {
                return Ok(0);
            }
            let chunk = self.replies.remove(0);
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            Ok(n)
        }
    }

    #[test]
    fn recv_exact_assembles_fragments() {
        let mut t = Scripted {
            replies: vec![vec![1, 2], vec![3], vec![4, 5, 6]],
        };
        let mut buf = [0u8; 6];
        let n = t.recv_exact(&mut buf).unwrap();
        assert_eq!(n, 6);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn recv_exact_reports_short_read_on_quiet_link() {
        let mut t = Scripted {
            replies: vec![vec![1, 2]],
        };
        let mut buf = [0u8; 6];
        let n = t.recv_exact(&mut buf).unwrap();
        assert_eq!(n, 2);
    }
}
