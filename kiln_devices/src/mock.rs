//! In-memory transport double.
//!
//! Lets every protocol layer (and the server on top) run against scripted
//! device traffic with no hardware and no sockets. The handle is a shared
//! reference: clone it, hand one copy to the driver under test, keep the
//! other to script replies and inspect what was sent.
//!
//! An empty reply chunk models a timed-out read (the transport contract's
//! "nothing arrived in time").

use crate::transport::Transport;
use kiln_common::error::DeviceError;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Debug, Default)]
struct Inner {
    sent: Vec<u8>,
    calls: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
}

/// Scripted [`Transport`] for tests.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Rc<RefCell<Inner>>,
}

impl MockTransport {
    /// Empty script: every read times out, writes are logged.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-script a sequence of reply chunks, one per `recv` call.
    pub fn with_replies(replies: Vec<Vec<u8>>) -> Self {
        let mock = Self::new();
        for r in replies {
            mock.inner.borrow_mut().replies.push_back(r);
        }
        mock
    }

    /// Queue one reply chunk.
    pub fn push_reply(&self, bytes: &[u8]) {
        self.inner.borrow_mut().replies.push_back(bytes.to_vec());
    }

    /// Queue a timed-out read (a read that returns nothing).
    pub fn push_silence(&self) {
        self.inner.borrow_mut().replies.push_back(Vec::new());
    }

    /// Queue a newline-terminated text reply (SCPI style).
    pub fn push_line(&self, line: &str) {
        self.push_reply(format!("{line}\n").as_bytes());
    }

    /// Everything written so far, flattened.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.inner.borrow().sent.clone()
    }

    /// Everything written so far, one entry per `send` call.
    pub fn sent_calls(&self) -> Vec<Vec<u8>> {
        self.inner.borrow().calls.clone()
    }

    /// Everything written so far, as lossy UTF-8.
    pub fn sent_text(&self) -> String {
        String::from_utf8_lossy(&self.inner.borrow().sent).to_string()
    }

    /// Forget the write log (keeps pending replies).
    pub fn clear_sent(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.sent.clear();
        inner.calls.clear();
    }
}

impl Transport for MockTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), DeviceError> {
        let mut inner = self.inner.borrow_mut();
        inner.sent.extend_from_slice(bytes);
        inner.calls.push(bytes.to_vec());
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, DeviceError> {
        let mut inner = self.inner.borrow_mut();
        match inner.replies.pop_front() {
            None => Ok(0),
            Some(chunk) => {
                let n = chunk.len().min(buf.len());
                buf[..n].copy_from_slice(&chunk[..n]);
                // Bytes that did not fit stay queued for the next read.
                if n < chunk.len() {
                    inner.replies.push_front(chunk[n..].to_vec());
                }
                Ok(n)
            }
        }
    }
}
