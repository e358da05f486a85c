//! Scripted in-memory adapter for tests and dry runs.

use super::Adapter;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One scripted answer to a `read` call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Return these bytes
    Bytes(Vec<u8>),
    /// Never answer; the caller's timeout decides
    Silent,
    /// Fail with this I/O error kind
    Error(io::ErrorKind),
    /// Never answer this read, but leave the bytes buffered as if they arrived
    /// after the caller gave up. The next read returns them unless drained.
    Late(Vec<u8>),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    written: Vec<Vec<u8>>,
    buffered: VecDeque<Vec<u8>>,
    reads: usize,
    drains: usize,
    disconnected: bool,
}

/// Mock adapter that records writes and replays scripted reads.
///
/// Clones share state, so a test can keep one handle for inspection after
/// moving another into a session.
///
/// # Example
///
/// ```
/// use rust_tcube::adapters::MockAdapter;
///
/// let mock = MockAdapter::new();
/// mock.push_bytes(vec![0x61, 0x06, 0x01, 0x00, 0x01, 0x50]);
/// assert!(mock.written().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockAdapter {
    state: Arc<Mutex<MockState>>,
}

impl MockAdapter {
    /// Empty script: every read fails with `UnexpectedEof`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script built from a list of replies.
    pub fn with_replies(replies: impl IntoIterator<Item = MockReply>) -> Self {
        let mock = Self::new();
        mock.lock().replies.extend(replies);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a reply.
    pub fn push_reply(&self, reply: MockReply) {
        self.lock().replies.push_back(reply);
    }

    /// Queue a byte reply.
    pub fn push_bytes(&self, bytes: impl Into<Vec<u8>>) {
        self.push_reply(MockReply::Bytes(bytes.into()));
    }

    /// Every buffer written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Number of `read` calls made.
    pub fn read_count(&self) -> usize {
        self.lock().reads
    }

    /// Number of `drain` calls made.
    pub fn drain_count(&self) -> usize {
        self.lock().drains
    }

    /// Whether `disconnect` has been called.
    pub fn is_disconnected(&self) -> bool {
        self.lock().disconnected
    }
}

#[async_trait]
impl Adapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "mock disconnected"));
        }
        state.written.push(bytes.to_vec());
        Ok(())
    }

    async fn read(&mut self) -> io::Result<Bytes> {
        let reply = {
            let mut state = self.lock();
            state.reads += 1;
            if let Some(stale) = state.buffered.pop_front() {
                return Ok(Bytes::from(stale));
            }
            state.replies.pop_front()
        };
        match reply {
            Some(MockReply::Bytes(bytes)) => Ok(Bytes::from(bytes)),
            Some(MockReply::Late(bytes)) => {
                self.lock().buffered.push_back(bytes);
                std::future::pending().await
            }
            Some(MockReply::Silent) => std::future::pending().await,
            Some(MockReply::Error(kind)) => Err(io::Error::new(kind, "scripted mock failure")),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "mock has no scripted reply",
            )),
        }
    }

    async fn drain(&mut self) -> io::Result<()> {
        let mut state = self.lock();
        state.drains += 1;
        state.buffered.clear();
        Ok(())
    }

    async fn disconnect(&mut self) -> io::Result<()> {
        self.lock().disconnected = true;
        Ok(())
    }
}
