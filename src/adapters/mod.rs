//! Byte-channel adapters.
//!
//! A device session talks to hardware only through the [`Adapter`] trait: a
//! duplex byte pipe with one `write` and one `read`. Framing, timing and
//! validation all live above this layer.

pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock_adapter::{MockAdapter, MockReply};
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialAdapter;

use async_trait::async_trait;
use bytes::Bytes;

/// Abstract duplex byte channel consumed by [`crate::session::DeviceSession`].
#[async_trait]
pub trait Adapter: Send {
    /// Short name used in log output.
    fn name(&self) -> &str;

    /// Write all of `bytes`.
    async fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Read whatever the device has sent.
    ///
    /// Fails on transport errors and when nothing at all is received. An
    /// adapter that gives up waiting reports `ErrorKind::TimedOut`.
    async fn read(&mut self) -> std::io::Result<Bytes>;

    /// Discard any input already received but not yet read.
    ///
    /// Called before every request that expects a reply, so a late answer to
    /// an earlier, timed-out request is never taken for the new one.
    async fn drain(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    /// Release the underlying transport.
    async fn disconnect(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
