//! Thorlabs KSG101 / TSG001 strain-gauge reader

use crate::adapters::Adapter;
use crate::error::AppResult;
use crate::protocol::frame::Frame;
use crate::session::DeviceSession;

/// Driver for a KSG101 strain-gauge reader.
pub struct Ksg101<A: Adapter> {
    session: DeviceSession<A>,
}

impl<A: Adapter> Ksg101<A> {
    /// Wrap a connected session.
    pub fn new(session: DeviceSession<A>) -> Self {
        Self { session }
    }

    /// Underlying session.
    pub fn session(&self) -> &DeviceSession<A> {
        &self.session
    }

    /// Enable the channel.
    pub async fn enable(&self) -> AppResult<()> {
        self.session.enable_channel().await
    }

    /// Disable the channel.
    pub async fn disable(&self) -> AppResult<()> {
        self.session.disable_channel().await
    }

    /// Zero the gauge at the current extension.
    pub async fn zero(&self) -> AppResult<()> {
        self.session.set_zero().await
    }

    /// Raw status update frame (0x0661).
    pub async fn status(&self) -> AppResult<Frame> {
        self.session.request_status().await
    }

    /// Raw reading frame (0x07DE).
    pub async fn reading(&self) -> AppResult<Frame> {
        self.session.request_reading().await
    }

    /// Release the device.
    pub async fn close(self) -> AppResult<A> {
        self.session.close().await
    }
}
