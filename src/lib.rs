//! Core library for driving Thorlabs T-Cube piezo and strain-gauge
//! controllers over the APT binary protocol.
//!
//! Layers, leaves first:
//!
//! - [`scaling`]: volts / micrometers / gains to device units and back
//! - [`protocol`]: frame codec and command catalog
//! - [`adapters`]: the byte channel a session talks through
//! - [`session`]: handshake, command issue and response validation
//! - [`hardware`]: KPZ101 and KSG101 drivers built on a session

pub mod adapters;
pub mod config;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod protocol;
pub mod scaling;
pub mod session;

pub use error::{AppResult, TcubeError};
pub use session::DeviceSession;
