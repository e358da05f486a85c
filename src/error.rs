//! Custom error types for the T-Cube driver.
//!
//! `TcubeError` is the single error type returned by every layer of the crate,
//! from unit scaling through frame decoding to the device session. Errors fall
//! into three groups:
//!
//! - **Local validation** (`Range`, `InvalidParameter`, `Configuration`): the
//!   caller supplied a value the hardware cannot accept. These are raised before
//!   any byte reaches the wire and are never retried.
//! - **Protocol integrity** (`MalformedFrame`, `Handshake`): the bytes read back
//!   do not have the shape the command catalog expects. The protocol carries no
//!   checksum, so length and message id are the only corruption signals.
//! - **Link** (`NotConnected`, `CommunicationTimeout`, `Io`): the session is not
//!   ready or the transport failed. A timeout may be retried by the caller; the
//!   driver itself never retries.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, TcubeError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum TcubeError {
    #[error("{quantity} {value} out of range [{min}, {max}]")]
    Range {
        quantity: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid parameter {name}: {value}")]
    InvalidParameter { name: &'static str, value: String },

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Handshake failed: hardware info response was {actual} bytes, expected {expected}")]
    Handshake { expected: usize, actual: usize },

    #[error("Device session not connected")]
    NotConnected,

    #[error("No response from device within {0:?}")]
    CommunicationTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl TcubeError {
    pub(crate) fn invalid(name: &'static str, value: impl ToString) -> Self {
        TcubeError::InvalidParameter {
            name,
            value: value.to_string(),
        }
    }
}

impl From<figment::Error> for TcubeError {
    fn from(err: figment::Error) -> Self {
        TcubeError::Config(Box::new(err))
    }
}
