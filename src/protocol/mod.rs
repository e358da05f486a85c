//! APT binary protocol: frame codec, command catalog and response decoders.

pub mod catalog;
pub mod frame;
pub mod hw_info;

pub use catalog::{Command, ControlMode, Direction, FeedbackSource, InputSource, ResponseShape};
pub use frame::Frame;
pub use hw_info::HardwareInfo;

use serde::{Deserialize, Serialize};

/// Routing triple for one addressed sub-unit on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    /// Destination unit id (0x50 for a T-Cube's generic USB unit)
    #[serde(default = "default_destination")]
    pub destination: u8,
    /// Host id
    #[serde(default = "default_source")]
    pub source: u8,
    /// Channel number
    #[serde(default = "default_channel")]
    pub channel: u8,
}

fn default_destination() -> u8 {
    0x50
}

fn default_source() -> u8 {
    0x01
}

fn default_channel() -> u8 {
    1
}

impl Default for Address {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            source: default_source(),
            channel: default_channel(),
        }
    }
}
