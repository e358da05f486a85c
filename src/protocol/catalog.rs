//! Supported APT commands and their wire layouts.
//!
//! | Command | Id | Form | Response |
//! |---|---|---|---|
//! | `HW_REQ_INFO` | 0x0005 | scalar | 90-byte `HW_GET_INFO` |
//! | `PZ_SET_TPZ_IOSETTINGS` | 0x07D4 | 10-byte payload | none |
//! | `PZ_SET_INPUTVOLTSSRC` | 0x0652 | 4-byte payload | none |
//! | `MOD_SET_CHANENABLESTATE` | 0x0210 | scalar | none |
//! | `PZ_SET_POSCONTROLMODE` | 0x0640 | scalar | none |
//! | `PZ_SET_OUTPUTVOLTS` | 0x0643 | 4-byte payload | none |
//! | `PZ_SET_OUTPUTPOS` | 0x0646 | 4-byte payload | none |
//! | `PZ_SET_PICONSTS` | 0x0655 | 6-byte payload | none |
//! | `PZ_SET_ZERO` | 0x0658 | scalar | none |
//! | `PZ_REQ_PZSTATUSUPDATE` | 0x0660 | scalar | `PZ_GET_PZSTATUSUPDATE` (0x0661) |
//! | `PZ_REQ_TSG_READING` | 0x07DD | scalar | `PZ_GET_TSG_READING` (0x07DE) |

use super::frame::Frame;
use super::Address;
use crate::error::{AppResult, TcubeError};
use crate::scaling::MaxVoltage;
use bytes::{BufMut, BytesMut};
use std::fmt;

/// Message identifiers used by this driver.
#[allow(missing_docs)]
pub mod msg {
    pub const HW_REQ_INFO: u16 = 0x0005;
    pub const HW_GET_INFO: u16 = 0x0006;
    pub const MOD_SET_CHANENABLESTATE: u16 = 0x0210;
    pub const PZ_SET_POSCONTROLMODE: u16 = 0x0640;
    pub const PZ_SET_OUTPUTVOLTS: u16 = 0x0643;
    pub const PZ_SET_OUTPUTPOS: u16 = 0x0646;
    pub const PZ_SET_INPUTVOLTSSRC: u16 = 0x0652;
    pub const PZ_SET_PICONSTS: u16 = 0x0655;
    pub const PZ_SET_ZERO: u16 = 0x0658;
    pub const PZ_REQ_PZSTATUSUPDATE: u16 = 0x0660;
    pub const PZ_GET_PZSTATUSUPDATE: u16 = 0x0661;
    pub const PZ_SET_TPZ_IOSETTINGS: u16 = 0x07D4;
    pub const PZ_REQ_TSG_READING: u16 = 0x07DD;
    pub const PZ_GET_TSG_READING: u16 = 0x07DE;
}

/// Length of the `HW_GET_INFO` response, header included.
pub const HW_INFO_RESPONSE_LEN: usize = 90;

/// Whether a command expects a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Written and forgotten; the device sends no acknowledgement
    FireAndForget,
    /// Written, then one response frame is read back
    Query,
}

/// What a query's response must look like.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// No response
    None,
    /// Exactly this many bytes
    Fixed(usize),
    /// A frame carrying this message id, device-defined length
    Message(u16),
}

/// Feedback signal routing for closed-loop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackSource {
    /// Feedback runs through all hub bays
    HubAnalogueInA,
    /// Feedback runs between adjacent bay pairs (1&2, 3&4, 5&6)
    HubAnalogueInB,
    /// Feedback through the rear-panel SMA connectors
    ExternalSma,
}

impl FeedbackSource {
    /// Wire code.
    pub fn code(self) -> u16 {
        match self {
            FeedbackSource::HubAnalogueInA => 0x01,
            FeedbackSource::HubAnalogueInB => 0x02,
            FeedbackSource::ExternalSma => 0x03,
        }
    }
}

impl TryFrom<u8> for FeedbackSource {
    type Error = TcubeError;

    fn try_from(code: u8) -> AppResult<Self> {
        match code {
            0x01 => Ok(FeedbackSource::HubAnalogueInA),
            0x02 => Ok(FeedbackSource::HubAnalogueInB),
            0x03 => Ok(FeedbackSource::ExternalSma),
            other => Err(TcubeError::invalid("feedback source", format!("{other:#04x}"))),
        }
    }
}

/// Analog input summed into the HV amplifier output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    /// Software set-point only
    Software,
    /// Software plus the rear-panel EXT IN differential signal
    External,
    /// Software plus the potentiometer
    Potentiometer,
    /// Software plus both external and potentiometer inputs
    ExternalAndPotentiometer,
}

impl InputSource {
    /// Wire code.
    pub fn code(self) -> u16 {
        match self {
            InputSource::Software => 0x00,
            InputSource::External => 0x01,
            InputSource::Potentiometer => 0x02,
            InputSource::ExternalAndPotentiometer => 0x03,
        }
    }
}

impl TryFrom<u8> for InputSource {
    type Error = TcubeError;

    fn try_from(code: u8) -> AppResult<Self> {
        match code {
            0x00 => Ok(InputSource::Software),
            0x01 => Ok(InputSource::External),
            0x02 => Ok(InputSource::Potentiometer),
            0x03 => Ok(InputSource::ExternalAndPotentiometer),
            other => Err(TcubeError::invalid("input source", format!("{other:#04x}"))),
        }
    }
}

/// Position control loop mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    /// No feedback
    OpenLoop,
    /// Feedback employed
    ClosedLoop,
    /// Open loop with smoothed transitions
    OpenLoopSmooth,
    /// Closed loop with smoothed transitions
    ClosedLoopSmooth,
}

impl ControlMode {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            ControlMode::OpenLoop => 0x01,
            ControlMode::ClosedLoop => 0x02,
            ControlMode::OpenLoopSmooth => 0x03,
            ControlMode::ClosedLoopSmooth => 0x04,
        }
    }

    /// Whether position set-points are honoured in this mode.
    pub fn is_closed_loop(self) -> bool {
        matches!(self, ControlMode::ClosedLoop | ControlMode::ClosedLoopSmooth)
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = TcubeError;

    fn try_from(code: u8) -> AppResult<Self> {
        match code {
            0x01 => Ok(ControlMode::OpenLoop),
            0x02 => Ok(ControlMode::ClosedLoop),
            0x03 => Ok(ControlMode::OpenLoopSmooth),
            0x04 => Ok(ControlMode::ClosedLoopSmooth),
            other => Err(TcubeError::invalid("control mode", format!("{other:#04x}"))),
        }
    }
}

/// One catalog entry, already carrying validated device-unit arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Command {
    RequestHardwareInfo,
    SetIoSettings {
        limit: MaxVoltage,
        feedback: FeedbackSource,
    },
    SetInputSource(InputSource),
    SetChannelEnable(bool),
    SetControlMode(ControlMode),
    SetOutputVoltage(i16),
    SetOutputPosition(i16),
    SetPiGains {
        proportional: u8,
        integral: u8,
    },
    SetZero,
    RequestStatus,
    RequestReading,
}

impl Command {
    /// Message id written on the wire.
    pub fn message_id(&self) -> u16 {
        match self {
            Command::RequestHardwareInfo => msg::HW_REQ_INFO,
            Command::SetIoSettings { .. } => msg::PZ_SET_TPZ_IOSETTINGS,
            Command::SetInputSource(_) => msg::PZ_SET_INPUTVOLTSSRC,
            Command::SetChannelEnable(_) => msg::MOD_SET_CHANENABLESTATE,
            Command::SetControlMode(_) => msg::PZ_SET_POSCONTROLMODE,
            Command::SetOutputVoltage(_) => msg::PZ_SET_OUTPUTVOLTS,
            Command::SetOutputPosition(_) => msg::PZ_SET_OUTPUTPOS,
            Command::SetPiGains { .. } => msg::PZ_SET_PICONSTS,
            Command::SetZero => msg::PZ_SET_ZERO,
            Command::RequestStatus => msg::PZ_REQ_PZSTATUSUPDATE,
            Command::RequestReading => msg::PZ_REQ_TSG_READING,
        }
    }

    /// Expected reply.
    pub fn response(&self) -> ResponseShape {
        match self {
            Command::RequestHardwareInfo => ResponseShape::Fixed(HW_INFO_RESPONSE_LEN),
            Command::RequestStatus => ResponseShape::Message(msg::PZ_GET_PZSTATUSUPDATE),
            Command::RequestReading => ResponseShape::Message(msg::PZ_GET_TSG_READING),
            _ => ResponseShape::None,
        }
    }

    /// Fire-and-forget or query.
    pub fn direction(&self) -> Direction {
        match self.response() {
            ResponseShape::None => Direction::FireAndForget,
            _ => Direction::Query,
        }
    }

    /// Build the frame for this command addressed to `address`.
    pub fn to_frame(&self, address: &Address) -> AppResult<Frame> {
        let id = self.message_id();
        let dest = address.destination;
        let src = address.source;
        let channel = address.channel;
        let scalar = |param2: u8| Frame::scalar(id, channel, param2, dest, src);

        let mut data = BytesMut::with_capacity(10);
        data.put_u16_le(u16::from(channel));
        match *self {
            Command::RequestHardwareInfo => return Ok(Frame::scalar(id, 0x00, 0x00, dest, src)),
            Command::SetChannelEnable(enabled) => {
                return Ok(scalar(if enabled { 0x01 } else { 0x02 }))
            }
            Command::SetControlMode(mode) => return Ok(scalar(mode.code())),
            Command::SetZero | Command::RequestStatus | Command::RequestReading => {
                return Ok(scalar(0x00))
            }
            Command::SetIoSettings { limit, feedback } => {
                data.put_u16_le(limit.code());
                data.put_u16_le(feedback.code());
                data.put_u16_le(0);
                data.put_u16_le(0);
            }
            Command::SetInputSource(source) => data.put_u16_le(source.code()),
            Command::SetOutputVoltage(units) | Command::SetOutputPosition(units) => {
                data.put_i16_le(units)
            }
            Command::SetPiGains {
                proportional,
                integral,
            } => {
                data.put_u16_le(u16::from(proportional));
                data.put_u16_le(u16::from(integral));
            }
        }
        Frame::with_data(id, dest, src, data.freeze())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::RequestHardwareInfo => "HW_REQ_INFO",
            Command::SetIoSettings { .. } => "PZ_SET_TPZ_IOSETTINGS",
            Command::SetInputSource(_) => "PZ_SET_INPUTVOLTSSRC",
            Command::SetChannelEnable(_) => "MOD_SET_CHANENABLESTATE",
            Command::SetControlMode(_) => "PZ_SET_POSCONTROLMODE",
            Command::SetOutputVoltage(_) => "PZ_SET_OUTPUTVOLTS",
            Command::SetOutputPosition(_) => "PZ_SET_OUTPUTPOS",
            Command::SetPiGains { .. } => "PZ_SET_PICONSTS",
            Command::SetZero => "PZ_SET_ZERO",
            Command::RequestStatus => "PZ_REQ_PZSTATUSUPDATE",
            Command::RequestReading => "PZ_REQ_TSG_READING",
        };
        write!(f, "{name} ({:#06x})", self.message_id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire(cmd: Command) -> Vec<u8> {
        cmd.to_frame(&Address::default()).unwrap().encode().to_vec()
    }

    #[test]
    fn test_hw_info_request() {
        assert_eq!(
            wire(Command::RequestHardwareInfo),
            [0x05, 0x00, 0x00, 0x00, 0x50, 0x01]
        );
    }

    #[test]
    fn test_io_settings_payload() {
        let bytes = wire(Command::SetIoSettings {
            limit: MaxVoltage::V100,
            feedback: FeedbackSource::ExternalSma,
        });
        assert_eq!(
            bytes,
            [
                0xD4, 0x07, 0x0A, 0x00, 0xD0, 0x01, // header
                0x01, 0x00, 0x02, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00,
            ]
        );
    }

    #[test]
    fn test_scalar_commands() {
        assert_eq!(
            wire(Command::SetChannelEnable(true)),
            [0x10, 0x02, 0x01, 0x01, 0x50, 0x01]
        );
        assert_eq!(
            wire(Command::SetChannelEnable(false)),
            [0x10, 0x02, 0x01, 0x02, 0x50, 0x01]
        );
        assert_eq!(
            wire(Command::SetControlMode(ControlMode::ClosedLoopSmooth)),
            [0x40, 0x06, 0x01, 0x04, 0x50, 0x01]
        );
        assert_eq!(wire(Command::SetZero), [0x58, 0x06, 0x01, 0x00, 0x50, 0x01]);
        assert_eq!(
            wire(Command::RequestStatus),
            [0x60, 0x06, 0x01, 0x00, 0x50, 0x01]
        );
        assert_eq!(
            wire(Command::RequestReading),
            [0xDD, 0x07, 0x01, 0x00, 0x50, 0x01]
        );
    }

    #[test]
    fn test_signed_position_payload() {
        assert_eq!(
            wire(Command::SetOutputPosition(-2)),
            [0x46, 0x06, 0x04, 0x00, 0xD0, 0x01, 0x01, 0x00, 0xFE, 0xFF]
        );
    }

    #[test]
    fn test_pi_gains_and_input_source() {
        assert_eq!(
            wire(Command::SetPiGains {
                proportional: 120,
                integral: 255
            }),
            [0x55, 0x06, 0x06, 0x00, 0xD0, 0x01, 0x01, 0x00, 0x78, 0x00, 0xFF, 0x00]
        );
        assert_eq!(
            wire(Command::SetInputSource(InputSource::Potentiometer)),
            [0x52, 0x06, 0x04, 0x00, 0xD0, 0x01, 0x01, 0x00, 0x02, 0x00]
        );
    }

    #[test]
    fn test_directions() {
        assert_eq!(Command::RequestStatus.direction(), Direction::Query);
        assert_eq!(Command::RequestHardwareInfo.direction(), Direction::Query);
        assert_eq!(Command::SetZero.direction(), Direction::FireAndForget);
        assert_eq!(
            Command::RequestReading.response(),
            ResponseShape::Message(0x07DE)
        );
    }

    #[test]
    fn test_code_validation() {
        assert!(FeedbackSource::try_from(0x00).is_err());
        assert_eq!(
            FeedbackSource::try_from(0x02).unwrap(),
            FeedbackSource::HubAnalogueInB
        );
        assert!(InputSource::try_from(0x04).is_err());
        assert!(ControlMode::try_from(0x05).is_err());
        assert!(!ControlMode::try_from(0x03).unwrap().is_closed_loop());
    }
}
