//! Decoder for the `HW_GET_INFO` (0x0006) payload returned by the handshake.

use super::catalog::msg;
use super::frame::Frame;
use crate::error::{AppResult, TcubeError};
use bytes::Buf;

/// Payload length of `HW_GET_INFO`.
pub const HW_INFO_PAYLOAD_LEN: usize = 84;

/// Identity record reported by a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareInfo {
    /// Unit serial number
    pub serial_number: u32,
    /// Model string, e.g. "KPZ101"
    pub model: String,
    /// Hardware type code
    pub hardware_type: u16,
    /// Firmware version as (major, interim, minor)
    pub firmware_version: (u8, u8, u8),
    /// Free-form notes
    pub notes: String,
    /// Hardware revision
    pub hardware_version: u16,
    /// Modification state
    pub modification_state: u16,
    /// Number of channels
    pub channels: u16,
}

fn ascii_field(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).trim().to_string()
}

impl HardwareInfo {
    /// Decode from a `HW_GET_INFO` frame.
    pub fn from_frame(frame: &Frame) -> AppResult<Self> {
        if frame.message_id != msg::HW_GET_INFO {
            return Err(TcubeError::MalformedFrame(format!(
                "expected HW_GET_INFO, got message {:#06x}",
                frame.message_id
            )));
        }
        let payload = frame.payload().ok_or_else(|| {
            TcubeError::MalformedFrame("HW_GET_INFO carried no payload".to_string())
        })?;
        if payload.len() != HW_INFO_PAYLOAD_LEN {
            return Err(TcubeError::MalformedFrame(format!(
                "HW_GET_INFO payload is {} bytes, expected {HW_INFO_PAYLOAD_LEN}",
                payload.len()
            )));
        }

        let mut buf = payload;
        let serial_number = buf.get_u32_le();
        let model = ascii_field(&buf[..8]);
        buf.advance(8);
        let hardware_type = buf.get_u16_le();
        let minor = buf.get_u8();
        let interim = buf.get_u8();
        let major = buf.get_u8();
        buf.advance(1);
        let notes = ascii_field(&buf[..48]);
        buf.advance(48 + 12);
        let hardware_version = buf.get_u16_le();
        let modification_state = buf.get_u16_le();
        let channels = buf.get_u16_le();

        Ok(Self {
            serial_number,
            model,
            hardware_type,
            firmware_version: (major, interim, minor),
            notes,
            hardware_version,
            modification_state,
            channels,
        })
    }
}

#[cfg(test)]
pub(crate) fn sample_response(serial_number: u32, model: &str) -> Vec<u8> {
    use bytes::BufMut;

    let mut payload = Vec::with_capacity(HW_INFO_PAYLOAD_LEN);
    payload.put_u32_le(serial_number);
    let mut model_field = [0u8; 8];
    model_field[..model.len()].copy_from_slice(model.as_bytes());
    payload.put_slice(&model_field);
    payload.put_u16_le(31);
    payload.put_slice(&[2, 0, 1, 0]);
    let mut notes = [0u8; 48];
    notes[..12].copy_from_slice(b"Piezo Driver");
    payload.put_slice(&notes);
    payload.put_slice(&[0u8; 12]);
    payload.put_u16_le(3);
    payload.put_u16_le(0);
    payload.put_u16_le(1);

    let mut raw = vec![0x06, 0x00, 0x54, 0x00, 0x81, 0x50];
    raw.extend_from_slice(&payload);
    raw
}
