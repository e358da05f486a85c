//! Shared helpers for integration tests.

#![allow(dead_code)]

use rust_tcube::adapters::MockAdapter;
use rust_tcube::protocol::Address;
use rust_tcube::scaling::{Calibration, MaxVoltage};
use rust_tcube::session::{DeviceSession, Timing};
use std::time::Duration;

/// A 90-byte HW_GET_INFO reply for a unit with the given serial and model.
pub fn hw_info_reply(serial_number: u32, model: &str) -> Vec<u8> {
    let mut raw = vec![0x06, 0x00, 0x54, 0x00, 0x81, 0x50];
    raw.extend_from_slice(&serial_number.to_le_bytes());
    let mut model_field = [0u8; 8];
    model_field[..model.len()].copy_from_slice(model.as_bytes());
    raw.extend_from_slice(&model_field);
    raw.extend_from_slice(&31u16.to_le_bytes());
    raw.extend_from_slice(&[2, 0, 1, 0]);
    raw.extend_from_slice(&[0u8; 48 + 12]);
    raw.extend_from_slice(&[3, 0, 0, 0, 1, 0]);
    assert_eq!(raw.len(), 90);
    raw
}

/// Timing without the settle delay, short deadline.
pub fn fast_timing() -> Timing {
    Timing {
        response_delay: Duration::ZERO,
        read_timeout: Duration::from_millis(50),
    }
}

/// Open a session on a mock that answers the handshake, returning a second
/// handle that shares the mock's state.
pub async fn open_session(
    model: &str,
    max_voltage: MaxVoltage,
) -> (DeviceSession<MockAdapter>, MockAdapter) {
    let mock = MockAdapter::new();
    mock.push_bytes(hw_info_reply(29253043, model));
    let calibration = Calibration::new(max_voltage, 30.0).unwrap();
    let session = DeviceSession::open(mock.clone(), Address::default(), calibration, fast_timing())
        .await
        .unwrap();
    (session, mock)
}
