//! Device session: one addressed channel on one physical T-Cube.
//!
//! A session owns its adapter, its calibration and its connection state behind
//! a single async mutex, so exactly one command is in flight per channel and a
//! voltage-limit change can never be observed half applied.
//!
//! ```text
//!   Disconnected --connect()/handshake ok--> Connected --close()--> (released)
//!        ^   |
//!        +---+ handshake failed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_tcube::adapters::MockAdapter;
//! use rust_tcube::protocol::Address;
//! use rust_tcube::scaling::Calibration;
//! use rust_tcube::session::{DeviceSession, Timing};
//!
//! # async fn run() -> rust_tcube::error::AppResult<()> {
//! let session = DeviceSession::open(
//!     MockAdapter::new(),
//!     Address::default(),
//!     Calibration::default(),
//!     Timing::default(),
//! )
//! .await?;
//! session.enable_channel().await?;
//! session.set_output_voltage(37.5).await?;
//! let adapter = session.close().await?;
//! # drop(adapter);
//! # Ok(())
//! # }
//! ```

use crate::adapters::Adapter;
use crate::error::{AppResult, TcubeError};
use crate::protocol::catalog::{
    Command, ControlMode, FeedbackSource, InputSource, ResponseShape, HW_INFO_RESPONSE_LEN,
};
use crate::protocol::frame::Frame;
use crate::protocol::hw_info::HardwareInfo;
use crate::protocol::Address;
use crate::scaling::{self, Calibration, MaxVoltage};
use bytes::Bytes;
use std::io;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, handshake not yet passed
    Disconnected,
    /// Handshake passed; commands allowed
    Connected,
}

/// Response timing for query commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Settle time between writing a request and reading its response
    pub response_delay: Duration,
    /// Upper bound on waiting for the response once reading starts
    pub read_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            response_delay: Duration::from_millis(100),
            read_timeout: Duration::from_secs(1),
        }
    }
}

struct SessionInner<A> {
    adapter: A,
    calibration: Calibration,
    state: SessionState,
    hardware_info: Option<HardwareInfo>,
    control_mode: Option<ControlMode>,
}

/// One addressed channel on one physical device.
pub struct DeviceSession<A: Adapter> {
    address: Address,
    timing: Timing,
    inner: Mutex<SessionInner<A>>,
}

impl<A: Adapter> DeviceSession<A> {
    /// Wrap an already connected adapter. The session starts `Disconnected`.
    pub fn new(adapter: A, address: Address, calibration: Calibration, timing: Timing) -> Self {
        Self {
            address,
            timing,
            inner: Mutex::new(SessionInner {
                adapter,
                calibration,
                state: SessionState::Disconnected,
                hardware_info: None,
                control_mode: None,
            }),
        }
    }

    /// Create a session and run the handshake.
    pub async fn open(
        adapter: A,
        address: Address,
        calibration: Calibration,
        timing: Timing,
    ) -> AppResult<Self> {
        let session = Self::new(adapter, address, calibration, timing);
        session.connect().await?;
        Ok(session)
    }

    /// Run the hardware-info handshake.
    ///
    /// Fails with [`TcubeError::Handshake`] unless exactly 90 bytes come back;
    /// the session then stays `Disconnected`. Calling this on a connected
    /// session does nothing.
    #[instrument(skip(self), fields(dest = self.address.destination))]
    pub async fn connect(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.state == SessionState::Connected {
            return Ok(());
        }

        let raw = self
            .transact(&mut inner, Command::RequestHardwareInfo)
            .await?;
        let expected = HW_INFO_RESPONSE_LEN;
        if raw.len() != expected {
            warn!(
                "Hardware info response was {} bytes, expected {}",
                raw.len(),
                expected
            );
            return Err(TcubeError::Handshake {
                expected,
                actual: raw.len(),
            });
        }

        inner.hardware_info = match Frame::decode(&raw).and_then(|f| HardwareInfo::from_frame(&f)) {
            Ok(hw) => {
                info!(
                    "Connected to {} serial {} firmware {}.{}.{}",
                    hw.model,
                    hw.serial_number,
                    hw.firmware_version.0,
                    hw.firmware_version.1,
                    hw.firmware_version.2
                );
                Some(hw)
            }
            Err(e) => {
                warn!("Handshake length ok but hardware info not decodable: {}", e);
                None
            }
        };
        inner.state = SessionState::Connected;
        Ok(())
    }

    /// Release the adapter. Consumes the session.
    pub async fn close(self) -> AppResult<A> {
        let mut inner = self.inner.into_inner();
        inner.adapter.disconnect().await?;
        info!("Session for unit {:#04x} closed", self.address.destination);
        Ok(inner.adapter)
    }

    /// Routing triple used for every frame.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Response timing.
    pub fn timing(&self) -> Timing {
        self.timing
    }

    /// Current connection state.
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Whether the handshake has passed.
    pub async fn is_connected(&self) -> bool {
        self.state().await == SessionState::Connected
    }

    /// Snapshot of the calibration in use.
    pub async fn calibration(&self) -> Calibration {
        self.inner.lock().await.calibration
    }

    /// Decoded handshake payload, when the device sent a well-formed one.
    pub async fn hardware_info(&self) -> Option<HardwareInfo> {
        self.inner.lock().await.hardware_info.clone()
    }

    /// Last control mode sent through this session.
    pub async fn control_mode(&self) -> Option<ControlMode> {
        self.inner.lock().await.control_mode
    }

    async fn connected(&self) -> AppResult<tokio::sync::MutexGuard<'_, SessionInner<A>>> {
        let inner = self.inner.lock().await;
        if inner.state != SessionState::Connected {
            return Err(TcubeError::NotConnected);
        }
        Ok(inner)
    }

    async fn write_command(&self, inner: &mut SessionInner<A>, command: Command) -> AppResult<()> {
        let frame = command.to_frame(&self.address)?;
        let wire = frame.encode();
        debug!("-> {} [{} bytes]", command, wire.len());
        inner.adapter.write(&wire).await?;
        Ok(())
    }

    async fn transact(&self, inner: &mut SessionInner<A>, command: Command) -> AppResult<Bytes> {
        inner.adapter.drain().await?;
        self.write_command(inner, command).await?;
        tokio::time::sleep(self.timing.response_delay).await;

        let timeout = self.timing.read_timeout;
        let raw = match tokio::time::timeout(timeout, inner.adapter.read()).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) if e.kind() == io::ErrorKind::TimedOut => {
                return Err(TcubeError::CommunicationTimeout(timeout))
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Err(TcubeError::CommunicationTimeout(timeout)),
        };
        debug!("<- {} bytes for {}", raw.len(), command);
        Ok(raw)
    }

    async fn send(&self, command: Command) -> AppResult<()> {
        let mut inner = self.connected().await?;
        self.write_command(&mut inner, command).await
    }

    async fn query(&self, command: Command) -> AppResult<Frame> {
        let mut inner = self.connected().await?;
        let raw = self.transact(&mut inner, command).await?;
        let frame = Frame::decode(&raw)?;
        match command.response() {
            ResponseShape::Message(id) if frame.message_id != id => {
                Err(TcubeError::MalformedFrame(format!(
                    "expected message {:#06x} in reply to {}, got {:#06x}",
                    id, command, frame.message_id
                )))
            }
            ResponseShape::Fixed(len) if raw.len() != len => Err(TcubeError::MalformedFrame(
                format!("expected {len} bytes in reply to {command}, got {}", raw.len()),
            )),
            _ => Ok(frame),
        }
    }

    /// Enable the high-voltage output.
    #[instrument(skip(self))]
    pub async fn enable_channel(&self) -> AppResult<()> {
        self.send(Command::SetChannelEnable(true)).await
    }

    /// Disable the high-voltage output.
    #[instrument(skip(self))]
    pub async fn disable_channel(&self) -> AppResult<()> {
        self.send(Command::SetChannelEnable(false)).await
    }

    /// Set the output voltage in volts (`0..=max_voltage`).
    #[instrument(skip(self))]
    pub async fn set_output_voltage(&self, volts: f64) -> AppResult<()> {
        let mut inner = self.connected().await?;
        let units = scaling::volts_to_device_units(volts, &inner.calibration)?;
        self.write_command(&mut inner, Command::SetOutputVoltage(units))
            .await
    }

    /// Set the piezo position in micrometers relative to the zero datum.
    ///
    /// Only honoured by the device in closed-loop mode; in open loop the
    /// controller ignores it without reporting anything.
    #[instrument(skip(self))]
    pub async fn set_output_position(&self, position_um: f64) -> AppResult<()> {
        let mut inner = self.connected().await?;
        let units = scaling::position_to_device_units(position_um, &inner.calibration)?;
        if let Some(mode) = inner.control_mode.filter(|m| !m.is_closed_loop()) {
            warn!(
                "Position set-point sent in {:?}; the controller will ignore it",
                mode
            );
        }
        self.write_command(&mut inner, Command::SetOutputPosition(units))
            .await
    }

    /// Set the PI loop constants (each `0..=255`).
    #[instrument(skip(self))]
    pub async fn set_pi_gains(&self, proportional: u32, integral: u32) -> AppResult<()> {
        let mut inner = self.connected().await?;
        let proportional = scaling::gain_to_device_units(proportional)?;
        let integral = scaling::gain_to_device_units(integral)?;
        self.write_command(
            &mut inner,
            Command::SetPiGains {
                proportional,
                integral,
            },
        )
        .await
    }

    /// Zero the strain-gauge reading.
    #[instrument(skip(self))]
    pub async fn set_zero(&self) -> AppResult<()> {
        self.send(Command::SetZero).await
    }

    /// Select the analog input summed into the output.
    #[instrument(skip(self))]
    pub async fn set_input_source(&self, source: InputSource) -> AppResult<()> {
        self.send(Command::SetInputSource(source)).await
    }

    /// Set the position control loop mode.
    #[instrument(skip(self))]
    pub async fn set_control_mode(&self, mode: ControlMode) -> AppResult<()> {
        let mut inner = self.connected().await?;
        self.write_command(&mut inner, Command::SetControlMode(mode))
            .await?;
        inner.control_mode = Some(mode);
        Ok(())
    }

    /// Set the output voltage limit (75, 100 or 150 V) and feedback routing.
    ///
    /// Fails with [`TcubeError::InvalidParameter`] for any other limit before
    /// anything is written. The session's calibration follows the new limit once
    /// the command is on the wire.
    #[instrument(skip(self))]
    pub async fn set_voltage_limit(&self, limit_volts: u16, feedback: FeedbackSource) -> AppResult<()> {
        let limit = MaxVoltage::try_from(limit_volts)?;
        let mut inner = self.connected().await?;
        self.write_command(&mut inner, Command::SetIoSettings { limit, feedback })
            .await?;
        inner.calibration.set_max_voltage(limit);
        Ok(())
    }

    /// Request a status update; returns the raw `0x0661` frame.
    #[instrument(skip(self))]
    pub async fn request_status(&self) -> AppResult<Frame> {
        self.query(Command::RequestStatus).await
    }

    /// Request a strain-gauge reading; returns the raw `0x07DE` frame.
    #[instrument(skip(self))]
    pub async fn request_reading(&self) -> AppResult<Frame> {
        self.query(Command::RequestReading).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MockAdapter, MockReply};
    use crate::protocol::hw_info::sample_response;

    fn fast() -> Timing {
        Timing {
            response_delay: Duration::ZERO,
            read_timeout: Duration::from_millis(50),
        }
    }

    async fn connected_session() -> (DeviceSession<MockAdapter>, MockAdapter) {
        let mock = MockAdapter::new();
        mock.push_bytes(sample_response(29253043, "KPZ101"));
        let session = DeviceSession::open(
            mock.clone(),
            Address::default(),
            Calibration::default(),
            fast(),
        )
        .await
        .unwrap();
        (session, mock)
    }

    #[tokio::test]
    async fn test_handshake_decodes_hardware_info() {
        let (session, mock) = connected_session().await;
        assert!(session.is_connected().await);
        assert_eq!(mock.written(), vec![vec![0x05, 0x00, 0x00, 0x00, 0x50, 0x01]]);

        let hw = session.hardware_info().await.unwrap();
        assert_eq!(hw.model, "KPZ101");
        assert_eq!(hw.serial_number, 29253043);
    }

    #[tokio::test]
    async fn test_handshake_length_check() {
        for len in [89usize, 91] {
            let mock = MockAdapter::with_replies([MockReply::Bytes(vec![0u8; len])]);
            let session =
                DeviceSession::new(mock, Address::default(), Calibration::default(), fast());
            let err = session.connect().await.unwrap_err();
            assert!(matches!(err, TcubeError::Handshake { actual, .. } if actual == len));
            assert_eq!(session.state().await, SessionState::Disconnected);
        }
    }

    #[tokio::test]
    async fn test_handshake_accepts_undecodable_payload() {
        let mock = MockAdapter::with_replies([MockReply::Bytes(vec![0u8; 90])]);
        let session = DeviceSession::open(mock, Address::default(), Calibration::default(), fast())
            .await
            .unwrap();
        assert!(session.is_connected().await);
        assert!(session.hardware_info().await.is_none());
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let mock = MockAdapter::new();
        let session =
            DeviceSession::new(mock.clone(), Address::default(), Calibration::default(), fast());

        let results = vec![
            ("enable", session.enable_channel().await),
            ("disable", session.disable_channel().await),
            ("voltage", session.set_output_voltage(10.0).await),
            ("position", session.set_output_position(5.0).await),
            // out-of-range gain still reports the connection first
            ("gains", session.set_pi_gains(300, 0).await),
            ("zero", session.set_zero().await),
            ("input", session.set_input_source(InputSource::Software).await),
            ("mode", session.set_control_mode(ControlMode::ClosedLoop).await),
            (
                "limit",
                session.set_voltage_limit(100, FeedbackSource::ExternalSma).await,
            ),
            ("status", session.request_status().await.map(drop)),
            ("reading", session.request_reading().await.map(drop)),
        ];
        for (name, result) in results {
            assert!(
                matches!(result, Err(TcubeError::NotConnected)),
                "{name}: {result:?}"
            );
        }
        assert!(mock.written().is_empty());
        assert_eq!(mock.read_count(), 0);
        assert_eq!(mock.drain_count(), 0);
        assert_eq!(session.control_mode().await, None);
        assert_eq!(session.calibration().await.max_voltage(), MaxVoltage::V75);
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_the_next_query() {
        let (session, mock) = connected_session().await;
        let late = vec![0x61, 0x06, 0x01, 0x00, 0x01, 0x50];
        let fresh = vec![0x61, 0x06, 0x02, 0x00, 0x01, 0x50];
        mock.push_reply(MockReply::Late(late));
        mock.push_bytes(fresh);

        assert!(matches!(
            session.request_status().await,
            Err(TcubeError::CommunicationTimeout(_))
        ));
        let frame = session.request_status().await.unwrap();
        assert_eq!(frame.param1, 0x02);
        // handshake plus both queries
        assert_eq!(mock.drain_count(), 3);
    }

    #[tokio::test]
    async fn test_set_voltage_limit_updates_calibration() {
        let (session, mock) = connected_session().await;
        session
            .set_voltage_limit(150, FeedbackSource::ExternalSma)
            .await
            .unwrap();
        assert_eq!(session.calibration().await.max_voltage(), MaxVoltage::V150);

        // 150 V is now in range
        session.set_output_voltage(150.0).await.unwrap();
        let last = mock.written().pop().unwrap();
        assert_eq!(&last[6..], &[0x01, 0x00, 0xFF, 0x7F]);
    }

    #[tokio::test]
    async fn test_invalid_limit_writes_nothing() {
        let (session, mock) = connected_session().await;
        let before = mock.written().len();
        let err = session
            .set_voltage_limit(120, FeedbackSource::ExternalSma)
            .await
            .unwrap_err();
        assert!(matches!(err, TcubeError::InvalidParameter { .. }));
        assert_eq!(mock.written().len(), before);
        assert_eq!(session.calibration().await.max_voltage(), MaxVoltage::V75);
    }

    #[tokio::test]
    async fn test_query_times_out() {
        let (session, mock) = connected_session().await;
        mock.push_reply(MockReply::Silent);
        let err = session.request_status().await.unwrap_err();
        assert!(matches!(err, TcubeError::CommunicationTimeout(_)));
    }

    #[tokio::test]
    async fn test_adapter_timeout_maps_to_communication_timeout() {
        let (session, mock) = connected_session().await;
        mock.push_reply(MockReply::Error(io::ErrorKind::TimedOut));
        assert!(matches!(
            session.request_reading().await,
            Err(TcubeError::CommunicationTimeout(_))
        ));

        mock.push_reply(MockReply::Error(io::ErrorKind::BrokenPipe));
        assert!(matches!(session.request_reading().await, Err(TcubeError::Io(_))));
    }

    #[tokio::test]
    async fn test_query_checks_reply_message() {
        let (session, mock) = connected_session().await;
        mock.push_bytes(vec![0xDE, 0x07, 0x01, 0x00, 0x01, 0x50]);
        assert!(matches!(
            session.request_status().await,
            Err(TcubeError::MalformedFrame(_))
        ));

        mock.push_bytes(vec![0x61, 0x06]);
        assert!(matches!(
            session.request_status().await,
            Err(TcubeError::MalformedFrame(_))
        ));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_open_loop_position_warns_but_sends() {
        let (session, mock) = connected_session().await;
        session.set_control_mode(ControlMode::OpenLoop).await.unwrap();
        session.set_output_position(10.0).await.unwrap();

        assert!(logs_contain("controller will ignore it"));
        assert_eq!(mock.written().len(), 3);
        assert_eq!(session.control_mode().await, Some(ControlMode::OpenLoop));
    }

    #[tokio::test]
    async fn test_close_releases_adapter() {
        let (session, mock) = connected_session().await;
        let adapter = session.close().await.unwrap();
        assert!(adapter.is_disconnected());
        assert!(mock.is_disconnected());
    }
}
