//! Thorlabs KPZ101 / TPZ001 piezo driver
//!
//! Thin layer over a [`DeviceSession`] that knows the start-up sequence for a
//! piezo cube: I/O settings, input source, control mode, PI constants, then
//! output enable.
//!
//! # Example Usage
//!
//! ```no_run
//! use rust_tcube::adapters::SerialAdapter;
//! use rust_tcube::config::Settings;
//! use rust_tcube::hardware::kpz101::{Kpz101, PiezoSetup};
//! use rust_tcube::session::DeviceSession;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let adapter = SerialAdapter::open(
//!         &settings.serial.port,
//!         settings.serial.baud_rate,
//!         Duration::from_millis(settings.timing.read_timeout_ms),
//!         Duration::from_millis(settings.serial.poll_interval_ms),
//!     )?;
//!     let session = DeviceSession::open(
//!         adapter,
//!         settings.address,
//!         settings.calibration()?,
//!         settings.timing(),
//!     )
//!     .await?;
//!
//!     let piezo = Kpz101::new(session);
//!     piezo.configure(&PiezoSetup::from_settings(&settings)?).await?;
//!     piezo.set_position(12.5).await?;
//!     piezo.close().await?;
//!     Ok(())
//! }
//! ```

use crate::adapters::Adapter;
use crate::config::Settings;
use crate::error::AppResult;
use crate::protocol::catalog::{ControlMode, FeedbackSource, InputSource};
use crate::protocol::frame::Frame;
use crate::scaling::MaxVoltage;
use crate::session::DeviceSession;
use tracing::{info, warn};

/// Start-up configuration for a piezo cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PiezoSetup {
    /// Output voltage limit
    pub voltage_limit: MaxVoltage,
    /// Feedback routing for closed loop
    pub feedback: FeedbackSource,
    /// Analog input summed into the output
    pub input: InputSource,
    /// Position control loop mode
    pub control_mode: ControlMode,
    /// Proportional gain
    pub proportional: u8,
    /// Integral gain
    pub integral: u8,
}

impl Default for PiezoSetup {
    fn default() -> Self {
        Self {
            voltage_limit: MaxVoltage::V75,
            feedback: FeedbackSource::ExternalSma,
            input: InputSource::Software,
            control_mode: ControlMode::ClosedLoopSmooth,
            proportional: 120,
            integral: 120,
        }
    }
}

impl PiezoSetup {
    /// Build from validated settings.
    pub fn from_settings(settings: &Settings) -> AppResult<Self> {
        Ok(Self {
            voltage_limit: settings.calibration()?.max_voltage(),
            feedback: settings.piezo.feedback()?,
            input: settings.piezo.input()?,
            control_mode: settings.piezo.mode()?,
            proportional: crate::scaling::gain_to_device_units(settings.piezo.proportional)?,
            integral: crate::scaling::gain_to_device_units(settings.piezo.integral)?,
        })
    }
}

/// Driver for a KPZ101 piezo controller.
pub struct Kpz101<A: Adapter> {
    session: DeviceSession<A>,
}

impl<A: Adapter> Kpz101<A> {
    /// Wrap a connected session.
    pub fn new(session: DeviceSession<A>) -> Self {
        Self { session }
    }

    /// Underlying session.
    pub fn session(&self) -> &DeviceSession<A> {
        &self.session
    }

    /// Apply `setup` and enable the output.
    pub async fn configure(&self, setup: &PiezoSetup) -> AppResult<()> {
        if let Some(hw) = self.session.hardware_info().await {
            if !hw.model.starts_with("KPZ") && !hw.model.starts_with("TPZ") {
                warn!("Configuring {} as a piezo driver", hw.model);
            }
        }

        self.session
            .set_voltage_limit(setup.voltage_limit.volts(), setup.feedback)
            .await?;
        self.session.set_input_source(setup.input).await?;
        self.session.set_control_mode(setup.control_mode).await?;
        self.session
            .set_pi_gains(u32::from(setup.proportional), u32::from(setup.integral))
            .await?;
        self.session.enable_channel().await?;

        info!(
            "Piezo configured: {} limit, {:?}, {:?}",
            setup.voltage_limit, setup.control_mode, setup.input
        );
        Ok(())
    }

    /// Set the output voltage in volts.
    pub async fn set_voltage(&self, volts: f64) -> AppResult<()> {
        self.session.set_output_voltage(volts).await
    }

    /// Set the position in micrometers (closed loop only).
    pub async fn set_position(&self, position_um: f64) -> AppResult<()> {
        self.session.set_output_position(position_um).await
    }

    /// Enable the HV output.
    pub async fn enable(&self) -> AppResult<()> {
        self.session.enable_channel().await
    }

    /// Disable the HV output.
    pub async fn disable(&self) -> AppResult<()> {
        self.session.disable_channel().await
    }

    /// Raw status update frame.
    pub async fn status(&self) -> AppResult<Frame> {
        self.session.request_status().await
    }

    /// Release the device.
    pub async fn close(self) -> AppResult<A> {
        self.session.close().await
    }
}
