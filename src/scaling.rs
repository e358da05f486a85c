//! Conversion between physical quantities and T-Cube device units.
//!
//! The controllers represent output voltage and piezo extension as signed
//! 16-bit integers where `0..=32767` spans 0-100% of the calibrated range.
//! Conversions round half away from zero, which is what `f64::round` does.

use crate::error::{AppResult, TcubeError};
use std::fmt;

/// Device-unit value corresponding to 100% of a calibrated range.
pub const FULL_SCALE: i16 = i16::MAX;

/// Output voltage limits supported by the piezo driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MaxVoltage {
    /// 75 V limit (code 0x01)
    V75,
    /// 100 V limit (code 0x02)
    V100,
    /// 150 V limit (code 0x03)
    V150,
}

impl MaxVoltage {
    /// All supported limits, lowest first.
    pub const ALL: [MaxVoltage; 3] = [MaxVoltage::V75, MaxVoltage::V100, MaxVoltage::V150];

    /// Limit in volts.
    pub fn volts(self) -> u16 {
        match self {
            MaxVoltage::V75 => 75,
            MaxVoltage::V100 => 100,
            MaxVoltage::V150 => 150,
        }
    }

    /// Code sent in the I/O settings command.
    pub fn code(self) -> u16 {
        match self {
            MaxVoltage::V75 => 0x01,
            MaxVoltage::V100 => 0x02,
            MaxVoltage::V150 => 0x03,
        }
    }

    /// Device units per volt at this limit.
    pub fn scale_factor(self) -> f64 {
        f64::from(FULL_SCALE) / f64::from(self.volts())
    }
}

impl TryFrom<u16> for MaxVoltage {
    type Error = TcubeError;

    fn try_from(volts: u16) -> AppResult<Self> {
        match volts {
            75 => Ok(MaxVoltage::V75),
            100 => Ok(MaxVoltage::V100),
            150 => Ok(MaxVoltage::V150),
            other => Err(TcubeError::invalid("voltage limit", other)),
        }
    }
}

impl fmt::Display for MaxVoltage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} V", self.volts())
    }
}

/// Calibration limits for one device.
///
/// Scale factors are derived from the limits on every read, so a limit and its
/// scale factor can never be observed out of step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    max_voltage: MaxVoltage,
    max_position_um: f64,
}

impl Calibration {
    /// Build a calibration. `max_position_um` must be finite and positive.
    pub fn new(max_voltage: MaxVoltage, max_position_um: f64) -> AppResult<Self> {
        if !max_position_um.is_finite() || max_position_um <= 0.0 {
            return Err(TcubeError::invalid("max position", max_position_um));
        }
        Ok(Self {
            max_voltage,
            max_position_um,
        })
    }

    /// Current voltage limit.
    pub fn max_voltage(&self) -> MaxVoltage {
        self.max_voltage
    }

    /// Maximum piezo travel in micrometers.
    pub fn max_position_um(&self) -> f64 {
        self.max_position_um
    }

    /// Device units per volt.
    pub fn voltage_scale_factor(&self) -> f64 {
        self.max_voltage.scale_factor()
    }

    /// Device units per micrometer.
    pub fn position_scale_factor(&self) -> f64 {
        f64::from(FULL_SCALE) / self.max_position_um
    }

    /// Replace the voltage limit.
    pub fn set_max_voltage(&mut self, max_voltage: MaxVoltage) {
        self.max_voltage = max_voltage;
    }
}

impl Default for Calibration {
    /// 75 V limit and 30 µm travel, the KPZ101 factory pairing.
    fn default() -> Self {
        Self {
            max_voltage: MaxVoltage::V75,
            max_position_um: 30.0,
        }
    }
}

fn to_units(value: f64, max: f64) -> i16 {
    // value is bounded by max, so the result lies in -32767..=32767
    (value * f64::from(FULL_SCALE) / max).round() as i16
}

/// Convert an output voltage to device units.
///
/// Fails with [`TcubeError::Range`] outside `0..=max_voltage` (including NaN).
pub fn volts_to_device_units(volts: f64, calibration: &Calibration) -> AppResult<i16> {
    let max = f64::from(calibration.max_voltage().volts());
    if !(0.0..=max).contains(&volts) {
        return Err(TcubeError::Range {
            quantity: "voltage",
            value: volts,
            min: 0.0,
            max,
        });
    }
    Ok(to_units(volts, max))
}

/// Convert device units back to volts.
pub fn device_units_to_volts(units: i16, calibration: &Calibration) -> f64 {
    f64::from(units) / calibration.voltage_scale_factor()
}

/// Convert a piezo position in micrometers to device units.
///
/// Fails with [`TcubeError::Range`] when `|position| > max_position`. Negative
/// positions are encoded as two's complement and sent; the firmware documents
/// the negative range as unused, so interpreting them is left to the device.
pub fn position_to_device_units(position_um: f64, calibration: &Calibration) -> AppResult<i16> {
    let max = calibration.max_position_um();
    if !(-max..=max).contains(&position_um) {
        return Err(TcubeError::Range {
            quantity: "position",
            value: position_um,
            min: -max,
            max,
        });
    }
    Ok(to_units(position_um, max))
}

/// Convert device units back to micrometers.
pub fn device_units_to_position(units: i16, calibration: &Calibration) -> f64 {
    f64::from(units) / calibration.position_scale_factor()
}

/// Validate a PI loop gain. Gains are already device native (0-255).
pub fn gain_to_device_units(gain: u32) -> AppResult<u8> {
    u8::try_from(gain).map_err(|_| TcubeError::Range {
        quantity: "gain",
        value: f64::from(gain),
        min: 0.0,
        max: 255.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cal(max_voltage: MaxVoltage) -> Calibration {
        Calibration::new(max_voltage, 30.0).unwrap()
    }

    #[test]
    fn test_full_scale_for_every_limit() {
        for limit in MaxVoltage::ALL {
            let units = volts_to_device_units(f64::from(limit.volts()), &cal(limit)).unwrap();
            assert_eq!(units, 32767, "full scale at {limit}");
        }
    }

    #[test]
    fn test_voltage_out_of_range() {
        let c = cal(MaxVoltage::V75);
        assert!(matches!(
            volts_to_device_units(-1.0, &c),
            Err(TcubeError::Range { .. })
        ));
        assert!(matches!(
            volts_to_device_units(76.0, &c),
            Err(TcubeError::Range { .. })
        ));
        assert!(volts_to_device_units(f64::NAN, &c).is_err());
    }

    #[test]
    fn test_half_step_rounds_away_from_zero() {
        // 37.5 V at 75 V is exactly 16383.5 units
        let units = volts_to_device_units(37.5, &cal(MaxVoltage::V75)).unwrap();
        assert_eq!(units, 16384);

        // -15 µm at 30 µm is exactly -16383.5 units
        let units = position_to_device_units(-15.0, &cal(MaxVoltage::V75)).unwrap();
        assert_eq!(units, -16384);
    }

    #[test]
    fn test_position_limits() {
        let c = cal(MaxVoltage::V100);
        assert_eq!(position_to_device_units(30.0, &c).unwrap(), 32767);
        assert_eq!(position_to_device_units(-30.0, &c).unwrap(), -32767);
        assert_eq!(position_to_device_units(0.0, &c).unwrap(), 0);
        assert!(position_to_device_units(30.5, &c).is_err());
        assert!(position_to_device_units(-30.5, &c).is_err());
    }

    #[test]
    fn test_gain_bounds() {
        assert_eq!(gain_to_device_units(0).unwrap(), 0);
        assert_eq!(gain_to_device_units(255).unwrap(), 255);
        assert!(matches!(
            gain_to_device_units(256),
            Err(TcubeError::Range { .. })
        ));
    }

    #[test]
    fn test_max_voltage_codes() {
        assert_eq!(MaxVoltage::try_from(75).unwrap().code(), 0x01);
        assert_eq!(MaxVoltage::try_from(100).unwrap().code(), 0x02);
        assert_eq!(MaxVoltage::try_from(150).unwrap().code(), 0x03);
        assert!(matches!(
            MaxVoltage::try_from(120),
            Err(TcubeError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_calibration_rejects_bad_travel() {
        assert!(Calibration::new(MaxVoltage::V75, 0.0).is_err());
        assert!(Calibration::new(MaxVoltage::V75, -5.0).is_err());
        assert!(Calibration::new(MaxVoltage::V75, f64::INFINITY).is_err());
    }

    #[test]
    fn test_set_max_voltage_updates_scale_factor() {
        let mut c = Calibration::default();
        let before = c.voltage_scale_factor();
        c.set_max_voltage(MaxVoltage::V150);
        assert_eq!(c.max_voltage(), MaxVoltage::V150);
        assert!((c.voltage_scale_factor() - before / 2.0).abs() < 1e-9);
    }
}
