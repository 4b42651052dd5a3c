//! Calibration coefficients mapping raw quantized samples to physical units.
//!
//! Every channel uses the linear model
//!
//! ```text
//! SI-value [SI-unit] = raw-value * gain + offset
//! ```
//!
//! Converted values are clamped at zero in both directions because the hardware
//! quantizes into unsigned integers.

use crate::error::{AppResult, ShepherdError};
use serde::{Deserialize, Serialize};

/// Gain and offset of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPair {
    /// Scale from raw step to SI unit, must be finite and > 0.
    pub gain: f64,
    /// SI value of raw zero.
    #[serde(default)]
    pub offset: f64,
}

impl CalibrationPair {
    /// Create a pair.
    pub fn new(gain: f64, offset: f64) -> Self {
        Self { gain, offset }
    }

    /// Check the pair can be used for conversion in both directions.
    pub fn validate(&self, channel: &str) -> AppResult<()> {
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(ShepherdError::Calibration(format!(
                "gain of channel '{}' must be finite and > 0, got {}",
                channel, self.gain
            )));
        }
        if !self.offset.is_finite() {
            return Err(ShepherdError::Calibration(format!(
                "offset of channel '{}' must be finite, got {}",
                channel, self.offset
            )));
        }
        Ok(())
    }

    /// Convert one raw value to SI, clamped at 0.
    pub fn raw_to_si(&self, raw: f64) -> f64 {
        (raw * self.gain + self.offset).max(0.0)
    }

    /// Convert one SI value to a (fractional) raw value, clamped at 0.
    pub fn si_to_raw(&self, si: f64) -> f64 {
        ((si - self.offset) / self.gain).max(0.0)
    }

    /// Quantize an SI value into the u32 sample container.
    pub fn si_to_raw_u32(&self, si: f64) -> u32 {
        let raw = self.si_to_raw(si).round();
        if raw >= u32::MAX as f64 {
            u32::MAX
        } else {
            raw as u32
        }
    }

    /// Quantize an SI value into the u64 time container.
    pub fn si_to_raw_u64(&self, si: f64) -> u64 {
        let raw = self.si_to_raw(si).round();
        if raw >= u64::MAX as f64 {
            u64::MAX
        } else {
            raw as u64
        }
    }

    /// Derive a pair from a raw-producing transfer function, i.e. the inverse of what is
    /// stored. `f(0)` gives the raw offset, `f(1) - f(0)` the raw steps per SI unit.
    pub fn from_fn(f: impl Fn(f64) -> f64) -> AppResult<Self> {
        let raw_offset = f(0.0);
        let gain_inv = f(1.0) - raw_offset;
        if gain_inv == 0.0 || !gain_inv.is_finite() {
            return Err(ShepherdError::Calibration(
                "transfer function has zero or non-finite slope".to_string(),
            ));
        }
        Ok(Self {
            gain: 1.0 / gain_inv,
            offset: -raw_offset / gain_inv,
        })
    }
}

/// Calibration of all channels stored in a container.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSeries {
    /// Current channel, SI unit A.
    pub current: CalibrationPair,
    /// Voltage channel, SI unit V.
    pub voltage: CalibrationPair,
    /// Timestamps, SI unit s.
    pub time: CalibrationPair,
}

impl Default for CalibrationSeries {
    fn default() -> Self {
        Self {
            // 0 - 1 A in 250 pA steps
            current: CalibrationPair::new(250e-12, 0.0),
            // 0 - 12 V in 3 nV steps
            voltage: CalibrationPair::new(3e-9, 0.0),
            // nanoseconds
            time: CalibrationPair::new(1e-9, 0.0),
        }
    }
}

impl CalibrationSeries {
    /// Row order of the `/calibration` dataset.
    pub const CHANNELS: [&'static str; 3] = ["current", "voltage", "time"];

    /// Validate every channel.
    pub fn validate(&self) -> AppResult<()> {
        self.current.validate("current")?;
        self.voltage.validate("voltage")?;
        self.time.validate("time")
    }

    /// Flatten into `[[gain, offset]; 3]` rows in [`Self::CHANNELS`] order.
    pub fn to_rows(&self) -> [[f64; 2]; 3] {
        [
            [self.current.gain, self.current.offset],
            [self.voltage.gain, self.voltage.offset],
            [self.time.gain, self.time.offset],
        ]
    }

    /// Inverse of [`Self::to_rows`]. The result is validated.
    pub fn from_rows(rows: &[[f64; 2]]) -> AppResult<Self> {
        if rows.len() != Self::CHANNELS.len() {
            return Err(ShepherdError::Format(format!(
                "calibration needs {} rows, found {}",
                Self::CHANNELS.len(),
                rows.len()
            )));
        }
        let series = Self {
            current: CalibrationPair::new(rows[0][0], rows[0][1]),
            voltage: CalibrationPair::new(rows[1][0], rows[1][1]),
            time: CalibrationPair::new(rows[2][0], rows[2][1]),
        };
        series.validate()?;
        Ok(series)
    }
}
