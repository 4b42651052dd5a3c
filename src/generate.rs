//! Synthetic recordings for tests and demos.

use crate::buffer::SiBuffer;
use crate::error::{AppResult, ShepherdError};
use crate::writer::Writer;
use ndarray::Array1;
use tracing::{debug, info};

/// Periodic linear ramp of voltage and current.
///
/// Every repetition walks voltage from `v_start` to `v_end` and current from `i_start`
/// to `i_end` over `duration_s`. Timestamps start at 0 and continue seamlessly across
/// repetitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Sawtooth {
    pub v_start: f64,
    pub v_end: f64,
    pub i_start: f64,
    pub i_end: f64,
    /// Length of one ramp in s.
    pub duration_s: f64,
    pub repetitions: u32,
}

impl Default for Sawtooth {
    fn default() -> Self {
        Self {
            v_start: 3.6,
            v_end: 1.9,
            i_start: 100e-6,
            i_end: 2000e-6,
            duration_s: 60.0,
            repetitions: 60,
        }
    }
}

impl Sawtooth {
    /// Sawtooth with default ramps and the given timing.
    pub fn new(duration_s: f64, repetitions: u32) -> Self {
        Self {
            duration_s,
            repetitions,
            ..Self::default()
        }
    }

    /// Samples of one ramp at the given rate.
    pub fn samples_per_ramp(&self, samplerate_sps: u32) -> AppResult<usize> {
        let n = (self.duration_s * f64::from(samplerate_sps)).floor();
        if !n.is_finite() || n < 1.0 {
            return Err(ShepherdError::InvalidConfig(format!(
                "ramp of {} s at {} sps has no samples",
                self.duration_s, samplerate_sps
            )));
        }
        Ok(n as usize)
    }

    /// Value `k` of a linspace from `start` to `end` with `n` points (end inclusive).
    fn ramp(start: f64, end: f64, n: usize, k: usize) -> f64 {
        if n < 2 {
            return start;
        }
        start + (end - start) * k as f64 / (n - 1) as f64
    }

    /// Write all repetitions into `writer`, whose config must already be embedded.
    ///
    /// Returns the number of samples written.
    pub fn write_to(&self, writer: &mut Writer, samples_per_buffer: usize) -> AppResult<usize> {
        let samplerate_sps = writer
            .config()
            .map(|c| c.samplerate_sps)
            .ok_or_else(|| {
                ShepherdError::State("config must be embedded before generating data".to_string())
            })?;
        let n = self.samples_per_ramp(samplerate_sps)?;
        let interval_s = 1.0 / f64::from(samplerate_sps);
        let step = samples_per_buffer.max(1);

        info!(
            "generating sawtooth: {} x {} s at {} sps",
            self.repetitions, self.duration_s, samplerate_sps
        );
        for rep in 0..self.repetitions {
            let offset_s = f64::from(rep) * self.duration_s;
            for start in (0..n).step_by(step) {
                let end = (start + step).min(n);
                let time =
                    Array1::from_iter((start..end).map(|k| offset_s + k as f64 * interval_s));
                let current = Array1::from_iter(
                    (start..end).map(|k| Self::ramp(self.i_start, self.i_end, n, k)),
                );
                let voltage = Array1::from_iter(
                    (start..end).map(|k| Self::ramp(self.v_start, self.v_end, n, k)),
                );
                writer.append_iv_data_si(&SiBuffer::new(time, current, voltage)?, None)?;
            }
            debug!(repetition = rep, "sawtooth ramp written");
        }
        Ok(writer.samples())
    }
}
