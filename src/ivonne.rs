//! Conversion of IVonne recordings into Shepherd containers.
//!
//! IVonne samples a solar cell at 50 Hz and describes every sample by the three
//! coefficients of a simple diode model, `i(v) = a - b * (exp(c * v) - 1)`. Input is a
//! CSV file with the header `time,a,b,c` (time in s).

use crate::buffer::SiBuffer;
use crate::calibration::CalibrationSeries;
use crate::config::{Datatype, Mode, RecordingConfig, SAMPLERATE_SPS_DEFAULT};
use crate::error::{AppResult, ShepherdError};
use crate::writer::{Writer, WriterOptions};
use ndarray::Array1;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Sample rate of IVonne recordings.
pub const IVONNE_SAMPLERATE_SPS: u32 = 50;

/// Diode model coefficients of one IVonne sample.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct IvCoefficients {
    /// Time in s.
    pub time: f64,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl IvCoefficients {
    /// Current at load voltage `v`, never negative.
    pub fn current(&self, v: f64) -> f64 {
        (self.a - self.b * ((self.c * v).exp() - 1.0)).max(0.0)
    }

    /// Open-circuit voltage.
    pub fn voc(&self) -> f64 {
        (self.a / self.b + 1.0).ln() / self.c
    }

    /// Short-circuit current.
    pub fn isc(&self) -> f64 {
        self.a
    }

    fn lerp(&self, other: &Self, time: f64) -> Self {
        let span = other.time - self.time;
        let w = if span > 0.0 { (time - self.time) / span } else { 0.0 };
        Self {
            time,
            a: self.a + (other.a - self.a) * w,
            b: self.b + (other.b - self.b) * w,
            c: self.c + (other.c - self.c) * w,
        }
    }
}

/// Parameters of [`IvonneReader::convert_to_ivcurves`].
#[derive(Debug, Clone, PartialEq)]
pub struct IvCurveParams {
    /// Upper end of every voltage sweep in V.
    pub v_max: f64,
    /// Samples per sweep, the window size of the result.
    pub pts_per_curve: u32,
    /// Trim the input to this length.
    pub duration_s: Option<f64>,
    /// Sample rate of the result.
    pub samplerate_sps: u32,
}

impl Default for IvCurveParams {
    fn default() -> Self {
        Self {
            v_max: 5.0,
            pts_per_curve: 1_000,
            duration_s: None,
            samplerate_sps: SAMPLERATE_SPS_DEFAULT,
        }
    }
}

/// A loaded IVonne recording.
#[derive(Debug, Clone)]
pub struct IvonneReader {
    path: PathBuf,
    samples: Vec<IvCoefficients>,
}

impl IvonneReader {
    /// Read and check the CSV file.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut reader = csv::Reader::from_path(&path)?;
        let samples = reader
            .deserialize::<IvCoefficients>()
            .collect::<Result<Vec<_>, _>>()?;
        if samples.windows(2).any(|w| w[1].time <= w[0].time) {
            return Err(ShepherdError::Format(format!(
                "'{}': time column must strictly increase",
                path.display()
            )));
        }

        let ivonne = Self { path, samples };
        let file_size = std::fs::metadata(&ivonne.path)?.len();
        let runtime_s = ivonne.runtime_s();
        let data_rate = if runtime_s > 0.0 { file_size as f64 / runtime_s } else { 0.0 };
        info!(
            "[IVonneReader] Reading data from '{}', runtime = {} s, size = {:.3} KiB, rate = {:.3} KiB/s",
            ivonne.path.display(),
            runtime_s,
            file_size as f64 / 1024.0,
            data_rate / 1024.0
        );
        Ok(ivonne)
    }

    /// Build a reader from samples already in memory.
    pub fn from_samples(path: impl Into<PathBuf>, samples: Vec<IvCoefficients>) -> Self {
        Self {
            path: path.into(),
            samples,
        }
    }

    pub fn samples(&self) -> &[IvCoefficients] {
        &self.samples
    }

    /// Runtime in s, rounded to ms.
    pub fn runtime_s(&self) -> f64 {
        let runtime = self.samples.len() as f64 / f64::from(IVONNE_SAMPLERATE_SPS);
        (runtime * 1000.0).round() / 1000.0
    }

    fn trimmed(&self, duration_s: Option<f64>) -> &[IvCoefficients] {
        match duration_s {
            Some(d) if d >= 0.0 && self.runtime_s() > d => {
                let n = (d * f64::from(IVONNE_SAMPLERATE_SPS)) as usize;
                info!("  -> gets trimmed to {} s", d);
                &self.samples[..n.min(self.samples.len())]
            }
            _ => &self.samples,
        }
    }

    fn source(&self) -> String {
        format!("IVonne recording '{}'", self.path.display())
    }

    /// Diode coefficients linearly interpolated at `count` equidistant points, starting
    /// with the first sample.
    fn resample(input: &[IvCoefficients], interval_s: f64) -> Vec<IvCoefficients> {
        let Some(first) = input.first() else {
            return Vec::new();
        };
        let Some(last) = input.last() else {
            return Vec::new();
        };
        let count = ((last.time - first.time) / interval_s).floor() as usize + 1;
        let mut out = Vec::with_capacity(count);
        let mut idx = 0;
        for j in 0..count {
            let t = first.time + j as f64 * interval_s;
            while idx + 1 < input.len() && input[idx + 1].time <= t {
                idx += 1;
            }
            let coeffs = match input.get(idx + 1) {
                Some(next) => input[idx].lerp(next, t),
                None => IvCoefficients { time: t, ..input[idx] },
            };
            out.push(coeffs);
        }
        out
    }

    /// Convert into a harvester container of IV curves, one voltage sweep from 0 to
    /// `v_max` per window.
    ///
    /// Returns the number of curves written.
    pub fn convert_to_ivcurves(
        &self,
        output: &Path,
        params: &IvCurveParams,
        options: WriterOptions,
    ) -> AppResult<usize> {
        if params.pts_per_curve < 2 || params.samplerate_sps == 0 {
            return Err(ShepherdError::InvalidConfig(format!(
                "an IV curve needs at least 2 points at a nonzero rate, got {} at {} sps",
                params.pts_per_curve, params.samplerate_sps
            )));
        }
        let pts = params.pts_per_curve as usize;
        let interval_s = 1.0 / f64::from(params.samplerate_sps);
        let curve_interval_s = pts as f64 * interval_s;
        let input = self.trimmed(params.duration_s);
        let curves = Self::resample(input, curve_interval_s);
        let t0 = input.first().map_or(0.0, |c| c.time);

        let config =
            RecordingConfig::ivcurve(u64::from(params.pts_per_curve), params.samplerate_sps)
                .with_source(self.source());
        let options = WriterOptions {
            mode: Mode::Harvester,
            ..options
        };
        let mut writer = Writer::create(output, options)?;
        writer.embed_config(&config, &CalibrationSeries::default())?;

        let v_proto = Array1::linspace(0.0, params.v_max, pts);
        for coeffs in &curves {
            let start = coeffs.time - t0;
            let time = Array1::from_iter((0..pts).map(|k| start + k as f64 * interval_s));
            let current = v_proto.mapv(|v| coeffs.current(v));
            writer.append_iv_data_si(&SiBuffer::new(time, current, v_proto.clone())?, None)?;
        }
        debug!(curves = curves.len(), "ivcurves generated");
        writer.close()?;
        Ok(curves.len())
    }

    /// Convert into a harvester container holding `(isc, voc)` pairs at the IVonne rate,
    /// stored as current and voltage.
    ///
    /// Returns the number of samples written.
    pub fn convert_to_isc_voc(
        &self,
        output: &Path,
        duration_s: Option<f64>,
        options: WriterOptions,
    ) -> AppResult<usize> {
        let input = self.trimmed(duration_s);
        let t0 = input.first().map_or(0.0, |c| c.time);
        let config = RecordingConfig {
            datatype: Datatype::IscVoc,
            samplerate_sps: IVONNE_SAMPLERATE_SPS,
            ..RecordingConfig::default()
        }
        .with_source(self.source());
        let samples_per_buffer = options.samples_per_buffer.max(1);
        let options = WriterOptions {
            mode: Mode::Harvester,
            ..options
        };
        let mut writer = Writer::create(output, options)?;
        writer.embed_config(&config, &CalibrationSeries::default())?;

        for chunk in input.chunks(samples_per_buffer) {
            let time = Array1::from_iter(chunk.iter().map(|c| c.time - t0));
            let current = Array1::from_iter(chunk.iter().map(IvCoefficients::isc));
            let voltage = Array1::from_iter(chunk.iter().map(IvCoefficients::voc));
            writer.append_iv_data_si(&SiBuffer::new(time, current, voltage)?, None)?;
        }
        let written = writer.samples();
        writer.close()?;
        Ok(written)
    }
}
