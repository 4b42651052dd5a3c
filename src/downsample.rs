//! Downsampling of recordings into smaller sibling containers.
//!
//! Current and voltage pass an 8th order Butterworth low-pass (four cascaded biquads)
//! with the cutoff at `nyquist / factor` before every `factor`-th sample is kept.
//! Timestamps are decimated without filtering and stay in raw units. Filtering happens
//! in SI units, the result is quantized again with the calibration of the source.

use crate::buffer::RawBuffer;
use crate::calibration::CalibrationSeries;
use crate::config::{Mode, RecordingConfig};
use crate::error::{AppResult, ShepherdError};
use crate::reader::Reader;
use crate::schema::attrs;
use crate::writer::{Writer, WriterOptions};
use biquad::{Biquad, Coefficients, DirectForm1, ToHertz};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Order of the anti-aliasing filter.
pub const FILTER_ORDER: usize = 8;

/// Factors used when none is requested explicitly.
pub const DEFAULT_FACTORS: [u32; 9] = [
    5, 25, 100, 500, 2_500, 10_000, 50_000, 250_000, 1_000_000,
];

/// Results shorter than this are not worth a file.
pub const MIN_RESULT_SAMPLES: usize = 1_000;

/// Butterworth low-pass built from cascaded second-order sections.
pub struct ButterworthLowpass {
    sections: Vec<DirectForm1<f64>>,
}

impl ButterworthLowpass {
    /// Design a filter of [`FILTER_ORDER`] for sample rate `fs` and cutoff `f0` in Hz.
    pub fn new(fs: f64, f0: f64) -> AppResult<Self> {
        let n_sections = FILTER_ORDER / 2;
        let mut sections = Vec::with_capacity(n_sections);
        for k in 1..=n_sections {
            let q = Self::section_q(k);
            let coeffs =
                Coefficients::<f64>::from_params(biquad::Type::LowPass, fs.hz(), f0.hz(), q)
                    .map_err(|e| {
                        ShepherdError::InvalidConfig(format!(
                            "Failed to create low-pass coefficients (fs = {} Hz, f0 = {} Hz): {:?}",
                            fs, f0, e
                        ))
                    })?;
            sections.push(DirectForm1::<f64>::new(coeffs));
        }
        Ok(Self { sections })
    }

    /// Quality factor of section `k` (1-based), from the pole angles of the prototype.
    fn section_q(k: usize) -> f64 {
        let angle = (2 * k - 1) as f64 * std::f64::consts::PI / (2 * FILTER_ORDER) as f64;
        1.0 / (2.0 * angle.cos())
    }

    /// Filter one sample.
    pub fn run(&mut self, input: f64) -> f64 {
        self.sections.iter_mut().fold(input, |x, s| s.run(x))
    }
}

/// Path of the container downsampled by `factor`: `<stem>.downsampled_x<factor>.h5`.
pub fn downsampled_path(path: &Path, factor: u32) -> PathBuf {
    path.with_extension(format!("downsampled_x{}.h5", factor))
}

/// Decimating stream state shared across buffers.
struct Decimator {
    factor: usize,
    dest_len: usize,
    index: usize,
    kept: usize,
    current: Option<ButterworthLowpass>,
    voltage: Option<ButterworthLowpass>,
}

impl Decimator {
    fn new(factor: u32, total: usize, samplerate_sps: u32) -> AppResult<Self> {
        let factor = factor.max(1) as usize;
        let (current, voltage) = if factor > 1 {
            let fs = f64::from(samplerate_sps);
            let f0 = fs / 2.0 / factor as f64;
            (
                Some(ButterworthLowpass::new(fs, f0)?),
                Some(ButterworthLowpass::new(fs, f0)?),
            )
        } else {
            (None, None)
        };
        Ok(Self {
            factor,
            dest_len: total / factor,
            index: 0,
            kept: 0,
            current,
            voltage,
        })
    }

    /// Filter and decimate one buffer. Timestamps stay raw, only current and voltage are
    /// converted for filtering.
    fn process(&mut self, raw: &RawBuffer, cal: &CalibrationSeries) -> AppResult<RawBuffer> {
        let si = raw.to_si(cal);
        let mut time = Vec::new();
        let mut current = Vec::new();
        let mut voltage = Vec::new();
        for i in 0..raw.len() {
            // filters need every sample, also the discarded ones
            let c = match self.current.as_mut() {
                Some(f) => f.run(si.current[i]),
                None => si.current[i],
            };
            let v = match self.voltage.as_mut() {
                Some(f) => f.run(si.voltage[i]),
                None => si.voltage[i],
            };
            if self.index % self.factor == 0 && self.kept < self.dest_len {
                time.push(raw.time[i]);
                current.push(cal.current.si_to_raw_u32(c));
                voltage.push(cal.voltage.si_to_raw_u32(v));
                self.kept += 1;
            }
            self.index += 1;
        }
        RawBuffer::from_vecs(time, current, voltage)
    }
}

/// Config of a recording downsampled by `factor`.
///
/// The sample rate is divided by the factor, the window duration is kept. Fails with
/// [`ShepherdError::InvalidConfig`] if the result is not valid for `mode`, e.g. an ivcurve
/// window that would shrink below one sample.
pub fn downsampled_config(
    config: &RecordingConfig,
    mode: Mode,
    factor: u32,
) -> AppResult<RecordingConfig> {
    if factor == 0 {
        return Err(ShepherdError::InvalidConfig(
            "downsampling factor must be >= 1".to_string(),
        ));
    }
    let mut reduced = config.clone();
    reduced.samplerate_sps = (config.samplerate_sps / factor).max(1);
    reduced.validate(mode)?;
    Ok(reduced)
}

/// Downsample the recording of `reader` by `factor` into `target`.
///
/// Nothing is created if the derived config is invalid. A target that fails halfway is
/// removed again. Returns the number of samples written.
pub fn downsample_into(reader: &Reader, target: &Path, factor: u32) -> AppResult<usize> {
    let mode = reader.get_mode()?;
    let source_config = reader.get_config()?;
    let config = downsampled_config(&source_config, mode, factor)?;
    let calibration = reader.get_calibration_data()?;

    let compression = reader.compression()?.unwrap_or_default();
    let options = WriterOptions::new(mode)
        .compression(compression)
        .samples_per_buffer(reader.samples_per_buffer())
        .force_overwrite(true);
    let mut writer = Writer::create(target, options)?;
    let path = writer.path().to_path_buf();

    let result = fill_reduced(
        reader,
        &mut writer,
        &config,
        &calibration,
        factor,
        source_config.samplerate_sps,
    )
    .and_then(|()| {
        let written = writer.samples();
        writer.close().map(|()| written)
    });
    if result.is_err() && path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!("failed to remove incomplete '{}': {}", path.display(), e);
        }
    }
    result
}

fn fill_reduced(
    reader: &Reader,
    writer: &mut Writer,
    config: &RecordingConfig,
    calibration: &CalibrationSeries,
    factor: u32,
    source_samplerate: u32,
) -> AppResult<()> {
    writer.embed_config(config, calibration)?;
    writer.set_hostname(&reader.get_hostname()?)?;
    writer.set_u64_attr(attrs::DS_FACTOR, u64::from(factor))?;

    let buffers = reader.read_buffers_raw()?;
    let mut decimator = Decimator::new(factor, buffers.total_samples(), source_samplerate)?;
    for raw in buffers {
        let reduced = decimator.process(&raw?, calibration)?;
        writer.append_iv_data_raw(&reduced)?;
    }
    Ok(())
}

/// Create `<file>.downsampled_xN.h5` for every factor, skipping existing results.
///
/// Stops at the first factor whose result would hold fewer than [`MIN_RESULT_SAMPLES`]
/// or whose derived config is invalid.
pub fn downsample_file(path: &Path, factors: &[u32]) -> AppResult<Vec<PathBuf>> {
    let reader = Reader::open(path)?;
    let total = reader.samples();
    let mode = reader.get_mode()?;
    let config = reader.get_config()?;
    let mut created = Vec::new();
    for &factor in factors {
        if factor == 0 || total / (factor as usize) < MIN_RESULT_SAMPLES {
            warn!(
                "will skip downsampling {} by x{} because resulting sample-size is too small",
                path.display(),
                factor
            );
            break;
        }
        if let Err(e) = downsampled_config(&config, mode, factor) {
            warn!(
                "will skip downsampling {} by x{}: {}",
                path.display(),
                factor,
                e
            );
            break;
        }
        let target = downsampled_path(path, factor);
        if target.exists() {
            info!("{} already exists, will skip", target.display());
            continue;
        }
        info!("Downsampling '{}' by factor x{} ...", path.display(), factor);
        downsample_into(&reader, &target, factor)?;
        created.push(target);
    }
    Ok(created)
}
