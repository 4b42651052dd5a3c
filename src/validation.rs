//! Plausibility checks for containers.
//!
//! Hard criteria make a container invalid and are logged with `error!`. Soft criteria
//! only produce a `warn!`; the container stays usable.

use crate::calibration::CalibrationSeries;
use crate::compression::{Compression, GZIP_LEVEL};
use crate::config::{Datatype, Mode, RecordingConfig};
use crate::schema::{self, attrs, CALIBRATION_DATASET, DATA_GROUP};
use hdf5::filters::Filter;
use hdf5::Group;
use tracing::{error, warn};

/// Hostname written when none could be determined.
pub const UNKNOWN_HOSTNAME: &str = "unknown";

/// Outcome of [`validate_container`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    /// First hard criterion that failed, if any.
    pub error: Option<String>,
    /// Soft criteria that failed.
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// True if no hard criterion failed.
    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    fn fail(mut self, message: String) -> Self {
        error!("{} (@Validator)", message);
        self.error = Some(message);
        self
    }

    fn warn(&mut self, message: String) {
        warn!("{} (@Validator)", message);
        self.warnings.push(message);
    }
}

/// Check a container for plausibility.
///
/// Hard criteria: data group, supported `mode`, parseable `config` whose datatype fits the
/// mode, positive window for ivcurves, well-formed `time` / `iv` datasets and a consistent
/// calibration.
///
/// Soft criteria: equal dataset lengths, length aligned to the buffer size, window
/// set for a non-ivcurve datatype, supported compression, hostname present.
///
/// The buffer size is the chunk length of `time`. `samples_per_buffer` only applies to
/// contiguous datasets.
pub fn validate_container(root: &Group, samples_per_buffer: usize) -> ValidationReport {
    let mut report = ValidationReport::default();

    if root.group(DATA_GROUP).is_err() {
        return report.fail("root data-group not found".to_string());
    }

    let mode = match schema::read_str_attr(root, attrs::MODE) {
        Ok(Some(mode)) => mode,
        Ok(None) => return report.fail("attribute 'mode' not found in file".to_string()),
        Err(e) => return report.fail(e.to_string()),
    };
    let mode = match mode.parse::<Mode>() {
        Ok(mode) => mode,
        Err(_) => return report.fail(format!("unsupported mode '{}'", mode)),
    };

    let config = match schema::read_str_attr(root, attrs::CONFIG) {
        Ok(Some(yaml)) => match RecordingConfig::from_yaml(&yaml) {
            Ok(config) => config,
            Err(e) => return report.fail(e.to_string()),
        },
        Ok(None) => return report.fail("attribute 'config' not found in file".to_string()),
        Err(e) => return report.fail(e.to_string()),
    };
    if !mode.supported_datatypes().contains(&config.datatype) {
        return report.fail(format!(
            "unsupported type '{}' for mode '{}'",
            config.datatype, mode
        ));
    }
    if config.datatype == Datatype::IvCurve {
        if let Err(e) = config.window_samples() {
            return report.fail(format!("window is invalid for ivcurves-datatype: {}", e));
        }
    } else if config.window_duration_s.is_some() {
        report.warn(format!(
            "window duration is set despite datatype '{}'",
            config.datatype
        ));
    }

    let ds_time = match schema::open_time(root) {
        Ok(ds) => ds,
        Err(e) => return report.fail(e.to_string()),
    };
    let ds_iv = match schema::open_iv(root) {
        Ok(ds) => ds,
        Err(e) => return report.fail(e.to_string()),
    };

    match root
        .dataset(CALIBRATION_DATASET)
        .and_then(|ds| ds.read_2d::<f64>())
    {
        Ok(arr) => {
            if arr.ncols() != 2 {
                return report.fail(format!(
                    "calibration must have 2 columns (gain, offset), has {}",
                    arr.ncols()
                ));
            }
            let rows: Vec<[f64; 2]> = arr.rows().into_iter().map(|r| [r[0], r[1]]).collect();
            if let Err(e) = CalibrationSeries::from_rows(&rows) {
                return report.fail(e.to_string());
            }
        }
        Err(_) => return report.fail("calibration dataset not found".to_string()),
    }

    let time_len = ds_time.shape()[0];
    let iv_len = ds_iv.shape()[1];
    if time_len != iv_len {
        report.warn(format!(
            "dataset 'iv' has different size (={}), compared to time-ds (={})",
            iv_len, time_len
        ));
    }
    let buffer_len = ds_time
        .chunk()
        .and_then(|c| c.first().copied())
        .filter(|&n| n > 0)
        .unwrap_or(samples_per_buffer);
    if buffer_len > 0 && time_len % buffer_len != 0 {
        report.warn("datasets are not aligned with buffer-size".to_string());
    }

    for (name, ds) in [("time", &ds_time), ("iv", &ds_iv)] {
        let filters = ds.filters();
        if Compression::detect(&filters).is_none() {
            match filters.iter().find_map(|f| match f {
                Filter::Deflate(level) => Some(*level),
                _ => None,
            }) {
                Some(level) if level > GZIP_LEVEL => report.warn(format!(
                    "gzip compression of '{}' is too high ({} > {}) for BBone",
                    name, level, GZIP_LEVEL
                )),
                _ => report.warn(format!(
                    "unsupported compression of '{}' found ({:?}), expected none, lzf or gzip",
                    name, filters
                )),
            }
        }
    }

    match schema::read_str_attr(root, attrs::HOSTNAME) {
        Ok(Some(host)) if host != UNKNOWN_HOSTNAME && !host.is_empty() => {}
        _ => report.warn("Hostname was not set".to_string()),
    }

    report
}
