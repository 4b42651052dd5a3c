//! Writer for Shepherd containers.
//!
//! A [`Writer`] owns one HDF5 file from creation until [`Writer::close`] (or drop). The
//! lifecycle is fixed:
//!
//! 1. [`Writer::create`] lays out the datasets with the chosen compression.
//! 2. [`Writer::embed_config`] stores config and calibration, once, before any data.
//! 3. `append_iv_data_*` extends the datasets; timestamps must strictly increase.
//! 4. [`Writer::close`] stamps `is_valid` and flushes.
//!
//! # Example
//!
//! ```no_run
//! use shepherd_data::{CalibrationSeries, Mode, RawBuffer, RecordingConfig, Writer, WriterOptions};
//!
//! # fn main() -> shepherd_data::AppResult<()> {
//! let mut writer = Writer::create("hrv.h5", WriterOptions::new(Mode::Harvester))?;
//! writer.embed_config(&RecordingConfig::default(), &CalibrationSeries::default())?;
//! writer.append_iv_data_raw(&RawBuffer::from_start(0, 10_000, vec![1, 2], vec![3, 4])?)?;
//! writer.close()?;
//! # Ok(())
//! # }
//! ```

use crate::buffer::{RawBuffer, SiBuffer};
use crate::calibration::CalibrationSeries;
use crate::compression::Compression;
use crate::config::{Mode, RecordingConfig};
use crate::error::{AppResult, ShepherdError};
use crate::metadata::{Metadata, MetadataBuilder};
use crate::reader::{read_calibration, read_config, FileStats};
use crate::schema::{
    self, attrs, CALIBRATION_DATASET, DATA_GROUP, IV_CHANNELS, IV_DATASET, TIME_DATASET,
};
use crate::settings::SAMPLES_PER_BUFFER_DEFAULT;
use crate::validation::{validate_container, UNKNOWN_HOSTNAME};
use hdf5::{Dataset, File};
use ndarray::{s, Array2};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Options for a newly created container.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Recording mode stored in the `mode` attribute.
    pub mode: Mode,
    /// Compression of the sample datasets.
    pub compression: Compression,
    /// Chunk length of the sample datasets.
    pub samples_per_buffer: usize,
    /// Replace an existing file instead of picking a unique sibling path.
    pub force_overwrite: bool,
}

impl WriterOptions {
    /// Defaults for the given mode.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            compression: Compression::default(),
            samples_per_buffer: SAMPLES_PER_BUFFER_DEFAULT,
            force_overwrite: false,
        }
    }

    /// Set the compression.
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Set the chunk length.
    pub fn samples_per_buffer(mut self, samples: usize) -> Self {
        self.samples_per_buffer = samples;
        self
    }

    /// Overwrite an existing file.
    pub fn force_overwrite(mut self, force: bool) -> Self {
        self.force_overwrite = force;
        self
    }
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self::new(Mode::Harvester)
    }
}

/// Find an unused sibling path `stem.N.ext`, counting up from 0.
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    let mut counter = 0u32;
    loop {
        let candidate = path.with_file_name(format!("{}.{}{}", stem, counter, ext));
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

macro_rules! with_compression {
    ($builder:expr, $compression:expr) => {
        match $compression {
            Compression::None => $builder,
            Compression::Lzf => $builder.lzf(),
            Compression::Gzip(level) => $builder.deflate(level),
        }
    };
}

/// Write access to one container.
pub struct Writer {
    file: File,
    path: PathBuf,
    mode: Mode,
    compression: Compression,
    samples_per_buffer: usize,
    ds_time: Dataset,
    ds_iv: Dataset,
    config: Option<RecordingConfig>,
    calibration: Option<CalibrationSeries>,
    samples: usize,
    last_timestamp: Option<u64>,
    /// Set by the first `append_*` call, even for an empty batch.
    appended: bool,
    finalized: bool,
}

impl Writer {
    /// Create a new container.
    ///
    /// If `path` exists and `force_overwrite` is not set, the data is stored under a
    /// unique sibling path instead, see [`unique_path`].
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> AppResult<Self> {
        let compression = options.compression.validate()?;
        if options.samples_per_buffer == 0 {
            return Err(ShepherdError::InvalidConfig(
                "samples_per_buffer must be > 0".to_string(),
            ));
        }

        let requested = path.as_ref();
        let path = if options.force_overwrite {
            requested.to_path_buf()
        } else {
            unique_path(requested)
        };
        if path != requested {
            warn!(
                "File {} already exists -> storing under {} instead",
                requested.display(),
                path.display()
            );
        }
        info!("Storing data to '{}'", path.display());

        let file = File::create(&path)?;
        schema::write_str_attr(&file, attrs::MODE, options.mode.as_str())?;
        let host = hostname::get()
            .map(|h| h.to_string_lossy().trim().to_string())
            .unwrap_or_else(|_| UNKNOWN_HOSTNAME.to_string());
        MetadataBuilder::new()
            .hostname(&host)
            .stamped()
            .build()
            .write_to(&file)?;

        let data = file.create_group(DATA_GROUP)?;
        let spb = options.samples_per_buffer;

        let builder = data.new_dataset::<u64>().chunk(spb);
        let ds_time = with_compression!(builder, compression)
            .shape(0..)
            .create(TIME_DATASET)?;
        schema::write_str_attr(&ds_time, attrs::UNIT, "ns")?;
        schema::write_str_attr(&ds_time, attrs::DESCRIPTION, "system time [ns]")?;

        let builder = data.new_dataset::<u32>().chunk((IV_CHANNELS, spb));
        let ds_iv = with_compression!(builder, compression)
            .shape((IV_CHANNELS, 0..))
            .create(IV_DATASET)?;
        schema::write_str_attr(&ds_iv, attrs::UNIT, "A, V")?;
        schema::write_str_attr(
            &ds_iv,
            attrs::DESCRIPTION,
            "row 0: current [A], row 1: voltage [V]; value * gain + offset",
        )?;

        Ok(Self {
            file,
            path,
            mode: options.mode,
            compression,
            samples_per_buffer: spb,
            ds_time,
            ds_iv,
            config: None,
            calibration: None,
            samples: 0,
            last_timestamp: None,
            appended: false,
            finalized: false,
        })
    }

    /// Open an existing container to append more data.
    ///
    /// The datasets keep their compression; config and calibration are taken from the file.
    pub fn open_existing(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open_rw(&path)?;
        let mode = schema::read_str_attr(&file, attrs::MODE)?
            .ok_or_else(|| ShepherdError::MissingData("attribute 'mode' not found".to_string()))?
            .parse::<Mode>()?;
        let ds_time = schema::open_time(&file)?;
        let ds_iv = schema::open_iv(&file)?;

        let samples = ds_time.shape()[0];
        if ds_iv.shape()[1] != samples {
            return Err(ShepherdError::Format(format!(
                "time has {} samples, iv {}",
                samples,
                ds_iv.shape()[1]
            )));
        }
        let last_timestamp = if samples > 0 {
            Some(ds_time.read_slice_1d::<u64, _>(samples - 1..samples)?[0])
        } else {
            None
        };
        let compression = Compression::detect(&ds_time.filters()).ok_or_else(|| {
            ShepherdError::Format(format!(
                "unsupported filter pipeline {:?} on '{}'",
                ds_time.filters(),
                TIME_DATASET
            ))
        })?;
        let samples_per_buffer = ds_time
            .chunk()
            .and_then(|c| c.first().copied())
            .unwrap_or(SAMPLES_PER_BUFFER_DEFAULT);
        let config = read_config(&file)?;
        let calibration = match file.dataset(CALIBRATION_DATASET) {
            Ok(_) => Some(read_calibration(&file)?),
            Err(_) => None,
        };
        info!(
            "Extending '{}' ({} samples, mode = {})",
            path.display(),
            samples,
            mode
        );

        Ok(Self {
            file,
            path,
            mode,
            compression,
            samples_per_buffer,
            ds_time,
            ds_iv,
            config,
            calibration,
            samples,
            last_timestamp,
            appended: samples > 0,
            finalized: false,
        })
    }

    /// Store recording config and calibration.
    ///
    /// Allowed exactly once and only before the first append.
    pub fn embed_config(
        &mut self,
        config: &RecordingConfig,
        calibration: &CalibrationSeries,
    ) -> AppResult<()> {
        if self.config.is_some() || self.calibration.is_some() {
            return Err(ShepherdError::State(
                "configuration was already embedded".to_string(),
            ));
        }
        if self.appended {
            return Err(ShepherdError::State(format!(
                "configuration must be embedded before data, {} samples already written",
                self.samples
            )));
        }
        config.validate(self.mode)?;
        calibration.validate()?;

        schema::write_str_attr(&self.file, attrs::CONFIG, &config.to_yaml()?)?;
        let rows = Array2::from(calibration.to_rows().to_vec());
        let ds = self
            .file
            .new_dataset::<f64>()
            .shape((CalibrationSeries::CHANNELS.len(), 2))
            .create(CALIBRATION_DATASET)?;
        ds.write(&rows)?;
        schema::write_str_attr(
            &ds,
            attrs::DESCRIPTION,
            "rows: current, voltage, time; cols: gain, offset",
        )?;

        let mut meta = MetadataBuilder::new();
        if let Some(source) = &config.source {
            meta = meta.source(source);
        }
        if let Some(description) = &config.description {
            meta = meta.description(description);
        }
        meta.build().write_to(&self.file)?;

        debug!(datatype = %config.datatype, "embedded config");
        self.config = Some(config.clone());
        self.calibration = Some(*calibration);
        Ok(())
    }

    /// Append raw samples.
    pub fn append_iv_data_raw(&mut self, buffer: &RawBuffer) -> AppResult<()> {
        self.appended = true;
        buffer.check_shape()?;
        if buffer.is_empty() {
            return Ok(());
        }
        if !buffer.is_monotonic_after(self.last_timestamp) {
            return Err(ShepherdError::State(format!(
                "timestamps must strictly increase (last written: {:?}, batch starts at {})",
                self.last_timestamp, buffer.time[0]
            )));
        }

        let start = self.samples;
        let end = start + buffer.len();
        self.ds_time.resize((end,))?;
        self.ds_time.write_slice(&buffer.time, start..end)?;
        self.ds_iv.resize((IV_CHANNELS, end))?;
        self.ds_iv.write_slice(&buffer.iv, s![.., start..end])?;

        self.samples = end;
        self.last_timestamp = buffer.time.last().copied();
        Ok(())
    }

    /// Append samples in SI units, quantized with the given or the embedded calibration.
    pub fn append_iv_data_si(
        &mut self,
        buffer: &SiBuffer,
        calibration: Option<&CalibrationSeries>,
    ) -> AppResult<()> {
        self.appended = true;
        let cal = calibration
            .or(self.calibration.as_ref())
            .copied()
            .ok_or_else(|| {
                ShepherdError::Calibration(
                    "no calibration supplied and none embedded".to_string(),
                )
            })?;
        cal.validate()?;
        let raw = buffer.to_raw(&cal)?;
        self.append_iv_data_raw(&raw)
    }

    /// Set the `hostname` attribute.
    pub fn set_hostname(&mut self, name: &str) -> AppResult<()> {
        schema::write_str_attr(&self.file, attrs::HOSTNAME, name)
    }

    /// Store descriptive metadata as root attributes.
    pub fn save_metadata(&mut self, metadata: &Metadata) -> AppResult<()> {
        metadata.write_to(&self.file)
    }

    /// Set an unsigned integer root attribute, e.g. `ds_factor`.
    pub fn set_u64_attr(&mut self, name: &str, value: u64) -> AppResult<()> {
        schema::write_u64_attr(&self.file, name, value)
    }

    /// Structural validity, see [`crate::validation::validate_container`].
    pub fn is_valid(&self) -> bool {
        validate_container(&self.file, self.samples_per_buffer).is_valid()
    }

    /// Samples written so far.
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Target path of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Recording mode.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Compression of the sample datasets.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Embedded config, if any.
    pub fn config(&self) -> Option<&RecordingConfig> {
        self.config.as_ref()
    }

    /// Access to the underlying file, for auxiliary groups.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Stamp validity, flush and log the file statistics.
    pub fn close(mut self) -> AppResult<()> {
        self.finalize()
    }

    fn finalize(&mut self) -> AppResult<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;
        let valid = self.is_valid();
        schema::write_bool_attr(&self.file, attrs::IS_VALID, valid)?;
        self.file.flush()?;

        let samplerate = self
            .config
            .as_ref()
            .map(|c| c.samplerate_sps)
            .unwrap_or(crate::config::SAMPLERATE_SPS_DEFAULT);
        let stats = FileStats::collect(&self.path, self.samples, samplerate);
        info!(
            "closing hdf5 file, {} s iv-data, size = {:.3} MiB, rate = {:.0} KiB/s",
            stats.runtime_s,
            stats.file_size as f64 / f64::from(1u32 << 20),
            stats.data_rate / 1024.0
        );
        Ok(())
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!("failed to finalize '{}': {}", self.path.display(), e);
        }
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("compression", &self.compression)
            .field("samples", &self.samples)
            .finish()
    }
}
