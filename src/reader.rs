//! Read access to Shepherd containers.
//!
//! A [`Reader`] holds the file open for its whole lifetime. Opening never fails because
//! of content problems: an invalid container is reported through the log and the
//! individual getters return the matching error.

use crate::buffer::{RawBuffer, SiBuffer};
use crate::calibration::CalibrationSeries;
use crate::compression::Compression;
use crate::config::{Datatype, Mode, RecordingConfig, SAMPLERATE_SPS_DEFAULT};
use crate::error::{AppResult, ShepherdError};
use crate::metadata::{
    attr_to_yaml, DatasetInfo, GroupInfo, Metadata, NodeSummary, Statistics,
    StatisticsAccumulator,
};
use crate::schema::{self, attrs, CALIBRATION_DATASET, DATA_GROUP, ROW_CURRENT, ROW_VOLTAGE};
use crate::settings::SAMPLES_PER_BUFFER_DEFAULT;
use crate::validation::{validate_container, ValidationReport, UNKNOWN_HOSTNAME};
use hdf5::types::TypeDescriptor;
use hdf5::{Dataset, File, Group, Location};
use ndarray::s;
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Buffers processed per step when scanning whole datasets.
const BUFFERS_PER_SCAN: usize = 40;

/// Size and throughput figures of a container.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FileStats {
    /// Recorded duration in s, rounded to 0.1 s.
    pub runtime_s: f64,
    /// File size in bytes.
    pub file_size: u64,
    /// Bytes per second of recording.
    pub data_rate: f64,
}

impl FileStats {
    /// Compute the figures for `samples` at `samplerate_sps`.
    pub fn collect(path: &Path, samples: usize, samplerate_sps: u32) -> Self {
        let runtime_s = (samples as f64 / f64::from(samplerate_sps.max(1)) * 10.0).round() / 10.0;
        let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
        let data_rate = if runtime_s > 0.0 {
            file_size as f64 / runtime_s
        } else {
            0.0
        };
        Self {
            runtime_s,
            file_size,
            data_rate,
        }
    }
}

/// Parse the `config` attribute, `None` if absent.
pub fn read_config(root: &Location) -> AppResult<Option<RecordingConfig>> {
    match schema::read_str_attr(root, attrs::CONFIG)? {
        Some(yaml) => Ok(Some(RecordingConfig::from_yaml(&yaml)?)),
        None => Ok(None),
    }
}

/// Read and validate the `/calibration` dataset.
pub fn read_calibration(root: &Group) -> AppResult<CalibrationSeries> {
    let ds = root.dataset(CALIBRATION_DATASET).map_err(|_| {
        ShepherdError::MissingData(format!("dataset '/{}' not found", CALIBRATION_DATASET))
    })?;
    let arr = ds.read_2d::<f64>()?;
    if arr.ncols() != 2 {
        return Err(ShepherdError::Format(format!(
            "calibration must have 2 columns (gain, offset), has shape {:?}",
            arr.shape()
        )));
    }
    let rows: Vec<[f64; 2]> = arr.rows().into_iter().map(|r| [r[0], r[1]]).collect();
    CalibrationSeries::from_rows(&rows)
}

/// Read access to one container.
pub struct Reader {
    file: File,
    path: PathBuf,
    writable: bool,
    samples_per_buffer: usize,
}

impl Reader {
    /// Open read-only.
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self::announce(file, path, false))
    }

    /// Open with write access, needed for [`Reader::save_metadata`].
    pub fn open_rw(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open_rw(&path)?;
        Ok(Self::announce(file, path, true))
    }

    fn announce(file: File, path: PathBuf, writable: bool) -> Self {
        let reader = Self {
            file,
            path,
            writable,
            samples_per_buffer: SAMPLES_PER_BUFFER_DEFAULT,
        };
        if reader.is_valid() {
            info!("File is available now");
        } else {
            error!("File is faulty! Will try to open but there might be dragons");
        }
        let stats = reader.file_stats();
        info!(
            path = %reader.path.display(),
            runtime_s = stats.runtime_s,
            mode = %reader.get_mode().map(|m| m.to_string()).unwrap_or_default(),
            size_mib = stats.file_size as f64 / f64::from(1u32 << 20),
            rate_kib_s = stats.data_rate / 1024.0,
            "Reading data"
        );
        reader
    }

    /// Change the number of samples per buffer handed out by the iterators.
    pub fn with_samples_per_buffer(mut self, samples: usize) -> Self {
        self.samples_per_buffer = samples.max(1);
        self
    }

    /// Samples per buffer of the iterators.
    pub fn samples_per_buffer(&self) -> usize {
        self.samples_per_buffer
    }

    /// Path of the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Underlying file, e.g. for auxiliary groups.
    pub fn file(&self) -> &File {
        &self.file
    }

    /// Iterate over all raw buffers in file order.
    ///
    /// Every call starts from the beginning. The last buffer may be shorter.
    pub fn read_buffers_raw(&self) -> AppResult<RawBuffers<'_>> {
        self.read_buffers_raw_range(0, None)
    }

    /// Iterate over the raw buffers with index `start..end`.
    pub fn read_buffers_raw_range(
        &self,
        start: usize,
        end: Option<usize>,
    ) -> AppResult<RawBuffers<'_>> {
        let ds_time = schema::open_time(&self.file)?;
        let ds_iv = schema::open_iv(&self.file)?;
        let time_len = ds_time.shape()[0];
        let iv_len = ds_iv.shape()[1];
        if time_len != iv_len {
            warn!(
                "time has {} samples, iv {} -> reading only the common part",
                time_len, iv_len
            );
        }
        let total = time_len.min(iv_len);
        let n_buffers = total.div_ceil(self.samples_per_buffer);
        let end = end.map_or(n_buffers, |e| e.min(n_buffers));
        debug!("Reading blocks from {} to {} from source-file", start, end);
        Ok(RawBuffers {
            ds_time,
            ds_iv,
            samples_per_buffer: self.samples_per_buffer,
            total,
            next: start,
            end,
            _reader: PhantomData,
        })
    }

    /// Iterate over all buffers converted to SI units.
    pub fn read_buffers_si(&self) -> AppResult<SiBuffers<'_>> {
        let calibration = self.get_calibration_data()?;
        Ok(SiBuffers {
            raw: self.read_buffers_raw()?,
            calibration,
        })
    }

    /// Calibration of all channels.
    pub fn get_calibration_data(&self) -> AppResult<CalibrationSeries> {
        read_calibration(&self.file)
    }

    /// Embedded recording config.
    pub fn get_config(&self) -> AppResult<RecordingConfig> {
        read_config(&self.file)?
            .ok_or_else(|| ShepherdError::MissingData("attribute 'config' not found".to_string()))
    }

    /// Samples per ivcurve window, derived from the config.
    pub fn get_window_samples(&self) -> AppResult<u64> {
        self.get_config()?.window_samples()
    }

    /// Recording mode.
    pub fn get_mode(&self) -> AppResult<Mode> {
        schema::read_str_attr(&self.file, attrs::MODE)?
            .ok_or_else(|| ShepherdError::MissingData("attribute 'mode' not found".to_string()))?
            .parse()
    }

    /// Datatype from the config.
    pub fn get_datatype(&self) -> AppResult<Datatype> {
        Ok(self.get_config()?.datatype)
    }

    /// Hostname of the recording node, `unknown` if never set.
    pub fn get_hostname(&self) -> AppResult<String> {
        Ok(schema::read_str_attr(&self.file, attrs::HOSTNAME)?
            .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string()))
    }

    /// Run the validator and return its findings.
    pub fn validate(&self) -> ValidationReport {
        validate_container(&self.file, self.samples_per_buffer)
    }

    /// True if the container passes all hard criteria.
    pub fn is_valid(&self) -> bool {
        self.validate().is_valid()
    }

    /// Descriptive metadata stored at the root.
    pub fn get_metadata(&self) -> AppResult<Metadata> {
        Metadata::read_from(&self.file)
    }

    /// Store descriptive metadata, requires [`Reader::open_rw`].
    pub fn save_metadata(&self, metadata: &Metadata) -> AppResult<()> {
        if !self.writable {
            return Err(ShepherdError::State(format!(
                "'{}' was opened read-only",
                self.path.display()
            )));
        }
        metadata.write_to(&self.file)?;
        self.file.flush()?;
        Ok(())
    }

    /// Number of stored samples, 0 if the timestamp dataset is unusable.
    pub fn samples(&self) -> usize {
        schema::open_time(&self.file)
            .map(|ds| ds.shape()[0])
            .unwrap_or(0)
    }

    /// Sample rate from the config, else derived from the first two timestamps.
    pub fn samplerate_sps(&self) -> u32 {
        if let Ok(Some(config)) = read_config(&self.file) {
            return config.samplerate_sps;
        }
        let derived = schema::open_time(&self.file)
            .ok()
            .filter(|ds| ds.shape()[0] > 1)
            .and_then(|ds| ds.read_slice_1d::<u64, _>(0..2).ok())
            .and_then(|t| {
                let gain = self
                    .get_calibration_data()
                    .map(|c| c.time.gain)
                    .unwrap_or(1e-9);
                let interval_s = t[1].saturating_sub(t[0]) as f64 * gain;
                (interval_s > 0.0).then(|| (1.0 / interval_s).round().max(1.0) as u32)
            });
        derived.unwrap_or(SAMPLERATE_SPS_DEFAULT)
    }

    /// Runtime, size and data rate.
    pub fn file_stats(&self) -> FileStats {
        FileStats::collect(&self.path, self.samples(), self.samplerate_sps())
    }

    /// Recorded duration in s.
    pub fn runtime_s(&self) -> f64 {
        self.file_stats().runtime_s
    }

    /// File size in bytes.
    pub fn file_size(&self) -> u64 {
        self.file_stats().file_size
    }

    /// Bytes per second of recording.
    pub fn data_rate(&self) -> f64 {
        self.file_stats().data_rate
    }

    /// Compression of the sample datasets, `None` for a pipeline this library never writes.
    pub fn compression(&self) -> AppResult<Option<Compression>> {
        Ok(Compression::detect(&schema::open_time(&self.file)?.filters()))
    }

    /// Recorded energy in Ws.
    pub fn energy(&self) -> AppResult<f64> {
        let interval_s = 1.0 / f64::from(self.samplerate_sps());
        let mut energy = 0.0;
        for buffer in self.read_buffers_si()? {
            energy += buffer?.power().sum() * interval_s;
        }
        Ok(energy)
    }

    /// Distinct time steps between buffer starts, normalized to one sample, in s.
    pub fn data_timediffs(&self) -> AppResult<Vec<f64>> {
        let ds_time = schema::open_time(&self.file)?;
        let cal = self.get_calibration_data()?;
        let total = ds_time.shape()[0];
        let spb = self.samples_per_buffer;
        let step = spb * BUFFERS_PER_SCAN;

        let mut diffs_us = BTreeSet::new();
        let mut previous: Option<u64> = None;
        for chunk_start in (0..total).step_by(step) {
            let chunk_end = (chunk_start + step).min(total);
            let chunk = ds_time.read_slice_1d::<u64, _>(chunk_start..chunk_end)?;
            for &t in chunk.iter().step_by(spb) {
                if let Some(prev) = previous {
                    let diff_s = cal.time.gain * t.wrapping_sub(prev) as f64 / spb as f64;
                    diffs_us.insert((diff_s * 1e6).round() as i64);
                }
                previous = Some(t);
            }
        }
        Ok(diffs_us.into_iter().map(|us| us as f64 / 1e6).collect())
    }

    /// True if all buffers are equally spaced in time.
    pub fn check_timediffs(&self) -> AppResult<bool> {
        let diffs = self.data_timediffs()?;
        if diffs.len() > 1 {
            warn!(
                "Time-jumps detected -> expected equal steps, but got: {:?} s",
                diffs
            );
        }
        Ok(diffs.len() <= 1)
    }

    /// Recursive structure of the container. `minimal` skips statistics.
    pub fn summary(&self, minimal: bool) -> AppResult<NodeSummary> {
        self.file.flush()?;
        self.summarize_group(&self.file, "/", minimal)
    }

    /// Write the summary as YAML next to the container (`<file>.yml`).
    ///
    /// An existing sidecar is left untouched and `None` returned.
    pub fn export_metadata_yaml(&self) -> AppResult<Option<PathBuf>> {
        let yml = self.path.with_extension("yml");
        if yml.exists() {
            info!("{} already exists, will skip", yml.display());
            return Ok(None);
        }
        let yaml = self.summary(false)?.to_yaml()?;
        std::fs::write(&yml, yaml)?;
        Ok(Some(yml))
    }

    fn summarize_group(&self, group: &Group, name: &str, minimal: bool) -> AppResult<NodeSummary> {
        let mut node = NodeSummary {
            attributes: attributes_as_yaml(group)?,
            ..NodeSummary::default()
        };
        if name == format!("/{}", DATA_GROUP) && !minimal {
            let stats = self.file_stats();
            node.group_info = Some(GroupInfo {
                energy_ws: self.energy().unwrap_or(0.0),
                runtime_s: stats.runtime_s,
                data_rate_kib_s: (stats.data_rate / 1024.0).round(),
                file_size_mib: (stats.file_size as f64 / f64::from(1u32 << 20) * 1000.0).round()
                    / 1000.0,
                valid: self.is_valid(),
            });
        }
        for member in group.member_names()? {
            let path = if name == "/" {
                format!("/{}", member)
            } else {
                format!("{}/{}", name, member)
            };
            if let Ok(child) = group.group(&member) {
                node.children
                    .insert(member, self.summarize_group(&child, &path, minimal)?);
            } else if let Ok(ds) = group.dataset(&member) {
                node.children
                    .insert(member, self.summarize_dataset(&ds, &path, minimal)?);
            }
        }
        Ok(node)
    }

    fn summarize_dataset(&self, ds: &Dataset, name: &str, minimal: bool) -> AppResult<NodeSummary> {
        let mut node = NodeSummary {
            attributes: attributes_as_yaml(ds)?,
            ..NodeSummary::default()
        };
        if minimal {
            return Ok(node);
        }
        let descriptor = ds.dtype()?.to_descriptor()?;
        let filters = ds.filters();
        let mut info = DatasetInfo {
            dtype: format!("{:?}", descriptor),
            shape: ds.shape(),
            chunks: ds.chunk(),
            compression: Compression::detect(&filters)
                .map(|c| c.to_string())
                .unwrap_or_else(|| format!("{:?}", filters)),
            time_diffs_s: None,
            statistics: BTreeMap::new(),
        };
        let is_integer = matches!(
            descriptor,
            TypeDescriptor::Integer(_) | TypeDescriptor::Unsigned(_)
        );
        if name == format!("/{}", schema::TIME_PATH) {
            info.time_diffs_s = self.data_timediffs().ok();
        } else if name == format!("/{}", schema::IV_PATH) {
            info.statistics = self.iv_statistics().unwrap_or_default();
        } else if is_integer && ds.ndim() == 1 {
            if let Some(stats) = dataset_statistics(ds)? {
                info.statistics.insert("values".to_string(), stats);
            }
        }
        node.dataset_info = Some(info);
        Ok(node)
    }

    fn iv_statistics(&self) -> AppResult<BTreeMap<String, Statistics>> {
        let mut current = StatisticsAccumulator::default();
        let mut voltage = StatisticsAccumulator::default();
        for buffer in self.read_buffers_si()? {
            let buffer = buffer?;
            buffer.current.iter().for_each(|&v| current.push(v));
            buffer.voltage.iter().for_each(|&v| voltage.push(v));
        }
        let mut stats = BTreeMap::new();
        for (row, acc) in [(ROW_CURRENT, current), (ROW_VOLTAGE, voltage)] {
            if let Some(s) = acc.finish(true) {
                let key = if row == ROW_CURRENT { "current" } else { "voltage" };
                stats.insert(key.to_string(), s);
            }
        }
        Ok(stats)
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("writable", &self.writable)
            .field("samples_per_buffer", &self.samples_per_buffer)
            .finish()
    }
}

fn attributes_as_yaml(location: &Location) -> AppResult<BTreeMap<String, serde_yaml::Value>> {
    let mut out = BTreeMap::new();
    for name in schema::attr_names(location)? {
        let value = match schema::read_str_attr(location, &name) {
            Ok(Some(s)) => attr_to_yaml(&s),
            _ => {
                let display = schema::read_attr_display(location, &name)?;
                serde_yaml::from_str(&display).unwrap_or(serde_yaml::Value::String(display))
            }
        };
        out.insert(name, value);
    }
    Ok(out)
}

fn dataset_statistics(ds: &Dataset) -> AppResult<Option<Statistics>> {
    let total = ds.shape()[0];
    let step = SAMPLES_PER_BUFFER_DEFAULT * BUFFERS_PER_SCAN;
    let mut acc = StatisticsAccumulator::default();
    for start in (0..total).step_by(step) {
        let chunk = ds.read_slice_1d::<f64, _>(start..(start + step).min(total))?;
        chunk.iter().for_each(|&v| acc.push(v));
    }
    Ok(acc.finish(false))
}

/// Lazy iterator over raw buffers, created by [`Reader::read_buffers_raw`].
#[derive(Clone)]
pub struct RawBuffers<'a> {
    ds_time: Dataset,
    ds_iv: Dataset,
    samples_per_buffer: usize,
    total: usize,
    next: usize,
    end: usize,
    _reader: PhantomData<&'a Reader>,
}

impl RawBuffers<'_> {
    fn read(&self, start: usize, stop: usize) -> AppResult<RawBuffer> {
        let time = self.ds_time.read_slice_1d::<u64, _>(start..stop)?;
        let iv = self.ds_iv.read_slice_2d::<u32, _>(s![.., start..stop])?;
        RawBuffer::new(time, iv)
    }

    /// Total samples covered by the datasets.
    pub fn total_samples(&self) -> usize {
        self.total
    }
}

impl Iterator for RawBuffers<'_> {
    type Item = AppResult<RawBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next * self.samples_per_buffer;
        let stop = (start + self.samples_per_buffer).min(self.total);
        self.next += 1;
        Some(self.read(start, stop))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.end.saturating_sub(self.next);
        (left, Some(left))
    }
}

impl ExactSizeIterator for RawBuffers<'_> {}

/// Lazy iterator over SI buffers, created by [`Reader::read_buffers_si`].
#[derive(Clone)]
pub struct SiBuffers<'a> {
    raw: RawBuffers<'a>,
    calibration: CalibrationSeries,
}

impl Iterator for SiBuffers<'_> {
    type Item = AppResult<SiBuffer>;

    fn next(&mut self) -> Option<Self::Item> {
        let cal = self.calibration;
        self.raw
            .next()
            .map(|raw| raw.map(|buffer| buffer.to_si(&cal)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.raw.size_hint()
    }
}
