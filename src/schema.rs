//! Fixed container layout and attribute helpers.
//!
//! ```text
//! /                  attrs: mode, config, is_valid, hostname, ...
//! /data/time         u64 [n]      timestamps in ns (raw)
//! /data/iv           u32 [2, n]   row 0 current, row 1 voltage (raw)
//! /calibration       f64 [3, 2]   rows current/voltage/time, cols gain/offset
//! ```

use crate::error::{AppResult, ShepherdError};
use hdf5::types::{IntSize, TypeDescriptor, VarLenUnicode};
use hdf5::{Dataset, Location};

/// Group holding the sample datasets.
pub const DATA_GROUP: &str = "data";
/// Timestamp dataset inside [`DATA_GROUP`].
pub const TIME_DATASET: &str = "time";
/// Current/voltage dataset inside [`DATA_GROUP`].
pub const IV_DATASET: &str = "iv";
/// Calibration dataset at the root.
pub const CALIBRATION_DATASET: &str = "calibration";

/// Full path of the timestamp dataset.
pub const TIME_PATH: &str = "data/time";
/// Full path of the current/voltage dataset.
pub const IV_PATH: &str = "data/iv";

/// Number of sample channels in [`IV_DATASET`].
pub const IV_CHANNELS: usize = 2;
/// Row of the current channel.
pub const ROW_CURRENT: usize = 0;
/// Row of the voltage channel.
pub const ROW_VOLTAGE: usize = 1;

/// Root attribute names.
pub mod attrs {
    /// Recording mode.
    pub const MODE: &str = "mode";
    /// YAML encoded recording config.
    pub const CONFIG: &str = "config";
    /// Validity stamp written on close.
    pub const IS_VALID: &str = "is_valid";
    /// Host that produced the recording.
    pub const HOSTNAME: &str = "hostname";
    /// Downsampling factor of derived containers.
    pub const DS_FACTOR: &str = "ds_factor";
    /// Physical unit, set on sample datasets.
    pub const UNIT: &str = "unit";
    /// Channel description, set on sample datasets.
    pub const DESCRIPTION: &str = "description";
}

/// Write (or overwrite) a scalar string attribute.
pub fn write_str_attr(location: &Location, name: &str, value: &str) -> AppResult<()> {
    // attributes can not be overwritten in place
    if location.attr(name).is_ok() {
        location.delete_attr(name)?;
    }
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value.parse::<VarLenUnicode>()?)?;
    Ok(())
}

/// Read a scalar string attribute, `None` if absent.
pub fn read_str_attr(location: &Location, name: &str) -> AppResult<Option<String>> {
    match location.attr(name) {
        Ok(attr) => {
            let value = attr.read_scalar::<VarLenUnicode>().map_err(|e| {
                ShepherdError::Format(format!("attribute '{}' is not a string: {}", name, e))
            })?;
            Ok(Some(value.as_str().to_string()))
        }
        Err(_) => Ok(None),
    }
}

/// Write (or overwrite) a boolean attribute.
pub fn write_bool_attr(location: &Location, name: &str, value: bool) -> AppResult<()> {
    if location.attr(name).is_ok() {
        location.delete_attr(name)?;
    }
    location.new_attr::<bool>().create(name)?.write_scalar(&value)?;
    Ok(())
}

/// Write (or overwrite) an unsigned integer attribute.
pub fn write_u64_attr(location: &Location, name: &str, value: u64) -> AppResult<()> {
    if location.attr(name).is_ok() {
        location.delete_attr(name)?;
    }
    location.new_attr::<u64>().create(name)?.write_scalar(&value)?;
    Ok(())
}

/// Names of all attributes of a location, sorted.
pub fn attr_names(location: &Location) -> AppResult<Vec<String>> {
    let mut names = location.attr_names()?;
    names.sort();
    Ok(names)
}

/// Read any scalar attribute as display string, used for summaries and exports.
pub fn read_attr_display(location: &Location, name: &str) -> AppResult<String> {
    let attr = location.attr(name)?;
    if let Ok(s) = attr.read_scalar::<VarLenUnicode>() {
        return Ok(s.as_str().to_string());
    }
    if let Ok(b) = attr.read_scalar::<bool>() {
        return Ok(b.to_string());
    }
    if let Ok(i) = attr.read_scalar::<i64>() {
        return Ok(i.to_string());
    }
    if let Ok(f) = attr.read_scalar::<f64>() {
        return Ok(f.to_string());
    }
    Ok(format!("<{} values>", attr.size()))
}

/// Ensure a dataset holds unsigned integers of the given width.
pub fn check_unsigned(dataset: &Dataset, size: IntSize, path: &str) -> AppResult<()> {
    let descriptor = dataset.dtype()?.to_descriptor()?;
    if descriptor != TypeDescriptor::Unsigned(size) {
        return Err(ShepherdError::Format(format!(
            "dataset '{}' has dtype {:?}, expected {:?}",
            path,
            descriptor,
            TypeDescriptor::Unsigned(size)
        )));
    }
    Ok(())
}

/// Open the timestamp dataset and check its rank and dtype.
pub fn open_time(location: &hdf5::Group) -> AppResult<Dataset> {
    let ds = location
        .dataset(TIME_PATH)
        .map_err(|_| ShepherdError::Format(format!("dataset '/{}' is missing", TIME_PATH)))?;
    if ds.ndim() != 1 {
        return Err(ShepherdError::Format(format!(
            "dataset '/{}' must be 1-dimensional, has shape {:?}",
            TIME_PATH,
            ds.shape()
        )));
    }
    check_unsigned(&ds, IntSize::U8, TIME_PATH)?;
    Ok(ds)
}

/// Open the current/voltage dataset and check its rank, channel count and dtype.
pub fn open_iv(location: &hdf5::Group) -> AppResult<Dataset> {
    let ds = location
        .dataset(IV_PATH)
        .map_err(|_| ShepherdError::Format(format!("dataset '/{}' is missing", IV_PATH)))?;
    let shape = ds.shape();
    if shape.len() != 2 || shape[0] != IV_CHANNELS {
        return Err(ShepherdError::Format(format!(
            "dataset '/{}' must have shape [{}, n], has {:?}",
            IV_PATH, IV_CHANNELS, shape
        )));
    }
    check_unsigned(&ds, IntSize::U4, IV_PATH)?;
    Ok(ds)
}
