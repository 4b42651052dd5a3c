//! Export of recorded data and auxiliary groups to plain text.
//!
//! Recordings may carry auxiliary groups next to `/data`, each with its own `time`
//! dataset (ns since epoch):
//!
//! - numeric groups (`sysutil`, `timesync`) become `<file>.<group>.csv`
//! - message groups (`dmesg`, `exceptions`, `uart`) become `<file>.<group>.log`
//!
//! Existing output files are never overwritten.

use crate::error::{AppResult, ShepherdError};
use crate::reader::Reader;
use chrono::{DateTime, Utc};
use hdf5::types::VarLenUnicode;
use hdf5::Group;
use ndarray::Array2;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Groups exported as CSV.
pub const CSV_GROUPS: [&str; 2] = ["sysutil", "timesync"];
/// Groups exported as log.
pub const LOG_GROUPS: [&str; 3] = ["dmesg", "exceptions", "uart"];

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const FAULTY_ELEMENT: &str = "[[[ extractor - faulty element ]]]";

/// Every `.h5` file of a directory, or the path itself if it is one.
pub fn path_to_flist(path: &Path) -> AppResult<Vec<PathBuf>> {
    let is_h5 = |p: &Path| p.is_file() && p.extension().is_some_and(|e| e == "h5");
    let mut files = Vec::new();
    if is_h5(path) {
        files.push(path.to_path_buf());
    } else if path.is_dir() {
        for entry in std::fs::read_dir(path)? {
            let p = entry?.path();
            if is_h5(p.as_path()) {
                files.push(p);
            }
        }
        files.sort();
    }
    Ok(files)
}

fn format_ns(time_ns: u64) -> String {
    let secs = (time_ns / 1_000_000_000) as i64;
    let nanos = (time_ns % 1_000_000_000) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|t| t.format(TIME_FORMAT).to_string())
        .unwrap_or_else(|| time_ns.to_string())
}

fn sibling(reader: &Reader, group: &str, ext: &str) -> PathBuf {
    reader.path().with_extension(format!("{}.{}", group, ext))
}

fn aux_group(reader: &Reader, name: &str) -> AppResult<(Group, Vec<u64>)> {
    let group = reader
        .file()
        .group(name)
        .map_err(|_| ShepherdError::MissingData(format!("group '/{}' not found", name)))?;
    let time = group
        .dataset("time")
        .map_err(|_| ShepherdError::MissingData(format!("dataset '/{}/time' not found", name)))?
        .read_1d::<u64>()?
        .to_vec();
    Ok((group, time))
}

fn value_datasets(group: &Group) -> AppResult<Vec<String>> {
    let mut names: Vec<String> = group
        .member_names()?
        .into_iter()
        .filter(|n| n != "time" && group.dataset(n).is_ok())
        .collect();
    names.sort();
    Ok(names)
}

/// Export a numeric auxiliary group to `<file>.<group>.csv`.
///
/// Returns the number of rows written, 0 if the group is empty or the file exists.
pub fn save_csv(reader: &Reader, group_name: &str, separator: u8) -> AppResult<usize> {
    let (group, time) = aux_group(reader, group_name)?;
    if time.is_empty() {
        info!("/{} is empty, no csv generated", group_name);
        return Ok(0);
    }
    let csv_path = sibling(reader, group_name, "csv");
    if csv_path.exists() {
        info!("{} already exists, will skip", csv_path.display());
        return Ok(0);
    }

    let mut header = vec!["time".to_string()];
    let mut columns: Vec<Array2<f64>> = Vec::new();
    for name in value_datasets(&group)? {
        let ds = group.dataset(&name)?;
        let values = match ds.ndim() {
            1 => ds.read_1d::<f64>()?.insert_axis(ndarray::Axis(1)),
            2 => ds.read_2d::<f64>()?,
            n => {
                warn!("skipping '/{}/{}' with {} dimensions", group_name, name, n);
                continue;
            }
        };
        if values.nrows() != time.len() {
            warn!(
                "skipping '/{}/{}': {} rows for {} timestamps",
                group_name,
                name,
                values.nrows(),
                time.len()
            );
            continue;
        }
        let description = crate::schema::read_str_attr(&ds, "description")?;
        let labels: Vec<String> = description
            .map(|d| d.split(", ").map(str::to_string).collect())
            .unwrap_or_default();
        for col in 0..values.ncols() {
            header.push(
                labels
                    .get(col)
                    .cloned()
                    .unwrap_or_else(|| format!("{}_{}", name, col)),
            );
        }
        columns.push(values);
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .from_path(&csv_path)?;
    writer.write_record(&header)?;
    for (idx, &t) in time.iter().enumerate() {
        let mut record = vec![format_ns(t)];
        for values in &columns {
            record.extend(values.row(idx).iter().map(|v| v.to_string()));
        }
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(time.len())
}

/// Export a message group to `<file>.<group>.log`, one tab separated line per entry.
pub fn save_log(reader: &Reader, group_name: &str) -> AppResult<usize> {
    let (group, time) = aux_group(reader, group_name)?;
    if time.is_empty() {
        info!("/{} is empty, no log generated", group_name);
        return Ok(0);
    }
    let log_path = sibling(reader, group_name, "log");
    if log_path.exists() {
        info!("{} already exists, will skip", log_path.display());
        return Ok(0);
    }

    let mut messages: Vec<Vec<String>> = Vec::new();
    for name in value_datasets(&group)? {
        let ds = group.dataset(&name)?;
        let column = match ds.read_1d::<VarLenUnicode>() {
            Ok(values) => values.iter().map(|v| v.as_str().to_string()).collect(),
            Err(_) => match ds.read_1d::<f64>() {
                Ok(values) => values.iter().map(|v| v.to_string()).collect(),
                Err(e) => {
                    warn!("'/{}/{}' is not readable: {}", group_name, name, e);
                    vec![FAULTY_ELEMENT.to_string(); time.len()]
                }
            },
        };
        messages.push(column);
    }

    let mut file = std::io::BufWriter::new(std::fs::File::create(&log_path)?);
    for (idx, &t) in time.iter().enumerate() {
        write!(file, "{}:", format_ns(t))?;
        for column in &messages {
            let message = column.get(idx).map_or(FAULTY_ELEMENT, String::as_str);
            write!(file, "\t{}", message)?;
        }
        writeln!(file)?;
    }
    file.flush()?;
    Ok(time.len())
}

/// Export the samples in SI units to `<file>.data.csv`.
pub fn save_iv_csv(reader: &Reader, separator: u8) -> AppResult<usize> {
    let csv_path = sibling(reader, "data", "csv");
    if csv_path.exists() {
        info!("{} already exists, will skip", csv_path.display());
        return Ok(0);
    }
    let cal = reader.get_calibration_data()?;
    let mut writer = csv::WriterBuilder::new()
        .delimiter(separator)
        .from_path(&csv_path)?;
    writer.write_record(["time", "current [A]", "voltage [V]"])?;
    let mut rows = 0;
    for buffer in reader.read_buffers_raw()? {
        let buffer = buffer?;
        let si = buffer.to_si(&cal);
        for i in 0..buffer.len() {
            let time_ns = cal.time.raw_to_si(buffer.time[i] as f64) * 1e9;
            writer.write_record([
                format_ns(time_ns.round() as u64),
                si.current[i].to_string(),
                si.voltage[i].to_string(),
            ])?;
        }
        rows += buffer.len();
    }
    writer.flush()?;
    Ok(rows)
}

/// Mean of `/sysutil/cpu`, `None` if the recording has no system utilization.
pub fn cpu_load(reader: &Reader) -> AppResult<Option<f64>> {
    let Ok(ds) = reader.file().dataset("sysutil/cpu") else {
        return Ok(None);
    };
    let values = ds.read_1d::<f64>()?;
    Ok(values.mean())
}

/// Per-file summary printed by the extract tools.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub mode: Option<String>,
    pub cpu_load: Option<f64>,
    pub data_rate_kib_s: f64,
    pub energy_ws: Option<f64>,
    /// Files written by the extraction.
    pub exported: Vec<PathBuf>,
}

/// Export metadata sidecar, numeric groups and logs of one recording.
pub fn extract_meta(path: &Path, separator: u8) -> AppResult<FileReport> {
    let reader = Reader::open(path)?;
    let mut exported = Vec::new();
    if let Some(yml) = reader.export_metadata_yaml()? {
        exported.push(yml);
    }
    let members = reader.file().member_names()?;
    for group in CSV_GROUPS {
        if members.iter().any(|m| m == group) && save_csv(&reader, group, separator)? > 0 {
            exported.push(sibling(&reader, group, "csv"));
        }
    }
    for group in LOG_GROUPS {
        if members.iter().any(|m| m == group) && save_log(&reader, group)? > 0 {
            exported.push(sibling(&reader, group, "log"));
        }
    }
    report(&reader, exported)
}

/// Summarize one recording without exporting anything.
pub fn report(reader: &Reader, exported: Vec<PathBuf>) -> AppResult<FileReport> {
    Ok(FileReport {
        file: reader.path().to_path_buf(),
        mode: reader.get_mode().ok().map(|m| m.to_string()),
        cpu_load: cpu_load(reader)?,
        data_rate_kib_s: (reader.data_rate() / 1024.0).round(),
        energy_ws: reader.energy().ok(),
        exported,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_are_utc_with_microseconds() {
        assert_eq!(format_ns(0), "1970-01-01 00:00:00.000000");
        assert_eq!(
            format_ns(1_600_000_000_123_456_789),
            "2020-09-13 12:26:40.123456"
        );
    }

    #[test]
    fn flist_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.h5"), b"").unwrap();
        std::fs::write(dir.path().join("a.h5"), b"").unwrap();
        std::fs::write(dir.path().join("a.yml"), b"").unwrap();

        let files = path_to_flist(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.h5"), dir.path().join("b.h5")]);
        assert_eq!(
            path_to_flist(&dir.path().join("a.h5")).unwrap().len(),
            1
        );
        assert!(path_to_flist(&dir.path().join("a.yml")).unwrap().is_empty());
    }
}
