//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use shepherd_data::{
    CalibrationSeries, Compression, Mode, RawBuffer, RecordingConfig, Writer, WriterOptions,
};
use std::path::{Path, PathBuf};

pub const SPB: usize = 100;
pub const INTERVAL_NS: u64 = 10_000;

pub fn options(compression: Compression) -> WriterOptions {
    WriterOptions::new(Mode::Harvester)
        .compression(compression)
        .samples_per_buffer(SPB)
}

/// Buffer `index` of a continuous recording with deterministic values.
pub fn buffer(index: usize, len: usize) -> RawBuffer {
    let first = (index * SPB) as u32;
    let current = (0..len as u32).map(|i| (first + i) * 7).collect();
    let voltage = (0..len as u32).map(|i| 1_000_000 + (first + i) * 13).collect();
    RawBuffer::from_start((index * SPB) as u64 * INTERVAL_NS, INTERVAL_NS, current, voltage)
        .unwrap()
}

/// Write `buffers` full buffers into a new valid harvester container.
pub fn write_recording(path: &Path, compression: Compression, buffers: usize) -> PathBuf {
    let mut writer = Writer::create(path, options(compression)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    writer.set_hostname("sheep0").unwrap();
    for i in 0..buffers {
        writer.append_iv_data_raw(&buffer(i, SPB)).unwrap();
    }
    let path = writer.path().to_path_buf();
    writer.close().unwrap();
    path
}
