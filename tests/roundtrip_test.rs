mod common;

use common::{buffer, options, write_recording, INTERVAL_NS, SPB};
use ndarray::Array1;
use shepherd_data::generate::Sawtooth;
use shepherd_data::{
    CalibrationSeries, Compression, RawBuffer, Reader, RecordingConfig, ShepherdError, SiBuffer,
    Writer,
};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Write the same sawtooth under `compression`, 5 ramps of 1000 samples at 100 kSps.
fn write_sawtooth(dir: &Path, compression: Compression) -> PathBuf {
    let path = dir.join(format!("sawtooth_{}.h5", compression));
    let mut writer = Writer::create(&path, options(compression)).unwrap();
    writer
        .embed_config(
            &RecordingConfig::default().with_source("sawtooth"),
            &CalibrationSeries::default(),
        )
        .unwrap();
    writer.set_hostname("sheep0").unwrap();
    let written = Sawtooth::new(0.01, 5).write_to(&mut writer, SPB).unwrap();
    assert_eq!(written, 5_000);
    let path = writer.path().to_path_buf();
    writer.close().unwrap();
    path
}

fn raw_buffers(reader: &Reader) -> Vec<RawBuffer> {
    reader
        .read_buffers_raw()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn sawtooth_is_identical_under_every_compression() {
    let dir = tempdir().unwrap();
    let plain = Reader::open(write_sawtooth(dir.path(), Compression::None))
        .unwrap()
        .with_samples_per_buffer(SPB);
    assert!(plain.is_valid());
    let expected = raw_buffers(&plain);
    assert_eq!(expected.len(), 50);

    for compression in [Compression::Lzf, Compression::default()] {
        let reader = Reader::open(write_sawtooth(dir.path(), compression))
            .unwrap()
            .with_samples_per_buffer(SPB);
        assert!(reader.is_valid(), "{} file is invalid", compression);
        assert_eq!(reader.compression().unwrap(), Some(compression));
        assert_eq!(reader.get_mode().unwrap(), plain.get_mode().unwrap());
        assert_eq!(reader.get_config().unwrap(), plain.get_config().unwrap());
        assert_eq!(
            reader.get_calibration_data().unwrap(),
            plain.get_calibration_data().unwrap()
        );
        assert_eq!(raw_buffers(&reader), expected, "samples differ under {}", compression);
        assert!(
            reader.file_size() < plain.file_size(),
            "{} ({} B) is not smaller than uncompressed ({} B)",
            compression,
            reader.file_size(),
            plain.file_size()
        );
    }
}

#[test]
fn raw_samples_survive_every_compression() {
    let dir = tempdir().unwrap();
    for compression in [Compression::None, Compression::Lzf, Compression::default()] {
        let target = dir.path().join(format!("{}.h5", compression));
        let path = write_recording(&target, compression, 3);

        let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
        assert_eq!(reader.samples(), 3 * SPB);
        assert_eq!(reader.compression().unwrap(), Some(compression));

        let buffers = raw_buffers(&reader);
        assert_eq!(buffers.len(), 3);
        for (i, read) in buffers.iter().enumerate() {
            assert_eq!(read, &buffer(i, SPB), "buffer {} under {}", i, compression);
        }
    }
}

#[test]
fn iterator_is_restartable_and_keeps_partial_tail() {
    let dir = tempdir().unwrap();
    let mut writer = Writer::create(dir.path().join("tail.h5"), options(Compression::Lzf)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    writer.append_iv_data_raw(&buffer(0, SPB)).unwrap();
    writer.append_iv_data_raw(&buffer(1, 30)).unwrap();
    let path = writer.path().to_path_buf();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    let lengths: Vec<usize> = reader
        .read_buffers_raw()
        .unwrap()
        .map(|b| b.unwrap().len())
        .collect();
    assert_eq!(lengths, vec![SPB, 30]);

    let again = reader.read_buffers_raw().unwrap();
    assert_eq!(again.len(), 2);
    assert_eq!(reader.read_buffers_raw_range(1, None).unwrap().count(), 1);
}

#[test]
fn si_values_round_trip_within_one_lsb() {
    let dir = tempdir().unwrap();
    let cal = CalibrationSeries::default();
    let mut writer = Writer::create(dir.path().join("si.h5"), options(Compression::None)).unwrap();
    writer.embed_config(&RecordingConfig::default(), &cal).unwrap();

    let n = SPB;
    let time = Array1::from_iter((0..n).map(|i| i as f64 * INTERVAL_NS as f64 * 1e-9));
    let current = Array1::linspace(100e-6, 2e-3, n);
    let voltage = Array1::linspace(3.6, 1.9, n);
    let input = SiBuffer::new(time, current, voltage).unwrap();
    writer.append_iv_data_si(&input, None).unwrap();
    let path = writer.path().to_path_buf();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    let out = reader.read_buffers_si().unwrap().next().unwrap().unwrap();
    for i in 0..n {
        assert!((out.current[i] - input.current[i]).abs() <= cal.current.gain);
        assert!((out.voltage[i] - input.voltage[i]).abs() <= cal.voltage.gain);
        assert!((out.time[i] - input.time[i]).abs() <= cal.time.gain);
    }
}

#[test]
fn negative_si_values_are_clamped_to_zero() {
    let dir = tempdir().unwrap();
    let mut writer = Writer::create(dir.path().join("neg.h5"), options(Compression::None)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    let input = SiBuffer::new(
        Array1::from(vec![0.0, 1e-5]),
        Array1::from(vec![-1e-3, 1e-3]),
        Array1::from(vec![-2.0, 2.0]),
    )
    .unwrap();
    writer.append_iv_data_si(&input, None).unwrap();
    let path = writer.path().to_path_buf();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    let raw = reader.read_buffers_raw().unwrap().next().unwrap().unwrap();
    assert_eq!(raw.current()[0], 0);
    assert_eq!(raw.voltage()[0], 0);
    assert!(raw.voltage()[1] > 0);
}

#[test]
fn timestamps_must_strictly_increase() {
    let dir = tempdir().unwrap();
    let mut writer =
        Writer::create(dir.path().join("order.h5"), options(Compression::None)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    writer.append_iv_data_raw(&buffer(1, SPB)).unwrap();

    // batch starting before the last written sample
    assert!(matches!(
        writer.append_iv_data_raw(&buffer(0, SPB)),
        Err(ShepherdError::State(_))
    ));
    // repeated timestamp inside a batch
    let repeated =
        RawBuffer::from_vecs(vec![10_000_000, 10_000_000], vec![1, 2], vec![3, 4]).unwrap();
    assert!(matches!(
        writer.append_iv_data_raw(&repeated),
        Err(ShepherdError::State(_))
    ));
    assert_eq!(writer.samples(), SPB);
}

#[test]
fn empty_batches_are_ignored_and_mismatches_rejected() {
    let dir = tempdir().unwrap();
    let mut writer =
        Writer::create(dir.path().join("shape.h5"), options(Compression::None)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();

    let empty = RawBuffer::from_vecs(vec![], vec![], vec![]).unwrap();
    writer.append_iv_data_raw(&empty).unwrap();
    assert_eq!(writer.samples(), 0);

    assert!(matches!(
        RawBuffer::from_vecs(vec![1, 2], vec![1], vec![1]),
        Err(ShepherdError::Shape(_))
    ));
    let mismatched = SiBuffer {
        time: Array1::from(vec![0.0, 1.0]),
        current: Array1::from(vec![0.0]),
        voltage: Array1::from(vec![0.0, 0.0]),
    };
    assert!(matches!(
        writer.append_iv_data_si(&mismatched, None),
        Err(ShepherdError::Shape(_))
    ));
}

#[test]
fn open_existing_continues_after_last_sample() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("extend.h5"), Compression::Lzf, 2);

    let mut writer = Writer::open_existing(&path).unwrap();
    assert_eq!(writer.samples(), 2 * SPB);
    assert_eq!(writer.compression(), Compression::Lzf);
    assert!(matches!(
        writer.append_iv_data_raw(&buffer(1, SPB)),
        Err(ShepherdError::State(_))
    ));
    writer.append_iv_data_raw(&buffer(2, SPB)).unwrap();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    assert_eq!(reader.samples(), 3 * SPB);
    assert!(reader.check_timediffs().unwrap());
}
