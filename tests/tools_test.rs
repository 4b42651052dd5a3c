mod common;

use common::{options, write_recording, SPB};
use hdf5::types::VarLenUnicode;
use ndarray::{arr1, arr2, Array1};
use shepherd_data::downsample::{downsample_file, downsample_into, downsampled_path};
use shepherd_data::extract::{self, extract_meta, save_csv, save_log};
use shepherd_data::generate::Sawtooth;
use shepherd_data::ivonne::{IvCurveParams, IvonneReader};
use shepherd_data::schema;
use shepherd_data::{
    CalibrationSeries, Compression, Reader, RecordingConfig, ShepherdError, Writer, WriterOptions,
};
use std::io::Write as _;
use std::path::Path;
use std::str::FromStr;
use tempfile::tempdir;

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn sawtooth_repeats_ramps_with_continuous_time() {
    let dir = tempdir().unwrap();
    let config = RecordingConfig {
        samplerate_sps: 1_000,
        ..RecordingConfig::default()
    };
    let mut writer =
        Writer::create(dir.path().join("saw.h5"), options(Compression::default())).unwrap();
    writer.embed_config(&config, &CalibrationSeries::default()).unwrap();
    let written = Sawtooth::new(0.5, 3).write_to(&mut writer, SPB).unwrap();
    let path = writer.path().to_path_buf();
    writer.close().unwrap();
    assert_eq!(written, 1_500);

    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    assert!(reader.is_valid());
    assert_eq!(reader.samples(), 1_500);
    assert_eq!(reader.samplerate_sps(), 1_000);
    assert!(reader.check_timediffs().unwrap());

    let si: Vec<_> = reader
        .read_buffers_si()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    let first = &si[0];
    assert!((first.voltage[0] - 3.6).abs() < 1e-6);
    assert!((first.current[0] - 100e-6).abs() < 1e-6);
    // start of the second ramp
    let second = &si[5];
    assert!((second.time[0] - 0.5).abs() < 1e-9);
    assert!((second.voltage[0] - 3.6).abs() < 1e-6);
    let last = si.last().unwrap();
    assert!((last.voltage[SPB - 1] - 1.9).abs() < 1e-6);
    assert!((last.current[SPB - 1] - 2000e-6).abs() < 1e-6);
}

#[test]
fn sawtooth_needs_an_embedded_config() {
    let dir = tempdir().unwrap();
    let mut writer =
        Writer::create(dir.path().join("noconf.h5"), options(Compression::None)).unwrap();
    assert!(Sawtooth::new(0.1, 1).write_to(&mut writer, SPB).is_err());
}

#[test]
fn downsampling_keeps_floor_of_length() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("ds.h5"), Compression::Lzf, 3);
    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);

    let target = downsampled_path(&path, 7);
    let written = downsample_into(&reader, &target, 7).unwrap();
    assert_eq!(written, 3 * SPB / 7);

    let small = Reader::open(&target).unwrap();
    assert!(small.is_valid());
    assert_eq!(small.samples(), 3 * SPB / 7);
    assert_eq!(small.compression().unwrap(), Some(Compression::Lzf));
    assert_eq!(small.get_config().unwrap().samplerate_sps, 100_000 / 7);
    assert_eq!(
        schema::read_attr_display(small.file(), "ds_factor").unwrap(),
        "7"
    );
    let raw = small.read_buffers_raw().unwrap().next().unwrap().unwrap();
    assert_eq!(raw.time[1] - raw.time[0], 7 * common::INTERVAL_NS);
}

#[test]
fn downsample_file_stops_below_minimum_length() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("short.h5"), Compression::None, 30);

    let created = downsample_file(&path, &[2, 5]).unwrap();
    assert_eq!(created, vec![downsampled_path(&path, 2)]);
    // existing results are skipped
    assert!(downsample_file(&path, &[2]).unwrap().is_empty());
}

#[test]
fn ivcurve_windows_limit_the_downsampling_ladder() {
    let dir = tempdir().unwrap();
    let mut writer =
        Writer::create(dir.path().join("curves.h5"), options(Compression::Lzf)).unwrap();
    writer
        .embed_config(
            &RecordingConfig::ivcurve(10, 100_000),
            &CalibrationSeries::default(),
        )
        .unwrap();
    writer.set_hostname("sheep0").unwrap();
    for i in 0..250 {
        writer.append_iv_data_raw(&common::buffer(i, SPB)).unwrap();
    }
    let path = writer.path().to_path_buf();
    writer.close().unwrap();

    // a 10 sample window would shrink to 0.4 samples
    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    let x25 = downsampled_path(&path, 25);
    assert!(matches!(
        downsample_into(&reader, &x25, 25),
        Err(ShepherdError::InvalidConfig(_))
    ));
    assert!(!x25.exists());
    drop(reader);

    let created = downsample_file(&path, &[2, 25, 100]).unwrap();
    assert_eq!(created, vec![downsampled_path(&path, 2)]);
    assert!(!x25.exists());

    let half = Reader::open(&created[0]).unwrap();
    assert!(half.is_valid());
    assert_eq!(half.get_window_samples().unwrap(), 5);
    assert_eq!(half.samples(), 250 * SPB / 2);
}

fn add_aux_groups(writer: &Writer) {
    let sysutil = writer.file().create_group("sysutil").unwrap();
    sysutil
        .new_dataset_builder()
        .with_data(&arr1(&[
            1_600_000_000_000_000_000u64,
            1_600_000_001_000_000_000,
            1_600_000_002_000_000_000,
        ]))
        .create("time")
        .unwrap();
    let cpu = sysutil
        .new_dataset_builder()
        .with_data(&arr1(&[10.0f64, 20.0, 60.0]))
        .create("cpu")
        .unwrap();
    schema::write_str_attr(&cpu, "description", "cpu_util [%]").unwrap();
    let ram = sysutil
        .new_dataset_builder()
        .with_data(&arr2(&[[512.0f64, 10.0], [500.0, 11.0], [490.0, 12.0]]))
        .create("ram")
        .unwrap();
    schema::write_str_attr(&ram, "description", "ram_available [MiB], ram_used [%]").unwrap();

    let dmesg = writer.file().create_group("dmesg").unwrap();
    dmesg
        .new_dataset_builder()
        .with_data(&arr1(&[1_600_000_000_000_000_000u64, 1_600_000_000_500_000_000]))
        .create("time")
        .unwrap();
    let messages: Array1<VarLenUnicode> = ["usb 1-1: new device", "eth0: link up"]
        .iter()
        .map(|m| VarLenUnicode::from_str(m).unwrap())
        .collect();
    dmesg
        .new_dataset_builder()
        .with_data(&messages)
        .create("message")
        .unwrap();

    let empty = writer.file().create_group("uart").unwrap();
    empty
        .new_dataset::<u64>()
        .chunk(16)
        .shape(0..)
        .create("time")
        .unwrap();
}

#[test]
fn extract_writes_csv_and_logs_per_group() {
    let dir = tempdir().unwrap();
    let mut writer = Writer::create(dir.path().join("aux.h5"), options(Compression::None)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    writer.append_iv_data_raw(&common::buffer(0, SPB)).unwrap();
    add_aux_groups(&writer);
    let path = writer.path().to_path_buf();
    writer.close().unwrap();

    let reader = Reader::open(&path).unwrap();
    assert_eq!(save_csv(&reader, "sysutil", b';').unwrap(), 3);
    let csv_path = dir.path().join("aux.sysutil.csv");
    assert_eq!(line_count(&csv_path), 4);
    let text = std::fs::read_to_string(&csv_path).unwrap();
    assert!(text.starts_with("time;cpu_util [%];ram_available [MiB];ram_used [%]"));
    assert!(text.contains("2020-09-13 12:26:41.000000;20;500;11"));
    // never overwritten
    assert_eq!(save_csv(&reader, "sysutil", b';').unwrap(), 0);

    assert_eq!(save_log(&reader, "dmesg").unwrap(), 2);
    let log = std::fs::read_to_string(dir.path().join("aux.dmesg.log")).unwrap();
    assert_eq!(log.lines().count(), 2);
    assert!(log.contains("2020-09-13 12:26:40.500000:\teth0: link up"));
    assert_eq!(save_log(&reader, "uart").unwrap(), 0);
    assert!(!dir.path().join("aux.uart.log").exists());

    assert_eq!(extract::cpu_load(&reader).unwrap(), Some(30.0));
    assert_eq!(extract::save_iv_csv(&reader, b',').unwrap(), SPB);
    assert_eq!(line_count(&dir.path().join("aux.data.csv")), SPB + 1);
    drop(reader);

    let report = extract_meta(&path, b';').unwrap();
    assert_eq!(report.mode.as_deref(), Some("harvester"));
    assert_eq!(report.cpu_load, Some(30.0));
    assert!(report.exported.contains(&dir.path().join("aux.yml")));
    assert!(serde_json::to_string(&report).unwrap().contains("\"cpu_load\":30.0"));
}

#[test]
fn ivonne_becomes_one_window_per_curve() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("jogging.csv");
    let mut file = std::fs::File::create(&input).unwrap();
    writeln!(file, "time,a,b,c").unwrap();
    for i in 0..50 {
        let a = 0.01 + 0.0001 * f64::from(i);
        writeln!(file, "{},{},1e-9,20.0", f64::from(i) * 0.02, a).unwrap();
    }
    drop(file);

    let ivonne = IvonneReader::open(&input).unwrap();
    assert_eq!(ivonne.runtime_s(), 1.0);
    let params = IvCurveParams {
        pts_per_curve: 100,
        samplerate_sps: 1_000,
        ..IvCurveParams::default()
    };
    let output = dir.path().join("jogging_ivcurves.h5");
    let curves = ivonne
        .convert_to_ivcurves(&output, &params, WriterOptions::default().samples_per_buffer(100))
        .unwrap();
    // 0.98 s of input, one curve every 0.1 s
    assert_eq!(curves, 10);

    let reader = Reader::open(&output).unwrap().with_samples_per_buffer(100);
    assert!(reader.is_valid());
    assert_eq!(reader.get_window_samples().unwrap(), 100);
    assert_eq!(reader.samples(), 10 * 100);
    let curve = reader.read_buffers_si().unwrap().next().unwrap().unwrap();
    assert!(curve.voltage[0].abs() < 1e-6);
    assert!((curve.voltage[99] - 5.0).abs() < 1e-6);
    assert!((curve.current[0] - 0.01).abs() < 1e-6);
    assert_eq!(curve.current[99], 0.0);

    let isc_voc = dir.path().join("jogging_isc_voc.h5");
    let samples = ivonne
        .convert_to_isc_voc(&isc_voc, Some(0.5), WriterOptions::default())
        .unwrap();
    assert_eq!(samples, 25);
    assert!(Reader::open(&isc_voc).unwrap().is_valid());
}
