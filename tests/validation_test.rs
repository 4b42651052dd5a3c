mod common;

use common::{buffer, options, write_recording, SPB};
use shepherd_data::schema::{self, attrs};
use shepherd_data::validation::validate_container;
use shepherd_data::{CalibrationSeries, Compression, Reader, RecordingConfig, ShepherdError, Writer};
use tempfile::tempdir;
use tracing_test::traced_test;

#[traced_test]
#[test]
fn misaligned_length_is_only_a_warning() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("tail.h5");
    let mut writer = Writer::create(path, options(Compression::None)).unwrap();
    writer
        .embed_config(&RecordingConfig::default(), &CalibrationSeries::default())
        .unwrap();
    writer.set_hostname("sheep0").unwrap();
    writer.append_iv_data_raw(&buffer(0, SPB / 2)).unwrap();

    let report = validate_container(writer.file(), SPB);
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 1);
    assert!(logs_contain("datasets are not aligned with buffer-size"));
}

#[traced_test]
#[test]
fn alignment_follows_the_chunk_size_of_the_file() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("chunks.h5"), Compression::Lzf, 3);

    let reader = Reader::open(&path).unwrap();
    assert_ne!(reader.samples_per_buffer(), SPB);
    let report = validate_container(reader.file(), reader.samples_per_buffer());
    assert!(report.is_valid());
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(!logs_contain("not aligned"));
}

#[traced_test]
#[test]
fn missing_hostname_and_stray_window_are_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("host.h5");
    let mut writer = Writer::create(path, options(Compression::Lzf)).unwrap();
    let config = RecordingConfig {
        window_duration_s: Some(0.01),
        ..RecordingConfig::default()
    };
    writer.embed_config(&config, &CalibrationSeries::default()).unwrap();
    writer.set_hostname("unknown").unwrap();

    let report = validate_container(writer.file(), SPB);
    assert!(report.is_valid());
    assert_eq!(report.warnings.len(), 2);
    assert!(logs_contain("Hostname was not set"));
    assert!(logs_contain("window duration is set despite datatype 'ivsample'"));
}

#[traced_test]
#[test]
fn high_gzip_level_from_foreign_writers_is_flagged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("gzip9.h5");
    {
        let file = hdf5::File::create(&path).unwrap();
        schema::write_str_attr(&file, attrs::MODE, "harvester").unwrap();
        schema::write_str_attr(&file, attrs::HOSTNAME, "sheep1").unwrap();
        let yaml = RecordingConfig::default().to_yaml().unwrap();
        schema::write_str_attr(&file, attrs::CONFIG, &yaml).unwrap();
        let data = file.create_group("data").unwrap();
        data.new_dataset::<u64>()
            .chunk(SPB)
            .deflate(9)
            .shape(0..)
            .create("time")
            .unwrap();
        data.new_dataset::<u32>()
            .chunk((2, SPB))
            .shape((2, 0..))
            .create("iv")
            .unwrap();
        let cal = ndarray::Array2::from(CalibrationSeries::default().to_rows().to_vec());
        file.new_dataset_builder()
            .with_data(&cal)
            .create("calibration")
            .unwrap();
    }

    let reader = Reader::open(&path).unwrap().with_samples_per_buffer(SPB);
    let report = reader.validate();
    assert!(report.is_valid());
    assert!(logs_contain("gzip compression of 'time' is too high (9 > 1)"));
    assert_eq!(reader.compression().unwrap(), None);
    drop(reader);

    // extending would need a filter this library never writes
    assert!(matches!(
        Writer::open_existing(&path),
        Err(ShepherdError::Format(_))
    ));
}

#[traced_test]
#[test]
fn broken_layouts_are_hard_failures() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("broken.h5"), Compression::None, 1);
    {
        let file = hdf5::File::open_rw(&path).unwrap();
        file.unlink("data/iv").unwrap();
    }

    let reader = Reader::open(&path).unwrap();
    assert!(logs_contain("File is faulty"));
    assert!(!reader.is_valid());
    assert!(matches!(reader.read_buffers_raw(), Err(ShepherdError::Format(_))));
    // calibration and config are still usable
    assert!(reader.get_calibration_data().is_ok());
    assert!(reader.get_config().is_ok());
}

#[traced_test]
#[test]
fn unknown_mode_and_foreign_config_keys_fail() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("mode.h5"), Compression::None, 1);
    {
        let file = hdf5::File::open_rw(&path).unwrap();
        schema::write_str_attr(&file, attrs::MODE, "sniffer").unwrap();
    }
    let reader = Reader::open(&path).unwrap();
    assert!(!reader.is_valid());
    assert!(logs_contain("unsupported mode 'sniffer'"));
    assert!(matches!(reader.get_mode(), Err(ShepherdError::Format(_))));
    drop(reader);

    {
        let file = hdf5::File::open_rw(&path).unwrap();
        schema::write_str_attr(&file, attrs::MODE, "emulator").unwrap();
        let yaml = "datatype: ivsample\nvoltage_step: 3";
        schema::write_str_attr(&file, attrs::CONFIG, yaml).unwrap();
    }
    let reader = Reader::open(&path).unwrap();
    assert!(!reader.is_valid());
    assert!(matches!(reader.get_config(), Err(ShepherdError::Format(_))));
}

#[test]
fn is_valid_tracks_the_content_not_the_stamp() {
    let dir = tempdir().unwrap();
    let path = write_recording(&dir.path().join("stamp.h5"), Compression::None, 1);
    {
        let file = hdf5::File::open_rw(&path).unwrap();
        file.unlink("calibration").unwrap();
    }
    let reader = Reader::open(&path).unwrap();
    // the stamp written on close still says true
    assert_eq!(
        schema::read_attr_display(reader.file(), attrs::IS_VALID).unwrap(),
        "true"
    );
    assert!(!reader.is_valid());
}
