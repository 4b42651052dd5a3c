//! CLI entry point for shepherd-data
//!
//! Provides command-line access to the library tools:
//! - Validating recordings (a file or every `*.h5` in a directory)
//! - Extracting IV data, metadata and logs into text formats
//! - Downsampling recordings
//! - Generating a synthetic sawtooth recording
//! - Converting IVonne recordings
//!
//! # Usage
//!
//! ```bash
//! shepherd-data validate ./recordings
//! shepherd-data -v extract hrv.h5 --ds-factor 100
//! shepherd-data convert-ivonne jogging_10m.csv jogging_10m_ivcurves.h5
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shepherd_data::config::RecordingConfig;
use shepherd_data::downsample::{self, downsampled_path};
use shepherd_data::extract::{self, path_to_flist};
use shepherd_data::generate::Sawtooth;
use shepherd_data::ivonne::{IvCurveParams, IvonneReader};
use shepherd_data::logging::{self, LoggingConfig};
use shepherd_data::{CalibrationSeries, Mode, Reader, Settings, Writer, WriterOptions};
use std::path::{Path, PathBuf};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "shepherd-data")]
#[command(about = "Validate, extract and convert Shepherd recordings", long_about = None)]
struct Cli {
    /// Raise log verbosity, repeat for more
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Settings file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check structure and time steps of recordings
    Validate {
        /// File or directory
        path: PathBuf,
    },

    /// Downsample recordings and export IV data as CSV
    Extract {
        /// File or directory
        path: PathBuf,

        /// Downsampling factor applied before export
        #[arg(long, default_value_t = 1000)]
        ds_factor: u32,

        /// CSV separator
        #[arg(long, default_value = ";")]
        separator: char,
    },

    /// Export metadata summary, auxiliary groups and logs
    ExtractMeta {
        /// File or directory
        path: PathBuf,

        /// CSV separator
        #[arg(long, default_value = ";")]
        separator: char,
    },

    /// Create downsampled copies of recordings
    Downsample {
        /// File or directory
        path: PathBuf,

        /// Single factor, otherwise a ladder of factors from 5 to 1 000 000
        #[arg(long)]
        ds_factor: Option<u32>,
    },

    /// Write a synthetic sawtooth harvester recording
    Generate {
        /// Output file
        output: PathBuf,

        /// Length of one ramp in s
        #[arg(long, default_value_t = 60.0)]
        duration: f64,

        /// Number of ramps
        #[arg(long, default_value_t = 60)]
        repetitions: u32,
    },

    /// Convert an IVonne recording (CSV: time,a,b,c)
    ConvertIvonne {
        /// IVonne CSV file
        input: PathBuf,

        /// Output file
        output: PathBuf,

        /// Target representation
        #[arg(long, value_enum, default_value_t = IvonneTarget::Ivcurve)]
        datatype: IvonneTarget,

        /// Upper end of the voltage sweep in V
        #[arg(long, default_value_t = 5.0)]
        v_max: f64,

        /// Samples per curve
        #[arg(long, default_value_t = 1000)]
        pts_per_curve: u32,

        /// Trim the input to this many seconds
        #[arg(long)]
        duration: Option<f64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum IvonneTarget {
    Ivcurve,
    IscVoc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("failed to load settings")?;
    logging::init(LoggingConfig::from_settings(&settings)?.more_verbose(cli.verbose))?;

    match cli.command {
        Commands::Validate { path } => validate(&path),
        Commands::Extract {
            path,
            ds_factor,
            separator,
        } => extract_iv(&path, ds_factor, separator_byte(separator)?),
        Commands::ExtractMeta { path, separator } => {
            extract_meta(&path, separator_byte(separator)?)
        }
        Commands::Downsample { path, ds_factor } => {
            let factors =
                ds_factor.map_or_else(|| downsample::DEFAULT_FACTORS.to_vec(), |f| vec![f]);
            for file in files(&path)? {
                downsample::downsample_file(&file, &factors)?;
            }
            Ok(())
        }
        Commands::Generate {
            output,
            duration,
            repetitions,
        } => generate(&settings, &output, Sawtooth::new(duration, repetitions)),
        Commands::ConvertIvonne {
            input,
            output,
            datatype,
            v_max,
            pts_per_curve,
            duration,
        } => {
            let ivonne = IvonneReader::open(&input)?;
            let options = writer_options(&settings);
            match datatype {
                IvonneTarget::Ivcurve => {
                    let params = IvCurveParams {
                        v_max,
                        pts_per_curve,
                        duration_s: duration,
                        samplerate_sps: settings.writer.samplerate_sps,
                    };
                    let curves = ivonne.convert_to_ivcurves(&output, &params, options)?;
                    info!("wrote {} ivcurves to '{}'", curves, output.display());
                }
                IvonneTarget::IscVoc => {
                    let samples = ivonne.convert_to_isc_voc(&output, duration, options)?;
                    info!("wrote {} isc/voc samples to '{}'", samples, output.display());
                }
            }
            Ok(())
        }
    }
}

fn files(path: &Path) -> Result<Vec<PathBuf>> {
    let files = path_to_flist(path)?;
    if files.is_empty() {
        bail!("no .h5 files found at '{}'", path.display());
    }
    Ok(files)
}

fn separator_byte(separator: char) -> Result<u8> {
    u8::try_from(separator)
        .with_context(|| format!("separator '{}' is not a single byte", separator))
}

fn writer_options(settings: &Settings) -> WriterOptions {
    WriterOptions::new(Mode::Harvester)
        .compression(settings.writer.compression)
        .samples_per_buffer(settings.writer.samples_per_buffer)
}

fn validate(path: &Path) -> Result<()> {
    let mut all_valid = true;
    for file in files(path)? {
        info!("Validating '{}' ...", file.display());
        let valid = match Reader::open(&file) {
            Ok(reader) => reader.is_valid() && reader.check_timediffs().unwrap_or(false),
            Err(e) => {
                error!("failed to open '{}': {}", file.display(), e);
                false
            }
        };
        if !valid {
            error!(" -> File '{}' was NOT valid", file.display());
        }
        all_valid &= valid;
    }
    if !all_valid {
        std::process::exit(1);
    }
    Ok(())
}

fn extract_iv(path: &Path, ds_factor: u32, separator: u8) -> Result<()> {
    for file in files(path)? {
        let source = if ds_factor > 1 {
            let target = downsampled_path(&file, ds_factor);
            if !target.exists() {
                let reader = Reader::open(&file)?;
                info!("Downsampling '{}' by factor x{} ...", file.display(), ds_factor);
                downsample::downsample_into(&reader, &target, ds_factor)?;
            }
            target
        } else {
            file
        };
        let reader = Reader::open(&source)?;
        let rows = extract::save_iv_csv(&reader, separator)?;
        info!("exported {} rows from '{}'", rows, source.display());
    }
    Ok(())
}

fn extract_meta(path: &Path, separator: u8) -> Result<()> {
    let mut reports = Vec::new();
    for file in files(path)? {
        reports.push(extract::extract_meta(&file, separator)?);
    }
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

fn generate(settings: &Settings, output: &Path, sawtooth: Sawtooth) -> Result<()> {
    let config = RecordingConfig {
        samplerate_sps: settings.writer.samplerate_sps,
        ..RecordingConfig::default()
    }
    .with_source("shepherd-data generate: sawtooth");
    let mut writer = Writer::create(output, writer_options(settings))?;
    writer.embed_config(&config, &CalibrationSeries::default())?;
    let samples = sawtooth.write_to(&mut writer, settings.writer.samples_per_buffer)?;
    let path = writer.path().to_path_buf();
    writer.close()?;

    let reader = Reader::open(&path)?;
    info!(
        "generated '{}': {} samples, mode = {}, valid = {}",
        path.display(),
        samples,
        reader.get_mode()?,
        reader.is_valid()
    );
    Ok(())
}
