//! Tool settings using Figment
//!
//! Settings of the command line tools are loaded from:
//! 1. `config/default.toml` (or the file given with `--config`)
//! 2. Environment variables prefixed with `SHEPHERD_`
//!
//! Nested keys are separated by a double underscore, e.g.
//! `SHEPHERD_WRITER__COMPRESSION=lzf` or `SHEPHERD_LOGGING__LEVEL=debug`.
//!
//! # Example
//! ```no_run
//! use shepherd_data::settings::Settings;
//!
//! let settings = Settings::load()?;
//! println!("compression: {}", settings.writer.compression);
//! # Ok::<(), shepherd_data::error::ShepherdError>(())
//! ```

use crate::compression::Compression;
use crate::config::SAMPLERATE_SPS_DEFAULT;
use crate::error::{AppResult, ShepherdError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default settings file, relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "config/default.toml";

/// Samples per chunk and per buffer handed out by the reader.
pub const SAMPLES_PER_BUFFER_DEFAULT: usize = 10_000;

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Logging output
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Defaults for newly created containers
    #[serde(default)]
    pub writer: WriterSettings,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Output format (pretty, compact, json)
    #[serde(default = "default_format")]
    pub format: String,
}

/// Container defaults used by the generating and converting tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterSettings {
    /// Compression of new sample datasets
    #[serde(default)]
    pub compression: Compression,
    /// Chunk length of the sample datasets
    #[serde(default = "default_samples_per_buffer")]
    pub samples_per_buffer: usize,
    /// Sample rate written into new recording configs
    #[serde(default = "default_samplerate")]
    pub samplerate_sps: u32,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "compact".to_string()
}

fn default_samples_per_buffer() -> usize {
    SAMPLES_PER_BUFFER_DEFAULT
}

fn default_samplerate() -> u32 {
    SAMPLERATE_SPS_DEFAULT
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: default_format(),
        }
    }
}

impl Default for WriterSettings {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            samples_per_buffer: SAMPLES_PER_BUFFER_DEFAULT,
            samplerate_sps: SAMPLERATE_SPS_DEFAULT,
        }
    }
}

impl Settings {
    /// Load settings from the default file and environment variables.
    ///
    /// A missing file is not an error, the built-in defaults apply.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let settings: Self = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SHEPHERD_").split("__"))
            .extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Validate settings after loading
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ShepherdError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ShepherdError::InvalidConfig(format!(
                "Invalid log format '{}'. Must be one of: {}",
                self.logging.format,
                valid_formats.join(", ")
            )));
        }

        self.writer.compression.validate()?;

        if self.writer.samples_per_buffer == 0 {
            return Err(ShepherdError::InvalidConfig(
                "samples_per_buffer must be > 0".to_string(),
            ));
        }
        if self.writer.samplerate_sps == 0 {
            return Err(ShepherdError::InvalidConfig(
                "samplerate_sps must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}
