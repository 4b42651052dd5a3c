//! Recording configuration embedded into every container.
//!
//! The `config` attribute is a YAML document deserialized into [`RecordingConfig`].
//! Only the keys documented on that struct are recognized; anything else is rejected
//! when the container is read, so typos surface as errors instead of silently vanishing.

use crate::error::{AppResult, ShepherdError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default sampling rate of the testbed.
pub const SAMPLERATE_SPS_DEFAULT: u32 = 100_000;

/// Whether a recording was produced by the harvester or the emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Recorded from a harvesting transducer.
    Harvester,
    /// Recorded while emulating a source for a target.
    Emulator,
}

impl Mode {
    /// Datatypes a recording of this mode may contain.
    pub fn supported_datatypes(self) -> &'static [Datatype] {
        match self {
            Mode::Harvester => &[Datatype::IvSample, Datatype::IvCurve, Datatype::IscVoc],
            Mode::Emulator => &[Datatype::IvSample],
        }
    }

    /// String stored in the `mode` attribute.
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Harvester => "harvester",
            Mode::Emulator => "emulator",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ShepherdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "harvester" => Ok(Mode::Harvester),
            "emulator" => Ok(Mode::Emulator),
            other => Err(ShepherdError::Format(format!("unsupported mode '{}'", other))),
        }
    }
}

/// Layout of the samples in the `iv` dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Datatype {
    /// Plain current/voltage samples over time.
    #[default]
    #[serde(rename = "ivsample")]
    IvSample,
    /// Consecutive windows each holding one voltage sweep.
    #[serde(rename = "ivcurve")]
    IvCurve,
    /// Short-circuit current and open-circuit voltage per sample.
    IscVoc,
}

impl Datatype {
    /// Name used in YAML and log output.
    pub fn as_str(self) -> &'static str {
        match self {
            Datatype::IvSample => "ivsample",
            Datatype::IvCurve => "ivcurve",
            Datatype::IscVoc => "isc_voc",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strongly typed content of the `config` attribute.
///
/// Recognized keys:
///
/// | key                 | type   | meaning                                            |
/// |---------------------|--------|----------------------------------------------------|
/// | `datatype`          | string | `ivsample`, `ivcurve` or `isc_voc`                 |
/// | `samplerate_sps`    | int    | sample rate of the `iv` dataset                    |
/// | `window_duration_s` | float  | duration of one ivcurve window (optional)          |
/// | `source`            | string | provenance, e.g. converter name and input file     |
/// | `description`       | string | free text (optional)                               |
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecordingConfig {
    /// Sample layout.
    #[serde(default)]
    pub datatype: Datatype,
    /// Sample rate in samples per second.
    #[serde(default = "default_samplerate")]
    pub samplerate_sps: u32,
    /// Duration of one window in seconds, only meaningful for ivcurves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_duration_s: Option<f64>,
    /// Producer of the data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_samplerate() -> u32 {
    SAMPLERATE_SPS_DEFAULT
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            datatype: Datatype::IvSample,
            samplerate_sps: SAMPLERATE_SPS_DEFAULT,
            window_duration_s: None,
            source: None,
            description: None,
        }
    }
}

impl RecordingConfig {
    /// Config for ivcurves whose windows hold exactly `window_samples` samples.
    pub fn ivcurve(window_samples: u64, samplerate_sps: u32) -> Self {
        Self {
            datatype: Datatype::IvCurve,
            samplerate_sps,
            window_duration_s: Some(window_samples as f64 / samplerate_sps as f64),
            ..Self::default()
        }
    }

    /// Set the provenance.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Interval between two samples in nanoseconds.
    pub fn sample_interval_ns(&self) -> u64 {
        1_000_000_000 / u64::from(self.samplerate_sps.max(1))
    }

    /// Number of samples per window, derived from duration and sample rate.
    pub fn window_samples(&self) -> AppResult<u64> {
        let duration = self.window_duration_s.ok_or_else(|| {
            ShepherdError::MissingData("configuration defines no window duration".to_string())
        })?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(ShepherdError::InvalidConfig(format!(
                "window duration must be positive, got {} s",
                duration
            )));
        }
        let samples = (duration * self.samplerate_sps as f64).round();
        if samples < 1.0 {
            return Err(ShepherdError::InvalidConfig(format!(
                "window of {} s is shorter than one sample period",
                duration
            )));
        }
        Ok(samples as u64)
    }

    /// Check the config against the mode it is recorded in.
    pub fn validate(&self, mode: Mode) -> AppResult<()> {
        if self.samplerate_sps == 0 {
            return Err(ShepherdError::InvalidConfig(
                "samplerate_sps must be > 0".to_string(),
            ));
        }
        if !mode.supported_datatypes().contains(&self.datatype) {
            return Err(ShepherdError::InvalidConfig(format!(
                "datatype '{}' is not supported in mode '{}'",
                self.datatype, mode
            )));
        }
        match (self.datatype, self.window_duration_s) {
            (Datatype::IvCurve, _) => {
                self.window_samples()?;
            }
            (_, Some(_)) => {
                tracing::warn!(
                    datatype = %self.datatype,
                    "window duration set although datatype is not ivcurve"
                );
            }
            _ => {}
        }
        Ok(())
    }

    /// Serialize to the YAML stored in the container.
    pub fn to_yaml(&self) -> AppResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Parse the YAML stored in the container.
    pub fn from_yaml(yaml: &str) -> AppResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ShepherdError::Format(format!("unreadable config attribute: {}", e)))
    }
}
