//! Lossless compression filter applied to sample datasets.
//!
//! - `lzf`: low to moderate compression, very fast, roughly halves the file for ~20 %
//!   CPU overhead on the BeagleBone.
//! - `gzip`: better compression at moderate speed. Only level 1 is accepted, higher levels
//!   cost too much CPU on the target board for little gain.
//!
//! The filter is chosen once when a container is created and cannot change afterwards.

use crate::error::{AppResult, ShepherdError};
use hdf5::filters::Filter;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The only gzip level supported on the target board.
pub const GZIP_LEVEL: u8 = 1;

/// Compression selected at container creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Compression {
    /// Store chunks uncompressed.
    None,
    /// LZF filter.
    Lzf,
    /// Deflate filter with the given level, only [`GZIP_LEVEL`] passes validation.
    Gzip(u8),
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Gzip(GZIP_LEVEL)
    }
}

impl Compression {
    /// Build a gzip setting, rejecting every level except [`GZIP_LEVEL`].
    pub fn gzip(level: u8) -> AppResult<Self> {
        Compression::Gzip(level).validate()
    }

    /// Reject gzip levels other than [`GZIP_LEVEL`].
    pub fn validate(self) -> AppResult<Self> {
        match self {
            Compression::Gzip(level) if level != GZIP_LEVEL => {
                Err(ShepherdError::InvalidConfig(format!(
                    "gzip level {} is not supported, only {} is allowed",
                    level, GZIP_LEVEL
                )))
            }
            other => Ok(other),
        }
    }

    /// Identify the compression from the filter pipeline of an existing dataset.
    ///
    /// Returns `None` for pipelines this library would never create (e.g. gzip 9, szip).
    pub fn detect(filters: &[Filter]) -> Option<Self> {
        let mut found = Compression::None;
        for filter in filters {
            match filter {
                Filter::Deflate(level) if *level == GZIP_LEVEL => found = Compression::Gzip(*level),
                Filter::LZF => found = Compression::Lzf,
                Filter::Shuffle | Filter::Fletcher32 => {}
                _ => return None,
            }
        }
        Some(found)
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Lzf => write!(f, "lzf"),
            Compression::Gzip(level) => write!(f, "gzip-{}", level),
        }
    }
}

impl FromStr for Compression {
    type Err = ShepherdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "none" | "" => Ok(Compression::None),
            "lzf" => Ok(Compression::Lzf),
            "gzip" | "default" => Ok(Compression::default()),
            other => {
                let level = other
                    .strip_prefix("gzip-")
                    .or_else(|| other.strip_prefix("gzip"))
                    .unwrap_or(other);
                match level.parse::<u8>() {
                    Ok(level) => Compression::gzip(level),
                    Err(_) => Err(ShepherdError::InvalidConfig(format!(
                        "unknown compression '{}', expected none, lzf or gzip",
                        s
                    ))),
                }
            }
        }
    }
}

impl TryFrom<String> for Compression {
    type Error = ShepherdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Compression> for String {
    fn from(value: Compression) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_supported_values() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("LZF".parse::<Compression>().unwrap(), Compression::Lzf);
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip(1));
        assert_eq!("gzip-1".parse::<Compression>().unwrap(), Compression::Gzip(1));
        assert_eq!("1".parse::<Compression>().unwrap(), Compression::Gzip(1));
    }

    #[test]
    fn rejects_other_levels_and_codecs() {
        assert!(matches!(
            "gzip-4".parse::<Compression>(),
            Err(ShepherdError::InvalidConfig(_))
        ));
        assert!("9".parse::<Compression>().is_err());
        assert!("blosc".parse::<Compression>().is_err());
        assert!(Compression::gzip(0).is_err());
    }

    #[test]
    fn detects_filter_pipelines() {
        assert_eq!(Compression::detect(&[]), Some(Compression::None));
        assert_eq!(
            Compression::detect(&[Filter::Deflate(1)]),
            Some(Compression::Gzip(1))
        );
        assert_eq!(Compression::detect(&[Filter::LZF]), Some(Compression::Lzf));
        assert_eq!(Compression::detect(&[Filter::Deflate(9)]), None);
    }

    #[test]
    fn display_roundtrips() {
        for c in [Compression::None, Compression::Lzf, Compression::Gzip(1)] {
            assert_eq!(c.to_string().parse::<Compression>().unwrap(), c);
        }
    }
}
