//! Custom error types for the library.
//!
//! This module defines the primary error type, `ShepherdError`, used by every reader,
//! writer and tool in the crate. Using the `thiserror` crate, it provides a single place
//! where container problems, lifecycle violations and wrapped library failures meet.
//!
//! ## Error Hierarchy
//!
//! - **`Format`**: The container exists but its structure does not match the expected
//!   layout (wrong rank, wrong dtype, unparsable attribute).
//! - **`MissingData`**: A dataset or attribute that the operation needs is absent.
//! - **`State`**: An operation was invoked in the wrong lifecycle order, e.g. the
//!   configuration is embedded after samples were appended, or timestamps run backwards.
//! - **`Shape`**: A sample batch does not match the channel layout of the container.
//! - **`Calibration`**: Calibration coefficients are missing or out of range when a
//!   raw<->SI conversion is requested.
//! - **`InvalidConfig`**: Semantic errors in a recording configuration or tool setting
//!   that parse fine but make no sense (zero window, unsupported compression level).
//!
//! The remaining variants wrap errors of the underlying libraries via `#[from]`, so the
//! `?` operator works across HDF5, YAML, CSV and I/O calls.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type AppResult<T> = std::result::Result<T, ShepherdError>;

/// Errors raised by readers, writers and conversion tools.
#[derive(Error, Debug)]
pub enum ShepherdError {
    /// Structure or shape mismatch inside a container.
    #[error("Container format error: {0}")]
    Format(String),

    /// Expected dataset or attribute is absent.
    #[error("Missing data: {0}")]
    MissingData(String),

    /// Operation invoked in the wrong lifecycle order.
    #[error("Invalid state: {0}")]
    State(String),

    /// Sample batch does not match the channel layout.
    #[error("Shape mismatch: {0}")]
    Shape(String),

    /// Calibration coefficients missing or invalid.
    #[error("Calibration error: {0}")]
    Calibration(String),

    /// Configuration values that are well-formed but unusable.
    #[error("Configuration validation error: {0}")]
    InvalidConfig(String),

    /// Settings file or environment could not be loaded.
    #[error("Settings error: {0}")]
    Settings(#[from] Box<figment::Error>),

    /// Error reported by libhdf5.
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),

    /// String could not be stored as an HDF5 string.
    #[error("String encoding error: {0}")]
    Encoding(#[from] hdf5::types::StringError),

    /// File system error outside of libhdf5.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML (de)serialization of config or metadata failed.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// CSV input or output failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl From<figment::Error> for ShepherdError {
    fn from(value: figment::Error) -> Self {
        ShepherdError::Settings(Box::new(value))
    }
}

impl ShepherdError {
    /// True for the error kinds describing the container contents rather than the
    /// environment (I/O, libhdf5 failures). Tools use this to decide whether to skip a
    /// file and continue with the next one.
    pub fn is_content_error(&self) -> bool {
        matches!(
            self,
            ShepherdError::Format(_)
                | ShepherdError::MissingData(_)
                | ShepherdError::Shape(_)
                | ShepherdError::Calibration(_)
                | ShepherdError::InvalidConfig(_)
        )
    }
}
