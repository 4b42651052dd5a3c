//! # Shepherd Data Library
//!
//! This crate reads and writes recordings of the Shepherd energy-harvesting testbed. A
//! recording is an HDF5 container holding timestamped current/voltage samples together
//! with their calibration and descriptive metadata. Storage, chunking and compression
//! are left to libhdf5.
//!
//! ## Crate Structure
//!
//! - **`error`**: `ShepherdError` and the `AppResult` alias used throughout the crate.
//! - **`calibration`**: Gain/offset pairs and raw <-> SI conversion.
//! - **`compression`**: Accepted dataset compressions.
//! - **`config`**: `RecordingConfig` stored inside every container, plus `Mode` and `Datatype`.
//! - **`settings`**: Tool settings loaded from TOML and `SHEPHERD_` environment variables.
//! - **`schema`**: The fixed container layout and attribute helpers.
//! - **`buffer`**: Sample batches in raw and SI units.
//! - **`validation`**: Structural validity check shared by reader and writer.
//! - **`metadata`**: Descriptive attributes and the recursive file summary.
//! - **`reader`** / **`writer`**: Scoped access to one container.
//! - **`downsample`**, **`extract`**, **`generate`**, **`ivonne`**: Tools built on top.
//! - **`logging`**: Subscriber setup for the command line tool.
//!
//! ## Example
//!
//! ```no_run
//! use shepherd_data::Reader;
//!
//! # fn main() -> shepherd_data::AppResult<()> {
//! let reader = Reader::open("hrv.h5")?;
//! let cal = reader.get_calibration_data()?;
//! for buffer in reader.read_buffers_raw()? {
//!     let si = buffer?.to_si(&cal);
//!     println!("{} samples, {:.3} W peak", si.len(), si.power().fold(0.0f64, |a, &p| a.max(p)));
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod calibration;
pub mod compression;
pub mod config;
pub mod downsample;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ivonne;
pub mod logging;
pub mod metadata;
pub mod reader;
pub mod schema;
pub mod settings;
pub mod validation;
pub mod writer;

pub use buffer::{RawBuffer, SiBuffer};
pub use calibration::{CalibrationPair, CalibrationSeries};
pub use compression::Compression;
pub use config::{Datatype, Mode, RecordingConfig};
pub use error::{AppResult, ShepherdError};
pub use metadata::{Metadata, MetadataBuilder, NodeSummary};
pub use reader::Reader;
pub use settings::Settings;
pub use validation::ValidationReport;
pub use writer::{Writer, WriterOptions};
