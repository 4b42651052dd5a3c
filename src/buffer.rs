//! Sample batches exchanged with readers and writers.

use crate::calibration::CalibrationSeries;
use crate::error::{AppResult, ShepherdError};
use crate::schema::{IV_CHANNELS, ROW_CURRENT, ROW_VOLTAGE};
use ndarray::{Array1, Array2, ArrayView1};

/// A batch of raw samples, as stored in the container.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBuffer {
    /// Timestamps in raw time units (ns with default calibration).
    pub time: Array1<u64>,
    /// Channel-major samples, row 0 current, row 1 voltage.
    pub iv: Array2<u32>,
}

impl RawBuffer {
    /// Build a batch, rejecting mismatching lengths or channel counts.
    pub fn new(time: Array1<u64>, iv: Array2<u32>) -> AppResult<Self> {
        let buffer = Self { time, iv };
        buffer.check_shape()?;
        Ok(buffer)
    }

    /// Build a batch from per-channel vectors.
    pub fn from_vecs(time: Vec<u64>, current: Vec<u32>, voltage: Vec<u32>) -> AppResult<Self> {
        if current.len() != voltage.len() {
            return Err(ShepherdError::Shape(format!(
                "current has {} samples, voltage {}",
                current.len(),
                voltage.len()
            )));
        }
        let n = current.len();
        let mut flat = current;
        flat.extend(voltage);
        let iv = Array2::from_shape_vec((IV_CHANNELS, n), flat)
            .map_err(|e| ShepherdError::Shape(e.to_string()))?;
        Self::new(Array1::from(time), iv)
    }

    /// Build a batch of `len` samples with equidistant timestamps.
    ///
    /// Fails with [`ShepherdError::Shape`] if the last timestamp does not fit into `u64`.
    pub fn from_start(
        start_ns: u64,
        interval_ns: u64,
        current: Vec<u32>,
        voltage: Vec<u32>,
    ) -> AppResult<Self> {
        let time = (0..current.len() as u64)
            .map(|i| {
                i.checked_mul(interval_ns)
                    .and_then(|offset| start_ns.checked_add(offset))
                    .ok_or_else(|| {
                        ShepherdError::Shape(format!(
                            "timestamp {} of a batch starting at {} ns overflows",
                            i, start_ns
                        ))
                    })
            })
            .collect::<AppResult<Vec<u64>>>()?;
        Self::from_vecs(time, current, voltage)
    }

    /// Check the channel layout.
    pub fn check_shape(&self) -> AppResult<()> {
        let (channels, n) = self.iv.dim();
        if channels != IV_CHANNELS {
            return Err(ShepherdError::Shape(format!(
                "expected {} channels, got {}",
                IV_CHANNELS, channels
            )));
        }
        if n != self.time.len() {
            return Err(ShepherdError::Shape(format!(
                "{} timestamps for {} samples",
                self.time.len(),
                n
            )));
        }
        Ok(())
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True if the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Raw current samples.
    pub fn current(&self) -> ArrayView1<'_, u32> {
        self.iv.row(ROW_CURRENT)
    }

    /// Raw voltage samples.
    pub fn voltage(&self) -> ArrayView1<'_, u32> {
        self.iv.row(ROW_VOLTAGE)
    }

    /// True if timestamps strictly increase within the batch and start after `previous`.
    pub fn is_monotonic_after(&self, previous: Option<u64>) -> bool {
        let mut last = previous;
        for &t in self.time.iter() {
            if matches!(last, Some(prev) if t <= prev) {
                return false;
            }
            last = Some(t);
        }
        true
    }

    /// Convert to SI units.
    pub fn to_si(&self, cal: &CalibrationSeries) -> SiBuffer {
        SiBuffer {
            time: self.time.mapv(|t| cal.time.raw_to_si(t as f64)),
            current: self.current().mapv(|v| cal.current.raw_to_si(f64::from(v))),
            voltage: self.voltage().mapv(|v| cal.voltage.raw_to_si(f64::from(v))),
        }
    }
}

/// A batch of samples in SI units (s, A, V).
#[derive(Debug, Clone, PartialEq)]
pub struct SiBuffer {
    /// Timestamps in s.
    pub time: Array1<f64>,
    /// Current in A.
    pub current: Array1<f64>,
    /// Voltage in V.
    pub voltage: Array1<f64>,
}

impl SiBuffer {
    /// Build a batch, rejecting mismatching lengths.
    pub fn new(time: Array1<f64>, current: Array1<f64>, voltage: Array1<f64>) -> AppResult<Self> {
        let buffer = Self { time, current, voltage };
        buffer.check_shape()?;
        Ok(buffer)
    }

    /// Check all channels have the same length.
    pub fn check_shape(&self) -> AppResult<()> {
        let n = self.time.len();
        if self.current.len() != n || self.voltage.len() != n {
            return Err(ShepherdError::Shape(format!(
                "time has {} samples, current {}, voltage {}",
                n,
                self.current.len(),
                self.voltage.len()
            )));
        }
        Ok(())
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.time.len()
    }

    /// True if the batch holds no samples.
    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Quantize into raw units. Values are rounded and clamped into the container range.
    pub fn to_raw(&self, cal: &CalibrationSeries) -> AppResult<RawBuffer> {
        self.check_shape()?;
        let n = self.len();
        let mut iv = Array2::<u32>::zeros((IV_CHANNELS, n));
        for (i, (&c, &v)) in self.current.iter().zip(self.voltage.iter()).enumerate() {
            iv[[ROW_CURRENT, i]] = cal.current.si_to_raw_u32(c);
            iv[[ROW_VOLTAGE, i]] = cal.voltage.si_to_raw_u32(v);
        }
        let time = self.time.mapv(|t| cal.time.si_to_raw_u64(t));
        RawBuffer::new(time, iv)
    }

    /// Power per sample in W.
    pub fn power(&self) -> Array1<f64> {
        &self.current * &self.voltage
    }
}
