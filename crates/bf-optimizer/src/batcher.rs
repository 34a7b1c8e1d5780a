//! Fixed-size averaging of per-image measurements.

use bf_types::{config_error, invalid_measurement, BfResult};

/// Groups consecutive measurements and emits one mean per full group.
#[derive(Debug, Clone)]
pub struct Batcher {
    group_size: usize,
    sum: f64,
    count: usize,
}

impl Batcher {
    pub fn new(group_size: usize) -> BfResult<Self> {
        if group_size == 0 {
            return Err(config_error!("image group size must be at least 1"));
        }
        Ok(Self {
            group_size,
            sum: 0.0,
            count: 0,
        })
    }

    /// Add one measurement. Returns the group mean when this measurement
    /// completes a group.
    ///
    /// NaN, infinite and negative values are rejected and leave the partial
    /// group untouched.
    pub fn push(&mut self, measurement: f64) -> BfResult<Option<f64>> {
        if !measurement.is_finite() {
            return Err(invalid_measurement!(measurement, "measurement is not finite"));
        }
        if measurement < 0.0 {
            return Err(invalid_measurement!(measurement, "brightness cannot be negative"));
        }

        self.sum += measurement;
        self.count += 1;

        if self.count < self.group_size {
            return Ok(None);
        }

        let mean = self.sum / self.count as f64;
        self.reset();
        Ok(Some(mean))
    }

    /// Drop any partial group.
    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.count = 0;
    }

    /// Measurements buffered toward the next group.
    pub fn pending(&self) -> usize {
        self.count
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }
}
