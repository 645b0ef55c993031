//! Sliding sample window
//!
//! A fixed-capacity FIFO buffer of the most recent sensor samples. The
//! buffer assumes monotonic input: samples older than the newest buffered
//! sample are rejected rather than reordered.

use crate::error::SleepError;
use crate::types::SensorSample;
use std::collections::VecDeque;

/// Default window capacity in samples
pub const DEFAULT_WINDOW_SIZE: usize = 30;

#[derive(Debug, Clone)]
pub struct SensorWindow {
    samples: VecDeque<SensorSample>,
    capacity: usize,
}

impl Default for SensorWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}

impl SensorWindow {
    /// Create a window holding at most `capacity` samples (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    ///
    /// Samples with the same timestamp as the newest buffered one are accepted.
    pub fn push(&mut self, sample: SensorSample) -> Result<(), SleepError> {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp < newest.timestamp {
                return Err(SleepError::OutOfOrderSample {
                    sample: sample.timestamp.to_rfc3339(),
                    newest: newest.timestamp.to_rfc3339(),
                });
            }
        }

        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorSample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&SensorSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Average lux over samples carrying light data
    pub fn average_lux(&self) -> Option<f64> {
        let lux: Vec<f64> = self
            .samples
            .iter()
            .filter_map(|s| s.light.map(|l| l.lux))
            .collect();
        if lux.is_empty() {
            return None;
        }
        Some(lux.iter().sum::<f64>() / lux.len() as f64)
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}
