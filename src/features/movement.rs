//! Movement feature extraction
//!
//! Derives per-window movement features from accelerometer samples:
//! - Per-sample vector magnitude
//! - Trailing moving average
//! - Average magnitude, variance and standard deviation
//! - Peak count and intensity band

use super::mean_and_variance;
use crate::config::MovementConfig;
use crate::types::{MovementFeatures, MovementIntensity};
use crate::window::SensorWindow;

/// Movement extractor bound to a configuration
pub struct MovementExtractor<'a> {
    config: &'a MovementConfig,
}

impl<'a> MovementExtractor<'a> {
    pub fn new(config: &'a MovementConfig) -> Self {
        Self { config }
    }

    /// Extract movement features from the window's accelerometer samples
    pub fn extract(&self, window: &SensorWindow) -> MovementFeatures {
        let magnitudes: Vec<f64> = window.iter().filter_map(|s| s.movement_magnitude()).collect();
        self.from_magnitudes(magnitudes)
    }

    /// Extract movement features from precomputed magnitudes
    pub fn from_magnitudes(&self, magnitudes: Vec<f64>) -> MovementFeatures {
        if magnitudes.is_empty() {
            return MovementFeatures::empty();
        }

        let (average_magnitude, variance) = mean_and_variance(&magnitudes);
        let smoothed = moving_average(&magnitudes, self.config.smoothing_window);
        let peak_count = count_peaks(
            &magnitudes,
            average_magnitude * self.config.peak_factor,
            self.config.peak_min_separation,
        );
        let intensity = self.classify_intensity(average_magnitude);

        MovementFeatures {
            sample_count: magnitudes.len(),
            magnitudes,
            smoothed,
            average_magnitude,
            variance,
            std_dev: variance.sqrt(),
            peak_count,
            intensity,
        }
    }

    /// Map an average magnitude to an intensity band
    pub fn classify_intensity(&self, magnitude: f64) -> MovementIntensity {
        if magnitude < self.config.low_cutoff {
            MovementIntensity::None
        } else if magnitude < self.config.medium_cutoff {
            MovementIntensity::Low
        } else if magnitude < self.config.high_cutoff {
            MovementIntensity::Medium
        } else {
            MovementIntensity::High
        }
    }
}

/// Trailing moving average; early entries average over the samples seen so far
pub fn moving_average(values: &[f64], width: usize) -> Vec<f64> {
    let width = width.max(1);
    let mut out = Vec::with_capacity(values.len());
    let mut running = 0.0;

    for (i, value) in values.iter().enumerate() {
        running += value;
        if i >= width {
            running -= values[i - width];
        }
        let n = (i + 1).min(width) as f64;
        out.push(running / n);
    }

    out
}

/// Count local maxima strictly above `threshold`, at least `min_separation` apart
fn count_peaks(values: &[f64], threshold: f64, min_separation: usize) -> u32 {
    if values.len() < 3 {
        return 0;
    }

    let mut count = 0;
    let mut last_peak: Option<usize> = None;

    for i in 1..values.len() - 1 {
        let is_local_max = values[i] > values[i - 1] && values[i] >= values[i + 1];
        if !is_local_max || values[i] <= threshold {
            continue;
        }
        if let Some(last) = last_peak {
            if i - last < min_separation {
                continue;
            }
        }
        count += 1;
        last_peak = Some(i);
    }

    count
}
