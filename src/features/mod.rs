//! Window feature extraction
//!
//! This module turns the current sample window into summary features:
//! - Movement: magnitudes, smoothing, variance, peaks and intensity band
//! - Audio: loudness plus noise and snore flags
//!
//! Extractors are pure functions of the window contents.

mod audio;
mod movement;

pub use audio::AudioExtractor;
pub use movement::{moving_average, MovementExtractor};

use crate::config::DetectorConfig;
use crate::types::{AudioFeatures, MovementFeatures};
use crate::window::SensorWindow;

/// Features for one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowFeatures {
    pub movement: MovementFeatures,
    pub audio: AudioFeatures,
    pub average_lux: Option<f64>,
}

/// Run every extractor over `window`
pub fn extract(window: &SensorWindow, config: &DetectorConfig) -> WindowFeatures {
    WindowFeatures {
        movement: MovementExtractor::new(&config.movement).extract(window),
        audio: AudioExtractor::new(&config.audio).extract(window),
        average_lux: window.average_lux(),
    }
}

/// Population mean and variance
pub(crate) fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance)
}
