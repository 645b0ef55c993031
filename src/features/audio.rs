//! Audio feature extraction
//!
//! Summarizes decibel readings and snore hints into noise and snore flags.

use crate::config::AudioConfig;
use crate::types::AudioFeatures;
use crate::window::SensorWindow;

pub struct AudioExtractor<'a> {
    config: &'a AudioConfig,
}

impl<'a> AudioExtractor<'a> {
    pub fn new(config: &'a AudioConfig) -> Self {
        Self { config }
    }

    pub fn extract(&self, window: &SensorWindow) -> AudioFeatures {
        let readings: Vec<(f64, bool)> = window
            .iter()
            .filter_map(|s| s.audio.map(|a| (a.decibels, a.snore_hint)))
            .collect();

        if readings.is_empty() {
            return AudioFeatures::empty();
        }

        let n = readings.len() as f64;
        let average_db = readings.iter().map(|(db, _)| db).sum::<f64>() / n;
        let peak_db = readings
            .iter()
            .map(|(db, _)| *db)
            .fold(f64::NEG_INFINITY, f64::max);
        let snore_frames = readings.iter().filter(|(_, snore)| *snore).count() as f64;

        AudioFeatures {
            sample_count: readings.len(),
            average_db,
            peak_db,
            is_noisy: average_db > self.config.noise_threshold_db
                || peak_db > self.config.noise_peak_db,
            is_snoring: snore_frames / n >= self.config.snore_ratio,
        }
    }
}
