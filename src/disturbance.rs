//! Disturbance detection
//!
//! Flags a window as disturbed by movement spikes, noise or ambient light.
//! Stateless per invocation; the session aggregator decides what to log.

use crate::config::DisturbanceConfig;
use crate::types::{AudioFeatures, DisturbanceKind, DisturbanceReport, MovementFeatures};

pub struct DisturbanceCounter<'a> {
    config: &'a DisturbanceConfig,
}

impl<'a> DisturbanceCounter<'a> {
    pub fn new(config: &'a DisturbanceConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(
        &self,
        movement: &MovementFeatures,
        audio: &AudioFeatures,
        average_lux: Option<f64>,
    ) -> DisturbanceReport {
        let mut kinds = Vec::with_capacity(3);

        if self.is_significant_movement(movement) {
            kinds.push(DisturbanceKind::Movement);
        }
        if audio.is_noisy {
            kinds.push(DisturbanceKind::Noise);
        }
        if average_lux.is_some_and(|lux| lux > self.config.light_lux) {
            kinds.push(DisturbanceKind::Light);
        }

        DisturbanceReport { kinds }
    }

    fn is_significant_movement(&self, movement: &MovementFeatures) -> bool {
        movement.average_magnitude > self.config.movement_magnitude
            || movement.peak_count > self.config.movement_peaks
    }
}
