//! Sleep stage classification
//!
//! The detector only consults a classifier when the user is asleep and the
//! window confidence clears the gate; otherwise the stage is forced to awake.
//! Implementations must be deterministic given identical inputs so that a
//! recorded window sequence replays to the same stages.

use crate::config::StageConfig;
use crate::types::{AudioFeatures, MovementFeatures, SleepStage};
use crate::window::SensorWindow;

/// Assigns a sleep stage to a window already known to be asleep
pub trait StageClassifier: Send {
    /// Return one of light, deep or rem
    fn classify(
        &self,
        movement: &MovementFeatures,
        audio: &AudioFeatures,
        window: &SensorWindow,
    ) -> SleepStage;
}

/// Movement/audio threshold heuristic
#[derive(Debug, Clone, Default)]
pub struct HeuristicStageClassifier {
    config: StageConfig,
}

impl HeuristicStageClassifier {
    pub fn new(config: StageConfig) -> Self {
        Self { config }
    }
}

impl StageClassifier for HeuristicStageClassifier {
    fn classify(
        &self,
        movement: &MovementFeatures,
        audio: &AudioFeatures,
        _window: &SensorWindow,
    ) -> SleepStage {
        let still = movement.average_magnitude < self.config.deep_max_magnitude;

        if still && movement.peak_count == 0 && !audio.is_noisy {
            return SleepStage::Deep;
        }

        // muscle atonia with isolated twitches, no snoring
        if movement.average_magnitude < self.config.rem_max_magnitude
            && movement.peak_count > 0
            && !audio.is_snoring
        {
            return SleepStage::Rem;
        }

        SleepStage::Light
    }
}
