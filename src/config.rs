//! Pipeline configuration
//!
//! Every threshold the detector, scorer and calibrator use lives here so that
//! product-chosen constants can be tuned without touching the algorithms.
//! All sections deserialize with defaults, so a partial JSON document is valid.

use crate::error::SleepError;
use crate::types::SensorCalibration;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Movement feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementConfig {
    /// Trailing moving-average width (samples)
    pub smoothing_window: usize,
    /// A peak must exceed `peak_factor × average magnitude`
    pub peak_factor: f64,
    /// Minimum distance between two counted peaks (samples)
    pub peak_min_separation: usize,
    /// Intensity cut-points: below `low_cutoff` is none, below `medium_cutoff`
    /// low, below `high_cutoff` medium, otherwise high
    pub low_cutoff: f64,
    pub medium_cutoff: f64,
    pub high_cutoff: f64,
}

impl Default for MovementConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 5,
            peak_factor: 1.5,
            peak_min_separation: 5,
            low_cutoff: 0.1,
            medium_cutoff: 0.5,
            high_cutoff: 1.5,
        }
    }
}

/// Audio feature extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Average level above which the window is noisy (dB)
    pub noise_threshold_db: f64,
    /// Single-frame level above which the window is noisy (dB)
    pub noise_peak_db: f64,
    /// Fraction of snore-hinted frames needed to flag snoring
    pub snore_ratio: f64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            noise_threshold_db: 50.0,
            noise_peak_db: 70.0,
            snore_ratio: 0.3,
        }
    }
}

/// Sleep/wake hysteresis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HysteresisConfig {
    pub sleep_threshold: f64,
    pub awake_threshold: f64,
    /// Consecutive low-movement windows before declaring sleep
    pub windows_to_sleep: u32,
    /// Consecutive high-movement windows before declaring wake
    pub windows_to_wake: u32,
    /// Minimum confidence for stage assignment
    pub stage_confidence_gate: f64,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        Self {
            sleep_threshold: 0.3,
            awake_threshold: 0.8,
            windows_to_sleep: 3,
            windows_to_wake: 2,
            stage_confidence_gate: 0.7,
        }
    }
}

/// Stage heuristic settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageConfig {
    /// Deep sleep requires average magnitude below this and no peaks
    pub deep_max_magnitude: f64,
    /// REM requires average magnitude below this with at least one twitch
    pub rem_max_magnitude: f64,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            deep_max_magnitude: 0.05,
            rem_max_magnitude: 0.15,
        }
    }
}

/// Disturbance thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisturbanceConfig {
    pub movement_magnitude: f64,
    pub movement_peaks: u32,
    pub light_lux: f64,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            movement_magnitude: 0.5,
            movement_peaks: 3,
            light_lux: 10.0,
        }
    }
}

/// Everything a `SleepDetector` needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Sliding window capacity (samples)
    pub window_size: usize,
    pub movement: MovementConfig,
    pub audio: AudioConfig,
    pub hysteresis: HysteresisConfig,
    pub stage: StageConfig,
    pub disturbance: DisturbanceConfig,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            window_size: 30,
            movement: MovementConfig::default(),
            audio: AudioConfig::default(),
            hysteresis: HysteresisConfig::default(),
            stage: StageConfig::default(),
            disturbance: DisturbanceConfig::default(),
        }
    }
}

impl DetectorConfig {
    /// Derive a detector config personalized with a user's calibration.
    ///
    /// The awake threshold becomes the calibrated movement threshold and the
    /// sleep threshold keeps its ratio to it. Sound and light thresholds only
    /// ever raise the configured values.
    pub fn calibrated(&self, calibration: &SensorCalibration) -> Self {
        let mut config = self.clone();

        if calibration.movement_threshold > 0.0 {
            let ratio = self.hysteresis.sleep_threshold / self.hysteresis.awake_threshold;
            config.hysteresis.awake_threshold = calibration.movement_threshold;
            config.hysteresis.sleep_threshold = calibration.movement_threshold * ratio;
        }

        config.audio.noise_threshold_db = self
            .audio
            .noise_threshold_db
            .max(calibration.sound_threshold);
        config.disturbance.light_lux = self.disturbance.light_lux.max(calibration.light_threshold);

        config
    }
}

/// Total-score weights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub duration: f64,
    pub efficiency: f64,
    pub latency: f64,
    pub stages: f64,
    pub disturbances: f64,
    pub circadian: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            duration: 0.25,
            efficiency: 0.25,
            latency: 0.15,
            stages: 0.15,
            disturbances: 0.10,
            circadian: 0.10,
        }
    }
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.duration
            + self.efficiency
            + self.latency
            + self.stages
            + self.disturbances
            + self.circadian
    }
}

/// High/low marks for factor highlights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FactorMarks {
    /// Sub-score at or above this is a positive highlight
    pub high: u8,
    /// Sub-score below this is a negative highlight
    pub low: u8,
}

/// Per-category factor marks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorThresholds {
    pub duration: FactorMarks,
    pub efficiency: FactorMarks,
    pub latency: FactorMarks,
    pub stages: FactorMarks,
    pub disturbances: FactorMarks,
    pub circadian: FactorMarks,
}

impl Default for FactorThresholds {
    fn default() -> Self {
        Self {
            duration: FactorMarks { high: 90, low: 60 },
            efficiency: FactorMarks { high: 90, low: 75 },
            latency: FactorMarks { high: 85, low: 50 },
            stages: FactorMarks { high: 80, low: 50 },
            disturbances: FactorMarks { high: 95, low: 70 },
            circadian: FactorMarks { high: 85, low: 60 },
        }
    }
}

/// Sleep scorer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// Duration target when no baseline exists (hours)
    pub default_target_hours: f64,
    pub weights: ScoreWeights,
    pub factors: FactorThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            default_target_hours: 8.0,
            weights: ScoreWeights::default(),
            factors: FactorThresholds::default(),
        }
    }
}

/// Baseline calibration settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Qualifying sessions needed before a baseline is computed
    pub required_sessions: usize,
    /// How far back the engine looks for qualifying sessions (days)
    pub lookback_days: u32,
    pub movement_percentile: f64,
    pub sound_percentile: f64,
    pub light_percentile: f64,
    /// Fallbacks when no sensor data of a kind exists
    pub default_movement_threshold: f64,
    pub default_sound_threshold: f64,
    pub default_light_threshold: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            required_sessions: crate::baseline::DEFAULT_BASELINE_WINDOW,
            lookback_days: 30,
            movement_percentile: 0.95,
            sound_percentile: 0.90,
            light_percentile: 0.90,
            default_movement_threshold: 0.8,
            default_sound_threshold: 50.0,
            default_light_threshold: 10.0,
        }
    }
}

/// Session aggregation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Pending samples that trigger a chunk flush
    pub chunk_flush_threshold: usize,
    /// Gap between the two awake observations that confirm the end of sleep
    pub wake_confirmation_minutes: i64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_flush_threshold: 300,
            wake_confirmation_minutes: 10,
        }
    }
}

/// Health-platform delivery settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Names of the registered sync targets completed sessions go to
    pub platforms: Vec<String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SleepSenseConfig {
    pub detector: DetectorConfig,
    pub scoring: ScoringConfig,
    pub calibration: CalibrationConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
}

impl SleepSenseConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self, SleepError> {
        let config: SleepSenseConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn from_path(path: &Path) -> Result<Self, SleepError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Result<String, SleepError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check cross-field invariants serde cannot express
    pub fn validate(&self) -> Result<(), SleepError> {
        let detector = &self.detector;
        if detector.window_size == 0 {
            return Err(SleepError::Config("detector.window_size must be > 0".into()));
        }
        if detector.movement.smoothing_window == 0 {
            return Err(SleepError::Config(
                "detector.movement.smoothing_window must be > 0".into(),
            ));
        }
        let movement = &detector.movement;
        if !(movement.low_cutoff < movement.medium_cutoff
            && movement.medium_cutoff < movement.high_cutoff)
        {
            return Err(SleepError::Config(
                "movement intensity cut-points must be strictly increasing".into(),
            ));
        }
        let hysteresis = &detector.hysteresis;
        if hysteresis.sleep_threshold <= 0.0 || hysteresis.sleep_threshold >= hysteresis.awake_threshold
        {
            return Err(SleepError::Config(
                "hysteresis.sleep_threshold must be positive and below awake_threshold".into(),
            ));
        }
        if hysteresis.windows_to_sleep == 0 || hysteresis.windows_to_wake == 0 {
            return Err(SleepError::Config(
                "hysteresis window counts must be > 0".into(),
            ));
        }
        if (self.scoring.weights.sum() - 1.0).abs() > 1e-6 {
            return Err(SleepError::Config(format!(
                "scoring weights must sum to 1.0, got {}",
                self.scoring.weights.sum()
            )));
        }
        let calibration = &self.calibration;
        if calibration.required_sessions == 0 {
            return Err(SleepError::Config(
                "calibration.required_sessions must be > 0".into(),
            ));
        }
        for (name, p) in [
            ("movement_percentile", calibration.movement_percentile),
            ("sound_percentile", calibration.sound_percentile),
            ("light_percentile", calibration.light_percentile),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(SleepError::Config(format!(
                    "calibration.{name} must be within 0..=1"
                )));
            }
        }
        Ok(())
    }
}
