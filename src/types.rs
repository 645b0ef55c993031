//! Core types for the SleepSense pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: raw sensor samples, per-window features and states, completed
//! sessions, baselines and score breakdowns.

use crate::error::SleepError;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Accelerometer reading (device units, gravity removed)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Acceleration {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Acceleration {
    /// Vector magnitude `sqrt(x² + y² + z²)`
    pub fn magnitude(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Microphone reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioReading {
    /// Sound pressure level (dB)
    pub decibels: f64,
    /// Set by the acquisition layer when this frame matched a snore pattern
    #[serde(default)]
    pub snore_hint: bool,
}

/// Ambient light reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightReading {
    pub lux: f64,
}

/// One timestamped reading from the acquisition hardware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerometer: Option<Acceleration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioReading>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub light: Option<LightReading>,
}

impl SensorSample {
    /// Create an empty sample at the given time
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            accelerometer: None,
            audio: None,
            light: None,
        }
    }

    pub fn with_accelerometer(mut self, x: f64, y: f64, z: f64) -> Self {
        self.accelerometer = Some(Acceleration { x, y, z });
        self
    }

    pub fn with_audio(mut self, decibels: f64, snore_hint: bool) -> Self {
        self.audio = Some(AudioReading {
            decibels,
            snore_hint,
        });
        self
    }

    pub fn with_light(mut self, lux: f64) -> Self {
        self.light = Some(LightReading { lux });
        self
    }

    /// Accelerometer magnitude, if this sample carries one
    pub fn movement_magnitude(&self) -> Option<f64> {
        self.accelerometer.as_ref().map(Acceleration::magnitude)
    }

    /// Reject readings the pipeline cannot reason about
    pub fn validate(&self) -> Result<(), SleepError> {
        if let Some(acc) = &self.accelerometer {
            if !(acc.x.is_finite() && acc.y.is_finite() && acc.z.is_finite()) {
                return Err(SleepError::InvalidInput(format!(
                    "non-finite accelerometer reading at {}",
                    self.timestamp
                )));
            }
        }
        if let Some(audio) = &self.audio {
            if !audio.decibels.is_finite() {
                return Err(SleepError::InvalidInput(format!(
                    "non-finite decibel reading at {}",
                    self.timestamp
                )));
            }
        }
        if let Some(light) = &self.light {
            if !light.lux.is_finite() || light.lux < 0.0 {
                return Err(SleepError::InvalidInput(format!(
                    "invalid lux reading {} at {}",
                    light.lux, self.timestamp
                )));
            }
        }
        Ok(())
    }
}

/// Sleep stage classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
}

impl SleepStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
        }
    }
}

impl std::fmt::Display for SleepStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse movement band derived from the average window magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementIntensity {
    None,
    Low,
    Medium,
    High,
}

/// Movement summary for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementFeatures {
    /// Number of samples in the window carrying accelerometer data
    pub sample_count: usize,
    /// Per-sample magnitudes, oldest first
    pub magnitudes: Vec<f64>,
    /// Trailing moving average of `magnitudes`
    pub smoothed: Vec<f64>,
    pub average_magnitude: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub peak_count: u32,
    pub intensity: MovementIntensity,
}

impl MovementFeatures {
    /// Features for a window without accelerometer data
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            magnitudes: Vec::new(),
            smoothed: Vec::new(),
            average_magnitude: 0.0,
            variance: 0.0,
            std_dev: 0.0,
            peak_count: 0,
            intensity: MovementIntensity::None,
        }
    }

    pub fn has_data(&self) -> bool {
        self.sample_count > 0
    }
}

/// Audio summary for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub sample_count: usize,
    pub average_db: f64,
    pub peak_db: f64,
    pub is_noisy: bool,
    pub is_snoring: bool,
}

impl AudioFeatures {
    pub fn empty() -> Self {
        Self {
            sample_count: 0,
            average_db: 0.0,
            peak_db: 0.0,
            is_noisy: false,
            is_snoring: false,
        }
    }
}

/// Classification emitted once per processed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepState {
    pub is_asleep: bool,
    /// 0-1, lowered by motion variance regardless of the asleep decision
    pub confidence: f64,
    pub stage: SleepStage,
    pub timestamp: DateTime<Utc>,
}

/// Source of a disturbance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisturbanceKind {
    Movement,
    Noise,
    Light,
}

/// Disturbance verdict for one window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceReport {
    pub kinds: Vec<DisturbanceKind>,
}

impl DisturbanceReport {
    /// Number of disturbance sources that fired (0-3)
    pub fn count(&self) -> u8 {
        self.kinds.len() as u8
    }

    pub fn is_disturbed(&self) -> bool {
        !self.kinds.is_empty()
    }
}

/// Disturbance logged by the session aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisturbanceEvent {
    pub timestamp: DateTime<Utc>,
    pub kinds: Vec<DisturbanceKind>,
}

/// Full per-window output of the detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub state: SleepState,
    pub movement: MovementFeatures,
    pub audio: AudioFeatures,
    pub disturbance: DisturbanceReport,
    /// Average lux over the window, if any sample carried light data
    pub average_lux: Option<f64>,
    /// Whether this window flipped the asleep flag
    pub transitioned: bool,
}

/// Contiguous run of one stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSegment {
    pub stage: SleepStage,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: f64,
}

impl StageSegment {
    pub fn new(stage: SleepStage, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        let duration_minutes = (end_time - start_time).num_milliseconds().max(0) as f64 / 60_000.0;
        Self {
            stage,
            start_time,
            end_time,
            duration_minutes,
        }
    }
}

/// One tracked sleep attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    /// Start in the user's local offset
    pub start_at: DateTime<FixedOffset>,
    #[serde(default)]
    pub end_at: Option<DateTime<FixedOffset>>,
    #[serde(default)]
    pub duration_min: Option<u32>,
    /// Minutes from session start to first detected sleep
    #[serde(default)]
    pub sleep_latency_min: Option<u32>,
    #[serde(default)]
    pub awake_count: u32,
    #[serde(default)]
    pub stage_segments: Vec<StageSegment>,
    #[serde(default)]
    pub disturbances: Vec<DisturbanceEvent>,
}

impl Session {
    /// A new, open session
    pub fn begin(user_id: impl Into<String>, start_at: DateTime<FixedOffset>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            start_at,
            end_at: None,
            duration_min: None,
            sleep_latency_min: None,
            awake_count: 0,
            stage_segments: Vec::new(),
            disturbances: Vec::new(),
        }
    }

    /// Completed sessions with both end time and duration count towards baselines
    pub fn is_qualifying(&self) -> bool {
        self.end_at.is_some() && self.duration_min.is_some()
    }

    /// Total minutes spent in `stage` across all segments
    pub fn stage_minutes(&self, stage: SleepStage) -> f64 {
        self.stage_segments
            .iter()
            .filter(|s| s.stage == stage)
            .map(|s| s.duration_minutes)
            .sum()
    }

    /// Calendar date the night is attributed to (local wake date when known)
    pub fn night_date(&self) -> NaiveDate {
        self.end_at.unwrap_or(self.start_at).date_naive()
    }

    /// Apply a partial update, leaving absent fields untouched
    pub fn apply(&mut self, update: SessionUpdate) {
        if let Some(end_at) = update.end_at {
            self.end_at = Some(end_at);
        }
        if let Some(duration) = update.duration_min {
            self.duration_min = Some(duration);
        }
        if let Some(latency) = update.sleep_latency_min {
            self.sleep_latency_min = Some(latency);
        }
        if let Some(awake_count) = update.awake_count {
            self.awake_count = awake_count;
        }
        if let Some(segments) = update.stage_segments {
            self.stage_segments = segments;
        }
        if let Some(disturbances) = update.disturbances {
            self.disturbances = disturbances;
        }
    }
}

/// Partial session fields for `SessionStore::update_session`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub end_at: Option<DateTime<FixedOffset>>,
    pub duration_min: Option<u32>,
    pub sleep_latency_min: Option<u32>,
    pub awake_count: Option<u32>,
    pub stage_segments: Option<Vec<StageSegment>>,
    pub disturbances: Option<Vec<DisturbanceEvent>>,
}

impl SessionUpdate {
    /// Update carrying every completion field of a finished session
    pub fn completion_of(session: &Session) -> Self {
        Self {
            end_at: session.end_at,
            duration_min: session.duration_min,
            sleep_latency_min: session.sleep_latency_min,
            awake_count: Some(session.awake_count),
            stage_segments: Some(session.stage_segments.clone()),
            disturbances: Some(session.disturbances.clone()),
        }
    }
}

/// Batch of raw samples persisted for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorChunk {
    /// Idempotency key
    pub id: Uuid,
    pub session_id: String,
    pub samples: Vec<SensorSample>,
}

impl SensorChunk {
    pub fn new(session_id: impl Into<String>, samples: Vec<SensorSample>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            samples,
        }
    }
}

/// Personalized sensor thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorCalibration {
    /// Accelerometer magnitude
    pub movement_threshold: f64,
    /// Decibels
    pub sound_threshold: f64,
    /// Lux
    pub light_threshold: f64,
}

/// A user's normal sleep pattern derived from their first nights
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineMetrics {
    pub user_id: String,
    /// Local time of day, minute precision
    pub average_bedtime: NaiveTime,
    pub average_wake_time: NaiveTime,
    pub average_duration_hours: f64,
    /// `None` when no session reported a latency
    pub average_latency_minutes: Option<f64>,
    pub average_efficiency_percent: f64,
    /// Mean awakenings per night
    pub disturbance_frequency: f64,
    pub sensor_calibration: SensorCalibration,
    pub days_collected: u32,
    pub completed_at: DateTime<Utc>,
}

/// Score component a factor refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorCategory {
    Duration,
    Efficiency,
    Latency,
    Stages,
    Disturbances,
    Circadian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorImpact {
    Positive,
    Negative,
}

/// Named highlight attached to a score breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreFactor {
    pub category: FactorCategory,
    pub impact: FactorImpact,
    pub label: String,
}

/// Nightly sleep-quality score
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SleepScoreBreakdown {
    pub duration: u8,
    pub efficiency: u8,
    pub latency: u8,
    pub stages: u8,
    pub disturbances: u8,
    pub circadian: u8,
    pub total: u8,
    pub factors: Vec<ScoreFactor>,
}

/// Entry in the append-only score history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub session_id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub breakdown: SleepScoreBreakdown,
}
