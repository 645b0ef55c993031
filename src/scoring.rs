//! Nightly sleep scoring
//!
//! Six sub-scores (0-100) computed with step functions: small deviations from
//! target do not move a sub-score, larger ones drop it sharply. The total is
//! the weighted sum of the rounded sub-scores.
//!
//! | Component    | Weight | Input                                   |
//! |--------------|--------|-----------------------------------------|
//! | duration     | 0.25   | hours vs baseline average (default 8h)  |
//! | efficiency   | 0.25   | minutes lost to awakenings              |
//! | latency      | 0.15   | minutes to fall asleep                  |
//! | stages       | 0.15   | deep and REM share of the night         |
//! | disturbances | 0.10   | logged disturbances or awakenings       |
//! | circadian    | 0.10   | bed/wake time vs baseline               |

use crate::config::{FactorMarks, ScoringConfig};
use crate::error::SleepError;
use crate::types::{
    BaselineMetrics, FactorCategory, FactorImpact, ScoreFactor, Session, SleepScoreBreakdown,
    SleepStage,
};
use chrono::{NaiveTime, Timelike};
use tracing::debug;

/// Sleep assumed lost per recorded awakening (minutes)
pub const MINUTES_LOST_PER_AWAKENING: f64 = 5.0;

/// Score used when a component cannot be computed
pub const NEUTRAL_SCORE: f64 = 50.0;

const MINUTES_PER_DAY: f64 = 1440.0;

/// Duration deviation bands: (max deviation in hours, score)
const DURATION_BANDS: [(f64, f64); 4] = [(0.5, 100.0), (1.0, 90.0), (1.5, 75.0), (2.0, 60.0)];

/// Efficiency bands: (min efficiency %, score)
const EFFICIENCY_BANDS: [(f64, f64); 4] = [(90.0, 100.0), (85.0, 90.0), (80.0, 75.0), (75.0, 60.0)];

/// Latency bands: (exclusive max minutes, score)
const LATENCY_BANDS: [(f64, f64); 5] = [
    (15.0, 100.0),
    (20.0, 95.0),
    (30.0, 85.0),
    (45.0, 70.0),
    (60.0, 50.0),
];

/// Disturbance scores for 0..=4 events
const DISTURBANCE_SCORES: [f64; 5] = [100.0, 95.0, 85.0, 70.0, 55.0];

/// Stage share ranges: (ideal, acceptable) inclusive fractions of the night
const DEEP_RANGES: ((f64, f64), (f64, f64)) = ((0.15, 0.25), (0.10, 0.30));
const REM_RANGES: ((f64, f64), (f64, f64)) = ((0.20, 0.30), (0.15, 0.35));

/// Circadian bands: (max mean offset in minutes, score)
const CIRCADIAN_BANDS: [(f64, f64); 5] = [
    (15.0, 100.0),
    (30.0, 90.0),
    (60.0, 75.0),
    (90.0, 60.0),
    (120.0, 45.0),
];

/// Estimated sleep efficiency in percent, `None` for zero-length sessions
pub fn efficiency_percent(duration_min: u32, awake_count: u32) -> Option<f64> {
    if duration_min == 0 {
        return None;
    }
    let duration = duration_min as f64;
    let asleep = duration - awake_count as f64 * MINUTES_LOST_PER_AWAKENING;
    Some((asleep / duration * 100.0).clamp(0.0, 100.0))
}

/// Duration step function over the absolute deviation from target (hours)
pub fn duration_band_score(deviation_hours: f64) -> f64 {
    let deviation = deviation_hours.abs();
    DURATION_BANDS
        .iter()
        .find(|(max, _)| deviation <= *max)
        .map(|(_, score)| *score)
        .unwrap_or_else(|| (100.0 - 20.0 * deviation).max(0.0))
}

/// Align actual bed/wake times with the baseline's, in 0-100
pub fn circadian_alignment(
    bedtime: NaiveTime,
    wake_time: NaiveTime,
    baseline_bedtime: NaiveTime,
    baseline_wake_time: NaiveTime,
) -> f64 {
    let bed_offset = circular_distance(minutes_of(bedtime), minutes_of(baseline_bedtime));
    let wake_offset = circular_distance(minutes_of(wake_time), minutes_of(baseline_wake_time));
    let mean_offset = (bed_offset + wake_offset) / 2.0;

    CIRCADIAN_BANDS
        .iter()
        .find(|(max, _)| mean_offset <= *max)
        .map(|(_, score)| *score)
        .unwrap_or_else(|| (100.0 - mean_offset / 2.0).max(0.0))
}

fn minutes_of(time: NaiveTime) -> f64 {
    (time.hour() * 60 + time.minute()) as f64
}

/// Shortest distance between two times of day, across midnight
fn circular_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % MINUTES_PER_DAY;
    d.min(MINUTES_PER_DAY - d)
}

/// Computes score breakdowns for completed sessions
#[derive(Debug, Clone, Default)]
pub struct SleepScorer {
    config: ScoringConfig,
}

impl SleepScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Score a completed session against an optional baseline.
    ///
    /// Fails with `InvalidInput` when the session has no duration.
    pub fn score(
        &self,
        session: &Session,
        baseline: Option<&BaselineMetrics>,
    ) -> Result<SleepScoreBreakdown, SleepError> {
        let duration_min = session.duration_min.ok_or_else(|| {
            SleepError::InvalidInput(format!("session {} has no duration", session.id))
        })?;

        let duration = Some(self.duration_score(duration_min, baseline));
        let efficiency = Some(self.efficiency_score(duration_min, session.awake_count));
        let latency = self.latency_score(session.sleep_latency_min);
        let stages = self.stage_score(session, duration_min);
        let disturbances = Some(self.disturbance_score(session));
        let circadian = self.circadian_score(session, baseline);

        let components = [
            (FactorCategory::Duration, duration),
            (FactorCategory::Efficiency, efficiency),
            (FactorCategory::Latency, latency),
            (FactorCategory::Stages, stages),
            (FactorCategory::Disturbances, disturbances),
            (FactorCategory::Circadian, circadian),
        ];

        let rounded = |value: Option<f64>| round_score(value.unwrap_or(NEUTRAL_SCORE));

        let mut factors = Vec::new();
        for (category, value) in components {
            // fallback values carry no information worth highlighting
            if let Some(value) = value {
                if let Some(factor) = self.factor_for(category, round_score(value)) {
                    factors.push(factor);
                }
            }
        }

        let weights = &self.config.weights;
        let breakdown_parts = [
            rounded(duration),
            rounded(efficiency),
            rounded(latency),
            rounded(stages),
            rounded(disturbances),
            rounded(circadian),
        ];
        let total = weights.duration * breakdown_parts[0] as f64
            + weights.efficiency * breakdown_parts[1] as f64
            + weights.latency * breakdown_parts[2] as f64
            + weights.stages * breakdown_parts[3] as f64
            + weights.disturbances * breakdown_parts[4] as f64
            + weights.circadian * breakdown_parts[5] as f64;

        let breakdown = SleepScoreBreakdown {
            duration: breakdown_parts[0],
            efficiency: breakdown_parts[1],
            latency: breakdown_parts[2],
            stages: breakdown_parts[3],
            disturbances: breakdown_parts[4],
            circadian: breakdown_parts[5],
            total: round_score(total),
            factors,
        };

        debug!(
            session_id = %session.id,
            total = breakdown.total,
            has_baseline = baseline.is_some(),
            "session_scored"
        );

        Ok(breakdown)
    }

    /// Duration vs baseline average (or the default target)
    pub fn duration_score(&self, duration_min: u32, baseline: Option<&BaselineMetrics>) -> f64 {
        let target_hours = baseline
            .map(|b| b.average_duration_hours)
            .filter(|h| *h > 0.0)
            .unwrap_or(self.config.default_target_hours);
        let actual_hours = duration_min as f64 / 60.0;
        duration_band_score(actual_hours - target_hours)
    }

    pub fn efficiency_score(&self, duration_min: u32, awake_count: u32) -> f64 {
        let efficiency = efficiency_percent(duration_min, awake_count).unwrap_or(0.0);
        EFFICIENCY_BANDS
            .iter()
            .find(|(min, _)| efficiency >= *min)
            .map(|(_, score)| *score)
            .unwrap_or_else(|| (efficiency * 0.8).max(0.0))
    }

    /// `None` when the session did not record a latency
    pub fn latency_score(&self, latency_min: Option<u32>) -> Option<f64> {
        let latency = latency_min? as f64;
        let score = LATENCY_BANDS
            .iter()
            .find(|(max, _)| latency < *max)
            .map(|(_, score)| *score)
            .unwrap_or_else(|| (100.0 - 2.0 * latency).max(0.0));
        Some(score)
    }

    /// `None` when the session carries no stage data
    pub fn stage_score(&self, session: &Session, duration_min: u32) -> Option<f64> {
        if session.stage_segments.is_empty() || duration_min == 0 {
            return None;
        }

        let total = duration_min as f64;
        let deep_share = session.stage_minutes(SleepStage::Deep) / total;
        let rem_share = session.stage_minutes(SleepStage::Rem) / total;

        let score = NEUTRAL_SCORE + share_adjustment(deep_share, DEEP_RANGES)
            + share_adjustment(rem_share, REM_RANGES);
        Some(score.clamp(0.0, 100.0))
    }

    pub fn disturbance_score(&self, session: &Session) -> f64 {
        let count = if session.disturbances.is_empty() {
            session.awake_count as usize
        } else {
            session.disturbances.len()
        };

        DISTURBANCE_SCORES
            .get(count)
            .copied()
            .unwrap_or_else(|| (100.0 - 12.0 * count as f64).max(0.0))
    }

    /// `None` without a baseline or a session end time
    pub fn circadian_score(
        &self,
        session: &Session,
        baseline: Option<&BaselineMetrics>,
    ) -> Option<f64> {
        let baseline = baseline?;
        let end_at = session.end_at?;
        Some(circadian_alignment(
            session.start_at.time(),
            end_at.time(),
            baseline.average_bedtime,
            baseline.average_wake_time,
        ))
    }

    fn factor_for(&self, category: FactorCategory, score: u8) -> Option<ScoreFactor> {
        let marks = self.marks_for(category);
        let impact = if score >= marks.high {
            FactorImpact::Positive
        } else if score < marks.low {
            FactorImpact::Negative
        } else {
            return None;
        };

        Some(ScoreFactor {
            category,
            impact,
            label: factor_label(category, impact).to_string(),
        })
    }

    fn marks_for(&self, category: FactorCategory) -> FactorMarks {
        let factors = &self.config.factors;
        match category {
            FactorCategory::Duration => factors.duration,
            FactorCategory::Efficiency => factors.efficiency,
            FactorCategory::Latency => factors.latency,
            FactorCategory::Stages => factors.stages,
            FactorCategory::Disturbances => factors.disturbances,
            FactorCategory::Circadian => factors.circadian,
        }
    }
}

fn share_adjustment(share: f64, ranges: ((f64, f64), (f64, f64))) -> f64 {
    let ((ideal_lo, ideal_hi), (ok_lo, ok_hi)) = ranges;
    if (ideal_lo..=ideal_hi).contains(&share) {
        25.0
    } else if (ok_lo..=ok_hi).contains(&share) {
        15.0
    } else {
        -10.0
    }
}

fn round_score(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

fn factor_label(category: FactorCategory, impact: FactorImpact) -> &'static str {
    match (category, impact) {
        (FactorCategory::Duration, FactorImpact::Positive) => "Slept close to your target duration",
        (FactorCategory::Duration, FactorImpact::Negative) => "Sleep duration far from your target",
        (FactorCategory::Efficiency, FactorImpact::Positive) => "Very little time awake in bed",
        (FactorCategory::Efficiency, FactorImpact::Negative) => "Awakenings cut into your sleep",
        (FactorCategory::Latency, FactorImpact::Positive) => "Fell asleep quickly",
        (FactorCategory::Latency, FactorImpact::Negative) => "Took a long time to fall asleep",
        (FactorCategory::Stages, FactorImpact::Positive) => "Healthy share of deep and REM sleep",
        (FactorCategory::Stages, FactorImpact::Negative) => "Deep or REM sleep outside the usual range",
        (FactorCategory::Disturbances, FactorImpact::Positive) => "Undisturbed night",
        (FactorCategory::Disturbances, FactorImpact::Negative) => "Many disturbances during the night",
        (FactorCategory::Circadian, FactorImpact::Positive) => "Kept to your usual schedule",
        (FactorCategory::Circadian, FactorImpact::Negative) => "Bedtime or wake time off your usual schedule",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DisturbanceEvent, DisturbanceKind, SensorCalibration, StageSegment};
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn at(day: u32, h: u32, m: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, day, h, m, 0)
            .unwrap()
    }

    fn session(duration_min: u32, awake_count: u32, latency: Option<u32>) -> Session {
        let start = at(15, 23, 0);
        let mut session = Session::begin("user-1", start);
        session.end_at = Some(start + Duration::minutes(duration_min as i64));
        session.duration_min = Some(duration_min);
        session.awake_count = awake_count;
        session.sleep_latency_min = latency;
        session
    }

    fn baseline(hours: f64, bed: (u32, u32), wake: (u32, u32)) -> BaselineMetrics {
        BaselineMetrics {
            user_id: "user-1".to_string(),
            average_bedtime: NaiveTime::from_hms_opt(bed.0, bed.1, 0).unwrap(),
            average_wake_time: NaiveTime::from_hms_opt(wake.0, wake.1, 0).unwrap(),
            average_duration_hours: hours,
            average_latency_minutes: Some(12.0),
            average_efficiency_percent: 97.0,
            disturbance_frequency: 1.0,
            sensor_calibration: SensorCalibration {
                movement_threshold: 0.8,
                sound_threshold: 50.0,
                light_threshold: 10.0,
            },
            days_collected: 14,
            completed_at: Utc::now(),
        }
    }

    fn add_stages(session: &mut Session, deep: i64, rem: i64) {
        let start = session.start_at.with_timezone(&Utc);
        let light = session.duration_min.unwrap() as i64 - deep - rem;
        let mut cursor = start;
        for (stage, minutes) in [
            (SleepStage::Light, light),
            (SleepStage::Deep, deep),
            (SleepStage::Rem, rem),
        ] {
            let end = cursor + Duration::minutes(minutes);
            session
                .stage_segments
                .push(StageSegment::new(stage, cursor, end));
            cursor = end;
        }
    }

    #[test]
    fn test_duration_step_boundaries() {
        assert_eq!(duration_band_score(0.5), 100.0);
        assert_eq!(duration_band_score(0.51), 90.0);
        assert_eq!(duration_band_score(-1.0), 90.0);
        assert_eq!(duration_band_score(1.5), 75.0);
        assert_eq!(duration_band_score(2.0), 60.0);
        assert!((duration_band_score(3.0) - 40.0).abs() < 1e-9);
        assert_eq!(duration_band_score(6.0), 0.0);
    }

    #[test]
    fn test_duration_score_is_pure() {
        let scorer = SleepScorer::default();
        let b = baseline(7.5, (23, 0), (6, 30));
        let first = scorer.duration_score(400, Some(&b));
        let second = scorer.duration_score(400, Some(&b));
        assert_eq!(first, second);
    }

    #[test]
    fn test_duration_uses_default_target_without_baseline() {
        let scorer = SleepScorer::default();
        assert_eq!(scorer.duration_score(450, None), 100.0);
        assert_eq!(scorer.duration_score(420, None), 90.0);
        // 7h is on target for a 7h baseline
        let b = baseline(7.0, (23, 0), (6, 0));
        assert_eq!(scorer.duration_score(420, Some(&b)), 100.0);
    }

    #[test]
    fn test_efficiency_bands() {
        let scorer = SleepScorer::default();
        assert_eq!(scorer.efficiency_score(420, 1), 100.0);
        // 400 - 25 = 375 / 400 = 93.75
        assert_eq!(scorer.efficiency_score(400, 5), 100.0);
        // 100 - 15 = 85%
        assert_eq!(scorer.efficiency_score(100, 3), 90.0);
        // 100 - 20 = 80%
        assert_eq!(scorer.efficiency_score(100, 4), 75.0);
        // 100 - 40 = 60% -> 48
        assert!((scorer.efficiency_score(100, 8) - 48.0).abs() < 1e-9);
        assert_eq!(scorer.efficiency_score(10, 10), 0.0);
    }

    #[test]
    fn test_latency_bands() {
        let scorer = SleepScorer::default();
        assert_eq!(scorer.latency_score(Some(14)), Some(100.0));
        assert_eq!(scorer.latency_score(Some(15)), Some(95.0));
        assert_eq!(scorer.latency_score(Some(25)), Some(85.0));
        assert_eq!(scorer.latency_score(Some(44)), Some(70.0));
        assert_eq!(scorer.latency_score(Some(59)), Some(50.0));
        assert_eq!(scorer.latency_score(Some(60)), Some(0.0));
        assert_eq!(scorer.latency_score(Some(40)), Some(70.0));
        assert_eq!(scorer.latency_score(None), None);
    }

    #[test]
    fn test_stage_score() {
        let scorer = SleepScorer::default();

        let mut ideal = session(400, 0, Some(10));
        add_stages(&mut ideal, 80, 100); // 20% deep, 25% rem
        assert_eq!(scorer.stage_score(&ideal, 400), Some(100.0));

        let mut acceptable = session(400, 0, Some(10));
        add_stages(&mut acceptable, 48, 64); // 12% deep, 16% rem
        assert_eq!(scorer.stage_score(&acceptable, 400), Some(80.0));

        let mut poor = session(400, 0, Some(10));
        add_stages(&mut poor, 20, 20); // 5% deep, 5% rem
        assert_eq!(scorer.stage_score(&poor, 400), Some(30.0));

        assert_eq!(scorer.stage_score(&session(400, 0, None), 400), None);
    }

    #[test]
    fn test_disturbance_score_prefers_logged_events() {
        let scorer = SleepScorer::default();
        let mut s = session(420, 2, Some(10));
        assert_eq!(scorer.disturbance_score(&s), 85.0);

        s.disturbances = (0..4)
            .map(|i| DisturbanceEvent {
                timestamp: Utc::now() + Duration::minutes(i),
                kinds: vec![DisturbanceKind::Noise],
            })
            .collect();
        assert_eq!(scorer.disturbance_score(&s), 55.0);

        s.disturbances.truncate(0);
        s.awake_count = 6;
        assert!((scorer.disturbance_score(&s) - 28.0).abs() < 1e-9);
        s.awake_count = 10;
        assert_eq!(scorer.disturbance_score(&s), 0.0);
    }

    #[test]
    fn test_circadian_alignment() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(circadian_alignment(t(23, 0), t(7, 0), t(23, 10), t(7, 5)), 100.0);
        // crosses midnight: 23:50 vs 00:20 is 30 minutes
        assert_eq!(circadian_alignment(t(0, 20), t(7, 0), t(23, 50), t(7, 0)), 100.0);
        assert_eq!(circadian_alignment(t(1, 0), t(9, 0), t(23, 0), t(7, 0)), 45.0);
        assert_eq!(circadian_alignment(t(5, 0), t(13, 0), t(23, 0), t(7, 0)), 0.0);
    }

    #[test]
    fn test_circadian_needs_baseline_and_end() {
        let scorer = SleepScorer::default();
        let mut s = session(420, 0, Some(10));
        assert_eq!(scorer.circadian_score(&s, None), None);

        let b = baseline(8.0, (23, 0), (6, 0));
        assert_eq!(scorer.circadian_score(&s, Some(&b)), Some(100.0));

        s.end_at = None;
        assert_eq!(scorer.circadian_score(&s, Some(&b)), None);
    }

    #[test]
    fn test_end_to_end_breakdown() {
        let scorer = SleepScorer::default();
        let mut s = session(420, 1, Some(25));
        s.end_at = None;
        let b = baseline(8.0, (23, 0), (7, 0));

        let breakdown = scorer.score(&s, Some(&b)).unwrap();
        assert_eq!(breakdown.duration, 90);
        assert_eq!(breakdown.efficiency, 100);
        assert_eq!(breakdown.latency, 85);
        assert_eq!(breakdown.stages, 50);
        assert_eq!(breakdown.disturbances, 95);
        assert_eq!(breakdown.circadian, 50);
        // 22.5 + 25 + 12.75 + 7.5 + 9.5 + 5 = 82.25
        assert_eq!(breakdown.total, 82);
    }

    #[test]
    fn test_factors_one_per_category() {
        let scorer = SleepScorer::default();
        let mut s = session(300, 8, Some(70));
        add_stages(&mut s, 75, 75); // 25% deep, 25% rem
        let b = baseline(8.0, (23, 0), (4, 0));

        let breakdown = scorer.score(&s, Some(&b)).unwrap();
        let categories: Vec<FactorCategory> =
            breakdown.factors.iter().map(|f| f.category).collect();

        assert_eq!(
            categories,
            vec![
                FactorCategory::Duration,
                FactorCategory::Efficiency,
                FactorCategory::Latency,
                FactorCategory::Stages,
                FactorCategory::Disturbances,
                FactorCategory::Circadian,
            ]
        );
        let impact = |c: FactorCategory| {
            breakdown
                .factors
                .iter()
                .find(|f| f.category == c)
                .map(|f| f.impact)
        };
        assert_eq!(impact(FactorCategory::Duration), Some(FactorImpact::Negative));
        assert_eq!(impact(FactorCategory::Stages), Some(FactorImpact::Positive));
        assert_eq!(impact(FactorCategory::Circadian), Some(FactorImpact::Positive));
    }

    #[test]
    fn test_fallback_components_have_no_factor() {
        let scorer = SleepScorer::default();
        let breakdown = scorer.score(&session(480, 0, None), None).unwrap();
        assert!(breakdown
            .factors
            .iter()
            .all(|f| !matches!(
                f.category,
                FactorCategory::Latency | FactorCategory::Stages | FactorCategory::Circadian
            )));
        assert_eq!(breakdown.latency, 50);
    }

    #[test]
    fn test_missing_duration_is_invalid_input() {
        let scorer = SleepScorer::default();
        let mut s = session(420, 0, Some(10));
        s.duration_min = None;
        assert!(matches!(
            scorer.score(&s, None),
            Err(SleepError::InvalidInput(_))
        ));
    }
}
