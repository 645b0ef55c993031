//! Baseline calibration
//!
//! Once a user has enough completed nights, their average schedule and
//! percentile-based sensor thresholds become the baseline that personalizes
//! detection and scoring.

use crate::config::CalibrationConfig;
use crate::error::SleepError;
use crate::scoring::efficiency_percent;
use crate::storage::{BaselineStore, SensorChunkStore, SessionStore};
use crate::types::{BaselineMetrics, SensorCalibration, SensorSample, Session};
use chrono::{DateTime, NaiveTime, Timelike, Utc};
use tracing::{info, warn};

/// Default baseline window in nights
pub const DEFAULT_BASELINE_WINDOW: usize = 14;

const MINUTES_PER_DAY: i64 = 1440;

/// Value at `floor(p·n)` of the ascending-sorted values, clamped to the last
/// element. Fails with `InsufficientData` when `values` is empty.
pub fn percentile(values: &[f64], p: f64) -> Result<f64, SleepError> {
    if values.is_empty() {
        return Err(SleepError::InsufficientData(
            "percentile of an empty collection".into(),
        ));
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let index = ((p * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    Ok(sorted[index])
}

/// Arithmetic mean of times of day.
///
/// Times are not averaged on the circle, so bedtimes either side of midnight
/// pull the mean towards midday.
pub fn mean_time_of_day(times: &[NaiveTime]) -> Option<NaiveTime> {
    let minutes: Vec<f64> = times
        .iter()
        .map(|t| (t.hour() * 60 + t.minute()) as f64 + t.second() as f64 / 60.0)
        .collect();
    let mean = mean(&minutes)?;
    let rounded = (mean.round() as i64).rem_euclid(MINUTES_PER_DAY) as u32;
    NaiveTime::from_hms_opt(rounded / 60, rounded % 60, 0)
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Derives `BaselineMetrics` from completed sessions and their samples
#[derive(Debug, Clone, Default)]
pub struct BaselineCalibrator {
    config: CalibrationConfig,
}

impl BaselineCalibrator {
    pub fn new(config: CalibrationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    /// Compute a baseline from `sessions` and their raw `samples`.
    ///
    /// Non-qualifying sessions (no end time or duration) are ignored. Fails
    /// with `InvalidState` when no sessions are given and `InvalidInput` when
    /// fewer than the required number qualify.
    pub fn calibrate(
        &self,
        user_id: &str,
        sessions: &[Session],
        samples: &[SensorSample],
        completed_at: DateTime<Utc>,
    ) -> Result<BaselineMetrics, SleepError> {
        if sessions.is_empty() {
            return Err(SleepError::InvalidState(format!(
                "no sessions to calibrate for user {user_id}"
            )));
        }

        let qualifying: Vec<&Session> = sessions.iter().filter(|s| s.is_qualifying()).collect();
        if qualifying.len() < self.config.required_sessions {
            return Err(SleepError::InvalidInput(format!(
                "{} qualifying sessions, {} required",
                qualifying.len(),
                self.config.required_sessions
            )));
        }

        let bedtimes: Vec<NaiveTime> = qualifying.iter().map(|s| s.start_at.time()).collect();
        let wake_times: Vec<NaiveTime> = qualifying
            .iter()
            .filter_map(|s| s.end_at.map(|end| end.time()))
            .collect();

        let durations: Vec<u32> = qualifying.iter().filter_map(|s| s.duration_min).collect();
        let duration_hours: Vec<f64> = durations.iter().map(|d| *d as f64 / 60.0).collect();

        let latencies: Vec<f64> = qualifying
            .iter()
            .filter_map(|s| s.sleep_latency_min)
            .map(|l| l as f64)
            .collect();

        let efficiencies: Vec<f64> = qualifying
            .iter()
            .filter_map(|s| efficiency_percent(s.duration_min?, s.awake_count))
            .collect();

        let awakenings: Vec<f64> = qualifying.iter().map(|s| s.awake_count as f64).collect();

        let average_bedtime = mean_time_of_day(&bedtimes)
            .ok_or_else(|| SleepError::InvalidInput("no bedtimes to average".into()))?;
        let average_wake_time = mean_time_of_day(&wake_times)
            .ok_or_else(|| SleepError::InvalidInput("no wake times to average".into()))?;

        let baseline = BaselineMetrics {
            user_id: user_id.to_string(),
            average_bedtime,
            average_wake_time,
            average_duration_hours: mean(&duration_hours).unwrap_or(0.0),
            average_latency_minutes: mean(&latencies),
            average_efficiency_percent: mean(&efficiencies).unwrap_or(0.0),
            disturbance_frequency: mean(&awakenings).unwrap_or(0.0),
            sensor_calibration: self.sensor_calibration(samples),
            days_collected: qualifying.len() as u32,
            completed_at,
        };

        info!(
            user_id,
            days = baseline.days_collected,
            bedtime = %baseline.average_bedtime,
            wake_time = %baseline.average_wake_time,
            "baseline_calibrated"
        );

        Ok(baseline)
    }

    /// Percentile thresholds over every sample carrying each sensor
    pub fn sensor_calibration(&self, samples: &[SensorSample]) -> SensorCalibration {
        let valid: Vec<&SensorSample> = samples.iter().filter(|s| s.validate().is_ok()).collect();
        if valid.len() < samples.len() {
            warn!(skipped = samples.len() - valid.len(), "calibration_samples_skipped");
        }

        let magnitudes: Vec<f64> = valid.iter().filter_map(|s| s.movement_magnitude()).collect();
        let decibels: Vec<f64> = valid
            .iter()
            .filter_map(|s| s.audio.map(|a| a.decibels))
            .collect();
        let lux: Vec<f64> = valid.iter().filter_map(|s| s.light.map(|l| l.lux)).collect();

        let config = &self.config;
        SensorCalibration {
            movement_threshold: threshold_or_default(
                "movement",
                &magnitudes,
                config.movement_percentile,
                config.default_movement_threshold,
            ),
            sound_threshold: threshold_or_default(
                "sound",
                &decibels,
                config.sound_percentile,
                config.default_sound_threshold,
            ),
            light_threshold: threshold_or_default(
                "light",
                &lux,
                config.light_percentile,
                config.default_light_threshold,
            ),
        }
    }

    /// Recompute and persist the user's baseline from stored history.
    ///
    /// Uses the newest qualifying sessions within the lookback window. Returns
    /// `Ok(None)` while the user has too few of them.
    pub fn recalibrate(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        sessions: &dyn SessionStore,
        chunks: &dyn SensorChunkStore,
        baselines: &dyn BaselineStore,
    ) -> Result<Option<BaselineMetrics>, SleepError> {
        let qualifying: Vec<Session> = sessions
            .recent_sessions(user_id, self.config.lookback_days, now)?
            .into_iter()
            .filter(Session::is_qualifying)
            .take(self.config.required_sessions)
            .collect();

        if qualifying.len() < self.config.required_sessions {
            return Ok(None);
        }

        let mut samples = Vec::new();
        for session in &qualifying {
            samples.extend(chunks.chunks_for_session(&session.id)?);
        }

        let baseline = self.calibrate(user_id, &qualifying, &samples, now)?;
        baselines.save_baseline(&baseline)?;
        Ok(Some(baseline))
    }
}

fn threshold_or_default(sensor: &str, values: &[f64], p: f64, default: f64) -> f64 {
    match percentile(values, p) {
        Ok(value) => value,
        Err(e) => {
            warn!(sensor, error = %e, default, "calibration_threshold_defaulted");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::SensorChunk;
    use chrono::{Duration, FixedOffset, TimeZone};
    use pretty_assertions::assert_eq;

    fn night(day: u32, bed: (u32, u32), duration_min: u32) -> Session {
        let start = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 1, day, bed.0, bed.1, 0)
            .unwrap();
        let mut session = Session::begin("user-1", start);
        session.end_at = Some(start + Duration::minutes(duration_min as i64));
        session.duration_min = Some(duration_min);
        session.sleep_latency_min = Some(10);
        session
    }

    fn fortnight() -> Vec<Session> {
        (1..=14).map(|day| night(day, (23, 0), 480)).collect()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 20, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_percentile_index() {
        let values: Vec<f64> = (1..=10).map(|i| i as f64 / 10.0).collect();
        assert_eq!(percentile(&values, 0.95).unwrap(), 1.0);
        assert_eq!(percentile(&values, 0.90).unwrap(), 1.0);
        assert_eq!(percentile(&values, 0.5).unwrap(), 0.6);
        assert_eq!(percentile(&values, 0.0).unwrap(), 0.1);
    }

    #[test]
    fn test_percentile_sorts_input() {
        assert_eq!(percentile(&[5.0, 1.0, 3.0, 2.0], 0.5).unwrap(), 3.0);
    }

    #[test]
    fn test_percentile_empty() {
        assert!(matches!(
            percentile(&[], 0.9),
            Err(SleepError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_fourteen_regular_nights() {
        let calibrator = BaselineCalibrator::default();
        let baseline = calibrator
            .calibrate("user-1", &fortnight(), &[], now())
            .unwrap();

        assert_eq!(baseline.average_duration_hours, 8.0);
        assert_eq!(baseline.average_efficiency_percent, 100.0);
        assert_eq!(baseline.average_latency_minutes, Some(10.0));
        assert_eq!(baseline.disturbance_frequency, 0.0);
        assert_eq!(baseline.days_collected, 14);
        assert_eq!(
            baseline.average_bedtime,
            NaiveTime::from_hms_opt(23, 0, 0).unwrap()
        );
        assert_eq!(
            baseline.average_wake_time,
            NaiveTime::from_hms_opt(7, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_defaults_without_sensor_data() {
        let calibrator = BaselineCalibrator::default();
        let calibration = calibrator.sensor_calibration(&[]);
        assert_eq!(
            calibration,
            SensorCalibration {
                movement_threshold: 0.8,
                sound_threshold: 50.0,
                light_threshold: 10.0,
            }
        );
    }

    #[test]
    fn test_percentile_thresholds_from_samples() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let samples: Vec<SensorSample> = (1..=10)
            .map(|i| {
                SensorSample::at(t0 + Duration::seconds(i))
                    .with_accelerometer(i as f64 / 10.0, 0.0, 0.0)
                    .with_audio(30.0 + i as f64, false)
            })
            .collect();

        let calibration = BaselineCalibrator::default().sensor_calibration(&samples);
        assert!((calibration.movement_threshold - 1.0).abs() < 1e-9);
        assert_eq!(calibration.sound_threshold, 40.0);
        assert_eq!(calibration.light_threshold, 10.0);
    }

    #[test]
    fn test_invalid_samples_do_not_set_thresholds() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap();
        let mut samples: Vec<SensorSample> = (1..=10)
            .map(|i| {
                SensorSample::at(t0 + Duration::seconds(i))
                    .with_accelerometer(i as f64 / 10.0, 0.0, 0.0)
                    .with_light(i as f64 * 2.0)
            })
            .collect();
        let t1 = t0 + Duration::seconds(11);
        samples.push(SensorSample::at(t1).with_accelerometer(5.0, 0.0, 0.0).with_light(-50.0));
        samples.push(SensorSample::at(t1).with_accelerometer(f64::INFINITY, 0.0, 0.0));
        samples.push(SensorSample::at(t1).with_audio(f64::NAN, false));

        let calibration = BaselineCalibrator::default().sensor_calibration(&samples);
        assert!((calibration.movement_threshold - 1.0).abs() < 1e-9);
        assert_eq!(calibration.light_threshold, 20.0);
        assert_eq!(calibration.sound_threshold, 50.0);
    }

    #[test]
    fn test_latency_averages_only_reporting_sessions() {
        let mut sessions = fortnight();
        for session in sessions.iter_mut().take(7) {
            session.sleep_latency_min = None;
        }
        sessions[13].sleep_latency_min = Some(24);

        let baseline = BaselineCalibrator::default()
            .calibrate("user-1", &sessions, &[], now())
            .unwrap();
        // six nights at 10 and one at 24
        assert_eq!(baseline.average_latency_minutes, Some(12.0));
    }

    #[test]
    fn test_bedtime_mean_is_arithmetic() {
        let t = |h, m| NaiveTime::from_hms_opt(h, m, 0).unwrap();
        assert_eq!(mean_time_of_day(&[t(23, 50), t(0, 10)]), Some(t(12, 0)));
        assert_eq!(mean_time_of_day(&[t(22, 0), t(23, 0)]), Some(t(22, 30)));
        assert_eq!(mean_time_of_day(&[]), None);
    }

    #[test]
    fn test_no_sessions_is_invalid_state() {
        let result = BaselineCalibrator::default().calibrate("user-1", &[], &[], now());
        assert!(matches!(result, Err(SleepError::InvalidState(_))));
    }

    #[test]
    fn test_too_few_qualifying_sessions() {
        let mut sessions = fortnight();
        sessions[0].end_at = None;
        let result = BaselineCalibrator::default().calibrate("user-1", &sessions, &[], now());
        assert!(matches!(result, Err(SleepError::InvalidInput(_))));
    }

    #[test]
    fn test_recalibrate_overwrites_stored_baseline() {
        let store = MemoryStore::new();
        let calibrator = BaselineCalibrator::default();

        let sessions = fortnight();
        for session in &sessions[..13] {
            store.create_session(session).unwrap();
        }
        assert_eq!(
            calibrator
                .recalibrate("user-1", now(), &store, &store, &store)
                .unwrap(),
            None
        );

        store.create_session(&sessions[13]).unwrap();
        let first_start = sessions[0].start_at.with_timezone(&Utc);
        store
            .save_chunks(&[SensorChunk::new(
                sessions[0].id.clone(),
                vec![SensorSample::at(first_start).with_light(4.0)],
            )])
            .unwrap();

        let baseline = calibrator
            .recalibrate("user-1", now(), &store, &store, &store)
            .unwrap()
            .unwrap();
        assert_eq!(baseline.sensor_calibration.light_threshold, 4.0);
        assert_eq!(store.get_baseline("user-1").unwrap(), Some(baseline));

        let later = now() + Duration::days(1);
        let recalibrated = calibrator
            .recalibrate("user-1", later, &store, &store, &store)
            .unwrap()
            .unwrap();
        assert_eq!(
            store.get_baseline("user-1").unwrap().map(|b| b.completed_at),
            Some(recalibrated.completed_at)
        );
    }
}
