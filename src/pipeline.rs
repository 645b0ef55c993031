//! Pipeline orchestration
//!
//! `SleepEngine` wires the session tracker, scorer, calibrator, stores and
//! sync targets together. The free functions below are stateless one-shot
//! entry points over JSON used by the FFI and the CLI.

use crate::baseline::BaselineCalibrator;
use crate::config::{ScoringConfig, SleepSenseConfig};
use crate::error::SleepError;
use crate::scoring::SleepScorer;
use crate::session::SessionTracker;
use crate::storage::Stores;
use crate::sync::{HealthSyncTarget, SyncTargetRegistry};
use crate::types::{
    BaselineMetrics, ScoreRecord, SensorSample, Session, SessionUpdate, SleepScoreBreakdown,
    SleepState, WindowOutcome,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Score a completed session given as JSON.
///
/// # Arguments
/// * `session_json` - A serialized `Session` with `duration_min` set
/// * `baseline_json` - Optional serialized `BaselineMetrics`
///
/// # Returns
/// The serialized `SleepScoreBreakdown`
pub fn score_session_json(
    session_json: &str,
    baseline_json: Option<&str>,
) -> Result<String, SleepError> {
    let session: Session = serde_json::from_str(session_json)?;
    let baseline: Option<BaselineMetrics> = baseline_json
        .map(serde_json::from_str::<BaselineMetrics>)
        .transpose()?;

    let breakdown = SleepScorer::new(ScoringConfig::default()).score(&session, baseline.as_ref())?;
    Ok(serde_json::to_string(&breakdown)?)
}

/// Compute a baseline from JSON arrays of sessions and samples.
///
/// # Returns
/// The serialized `BaselineMetrics`, stamped with the current time
pub fn calibrate_json(
    user_id: &str,
    sessions_json: &str,
    samples_json: &str,
) -> Result<String, SleepError> {
    let sessions: Vec<Session> = serde_json::from_str(sessions_json)?;
    let samples: Vec<SensorSample> = serde_json::from_str(samples_json)?;

    let baseline = BaselineCalibrator::default().calibrate(user_id, &sessions, &samples, Utc::now())?;
    Ok(serde_json::to_string(&baseline)?)
}

/// Everything produced when a session is finished
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedSession {
    pub session: Session,
    /// Absent when the session has no duration
    pub score: Option<SleepScoreBreakdown>,
    /// Set when finishing this session produced a new baseline
    pub recalibrated: Option<BaselineMetrics>,
}

/// Stateful engine for one device: at most one active session at a time.
pub struct SleepEngine {
    config: SleepSenseConfig,
    tracker: SessionTracker,
    scorer: SleepScorer,
    calibrator: BaselineCalibrator,
    stores: Stores,
    sync: SyncTargetRegistry,
}

impl SleepEngine {
    /// Create an engine over in-memory stores
    pub fn new(config: SleepSenseConfig) -> Result<Self, SleepError> {
        Self::with_stores(config, Stores::in_memory())
    }

    /// Create an engine over the given stores
    pub fn with_stores(config: SleepSenseConfig, stores: Stores) -> Result<Self, SleepError> {
        config.validate()?;
        Ok(Self {
            tracker: SessionTracker::new(config.session.clone()),
            scorer: SleepScorer::new(config.scoring.clone()),
            calibrator: BaselineCalibrator::new(config.calibration.clone()),
            config,
            stores,
            sync: SyncTargetRegistry::new(),
        })
    }

    pub fn config(&self) -> &SleepSenseConfig {
        &self.config
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    pub fn register_sync_target(&mut self, target: Box<dyn HealthSyncTarget>) {
        self.sync.register(target);
    }

    /// Start recording a night.
    ///
    /// The detector is personalized with the user's baseline calibration when
    /// one exists.
    pub fn start_session(
        &mut self,
        user_id: &str,
        start_at: DateTime<FixedOffset>,
    ) -> Result<Session, SleepError> {
        let baseline = self.stores.baselines.get_baseline(user_id)?;
        let detector = match &baseline {
            Some(b) => self.config.detector.calibrated(&b.sensor_calibration),
            None => self.config.detector.clone(),
        };

        let session = self.tracker.start(user_id, start_at, detector)?;
        if let Err(e) = self.stores.sessions.create_session(&session) {
            self.tracker.abort(self.stores.chunks.as_ref())?;
            return Err(e);
        }

        debug!(
            session_id = %session.id,
            calibrated = baseline.is_some(),
            "detector_configured"
        );
        Ok(session)
    }

    /// Feed a batch of samples to the active session
    pub fn ingest(&mut self, batch: &[SensorSample]) -> Result<Option<WindowOutcome>, SleepError> {
        self.tracker.ingest(batch, self.stores.chunks.as_ref())
    }

    pub fn current_state(&self) -> Option<&SleepState> {
        self.tracker.current_state()
    }

    pub fn active_session(&self) -> Option<&Session> {
        self.tracker.session()
    }

    /// See [`SessionTracker::is_wake_confirmed`]
    pub fn is_wake_confirmed(&self, first: &SleepState, second: &SleepState) -> bool {
        self.tracker.is_wake_confirmed(first, second)
    }

    /// Discard the active session after flushing its pending samples
    pub fn abort_session(&mut self) -> Result<String, SleepError> {
        self.tracker.abort(self.stores.chunks.as_ref())
    }

    /// Complete the active session: persist it, score it, recalibrate the
    /// user's baseline when enough nights exist and hand the result to the
    /// enabled sync targets.
    ///
    /// The session stays active until the completed record is persisted, so a
    /// storage failure up to that point can be retried. Failures after it
    /// leave the completed session readable through the session store.
    pub fn finish_session(
        &mut self,
        end_at: DateTime<FixedOffset>,
    ) -> Result<CompletedSession, SleepError> {
        let chunks = self.stores.chunks.as_ref();
        let session = self.tracker.completed(end_at, chunks)?;
        self.stores
            .sessions
            .update_session(&session.id, SessionUpdate::completion_of(&session))?;
        let session = self.tracker.finish(end_at, chunks)?;

        // scored against the baseline in effect for this night
        let baseline = self.stores.baselines.get_baseline(&session.user_id)?;
        let score = match session.duration_min {
            Some(_) => {
                let breakdown = self.scorer.score(&session, baseline.as_ref())?;
                self.stores.scores.save_score(&ScoreRecord {
                    session_id: session.id.clone(),
                    user_id: session.user_id.clone(),
                    date: session.night_date(),
                    breakdown: breakdown.clone(),
                })?;
                Some(breakdown)
            }
            None => None,
        };

        let recalibrated = self.recalibrate(&session.user_id, end_at.with_timezone(&Utc))?;

        let delivered = self
            .sync
            .deliver(&self.config.sync.platforms, &session, score.as_ref());

        info!(
            session_id = %session.id,
            total = score.as_ref().map(|s| s.total),
            recalibrated = recalibrated.is_some(),
            delivered,
            "session_completed"
        );

        Ok(CompletedSession {
            session,
            score,
            recalibrated,
        })
    }

    /// Recompute the user's baseline from stored history
    pub fn recalibrate(
        &mut self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<BaselineMetrics>, SleepError> {
        self.calibrator.recalibrate(
            user_id,
            now,
            self.stores.sessions.as_ref(),
            self.stores.chunks.as_ref(),
            self.stores.baselines.as_ref(),
        )
    }

    pub fn baseline(&self, user_id: &str) -> Result<Option<BaselineMetrics>, SleepError> {
        self.stores.baselines.get_baseline(user_id)
    }

    pub fn score_history(&self, user_id: &str) -> Result<Vec<ScoreRecord>, SleepError> {
        self.stores.scores.scores_for_user(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, SessionStore};
    use chrono::{Duration, TimeZone};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    /// Session store that rejects the next `fail_updates` updates
    struct FlakySessions {
        inner: Arc<MemoryStore>,
        fail_updates: Mutex<u32>,
    }

    impl SessionStore for FlakySessions {
        fn create_session(&self, session: &Session) -> Result<(), SleepError> {
            self.inner.create_session(session)
        }

        fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session, SleepError> {
            let mut fail_updates = self.fail_updates.lock();
            if *fail_updates > 0 {
                *fail_updates -= 1;
                return Err(SleepError::Storage("database is locked".into()));
            }
            self.inner.update_session(id, update)
        }

        fn get_session(&self, id: &str) -> Result<Option<Session>, SleepError> {
            self.inner.get_session(id)
        }

        fn recent_sessions(
            &self,
            user_id: &str,
            days: u32,
            now: DateTime<Utc>,
        ) -> Result<Vec<Session>, SleepError> {
            self.inner.recent_sessions(user_id, days, now)
        }
    }

    fn start_at() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(-5 * 3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 23, 0, 0)
            .unwrap()
    }

    fn completed_session(duration_min: u32, awake_count: u32, latency: u32) -> Session {
        let mut session = Session::begin("user-1", start_at());
        session.end_at = Some(start_at() + Duration::minutes(duration_min as i64));
        session.duration_min = Some(duration_min);
        session.awake_count = awake_count;
        session.sleep_latency_min = Some(latency);
        session
    }

    #[test]
    fn test_score_session_json() {
        let session = serde_json::to_string(&completed_session(420, 1, 25)).unwrap();
        let json = score_session_json(&session, None).unwrap();
        let breakdown: SleepScoreBreakdown = serde_json::from_str(&json).unwrap();

        assert_eq!(breakdown.duration, 90);
        assert_eq!(breakdown.efficiency, 100);
        assert_eq!(breakdown.latency, 85);
        assert_eq!(breakdown.circadian, 50);
    }

    #[test]
    fn test_score_session_json_without_duration() {
        let session = serde_json::to_string(&Session::begin("user-1", start_at())).unwrap();
        assert!(matches!(
            score_session_json(&session, None),
            Err(SleepError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            score_session_json("not valid json", None),
            Err(SleepError::JsonError(_))
        ));
    }

    #[test]
    fn test_calibrate_json() {
        let sessions: Vec<Session> = (0..14).map(|_| completed_session(480, 0, 10)).collect();
        let sessions_json = serde_json::to_string(&sessions).unwrap();

        let json = calibrate_json("user-1", &sessions_json, "[]").unwrap();
        let baseline: BaselineMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(baseline.average_duration_hours, 8.0);
        assert_eq!(baseline.days_collected, 14);

        assert!(matches!(
            calibrate_json("user-1", "[]", "[]"),
            Err(SleepError::InvalidState(_))
        ));
    }

    #[test]
    fn test_engine_rejects_invalid_config() {
        let mut config = SleepSenseConfig::default();
        config.scoring.weights.duration = 0.9;
        assert!(matches!(
            SleepEngine::new(config),
            Err(SleepError::Config(_))
        ));
    }

    #[test]
    fn test_engine_persists_started_session() {
        let mut engine = SleepEngine::new(SleepSenseConfig::default()).unwrap();
        let session = engine.start_session("user-1", start_at()).unwrap();

        let stored = engine.stores().sessions.get_session(&session.id).unwrap();
        assert_eq!(stored, Some(session.clone()));
        assert!(engine.start_session("user-1", start_at()).is_err());

        assert_eq!(engine.abort_session().unwrap(), session.id);
        assert!(engine.active_session().is_none());
    }

    #[test]
    fn test_finish_scores_and_records_history() {
        let mut engine = SleepEngine::new(SleepSenseConfig::default()).unwrap();
        let session = engine.start_session("user-1", start_at()).unwrap();
        let completed = engine
            .finish_session(start_at() + Duration::minutes(450))
            .unwrap();

        assert_eq!(completed.session.id, session.id);
        assert_eq!(completed.session.duration_min, Some(450));
        assert!(completed.score.is_some());
        assert!(completed.recalibrated.is_none());

        let history = engine.score_history("user-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(
            history[0].date,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 16).unwrap()
        );

        let stored = engine
            .stores()
            .sessions
            .get_session(&session.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.duration_min, Some(450));
    }

    #[test]
    fn test_finish_is_retryable_after_storage_failure() {
        let memory = Arc::new(MemoryStore::new());
        let mut stores = Stores::shared(memory.clone());
        stores.sessions = Arc::new(FlakySessions {
            inner: memory.clone(),
            fail_updates: Mutex::new(1),
        });
        let mut engine = SleepEngine::with_stores(SleepSenseConfig::default(), stores).unwrap();

        let session = engine.start_session("user-1", start_at()).unwrap();
        let base = start_at().with_timezone(&Utc);
        for batch in 0..3 {
            let samples: Vec<SensorSample> = (0..30)
                .map(|i| {
                    SensorSample::at(base + Duration::seconds(batch * 30 + i))
                        .with_accelerometer(0.05, 0.0, 0.0)
                })
                .collect();
            engine.ingest(&samples).unwrap();
        }

        let end = start_at() + Duration::minutes(420);
        assert!(matches!(
            engine.finish_session(end),
            Err(SleepError::Storage(_))
        ));
        let active = engine.active_session().unwrap();
        assert_eq!(active.id, session.id);
        assert_eq!(active.sleep_latency_min, Some(1));
        assert!(engine.score_history("user-1").unwrap().is_empty());

        let completed = engine.finish_session(end).unwrap();
        assert_eq!(completed.session.sleep_latency_min, Some(1));
        assert!(!completed.session.stage_segments.is_empty());
        assert!(engine.active_session().is_none());

        let stored = memory.get_session(&session.id).unwrap().unwrap();
        assert_eq!(stored, completed.session);
        assert_eq!(memory.chunk_count(), 1);
        assert_eq!(engine.score_history("user-1").unwrap().len(), 1);
    }
}
