//! Session aggregation
//!
//! `SessionTracker` owns the detector of the one active session and folds each
//! window outcome into the session record: stage segments, sleep latency,
//! awakenings and disturbance events. Raw samples are buffered and flushed to
//! the chunk store in batches.

use crate::config::{DetectorConfig, SessionConfig};
use crate::detector::SleepDetector;
use crate::error::SleepError;
use crate::state_machine::HysteresisState;
use crate::storage::SensorChunkStore;
use crate::types::{
    DisturbanceEvent, SensorChunk, SensorSample, Session, SleepStage, SleepState, StageSegment,
    WindowOutcome,
};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use tracing::{debug, info};

/// Stage run that has not been closed yet
#[derive(Debug, Clone, Copy)]
struct OpenSegment {
    stage: SleepStage,
    start: DateTime<Utc>,
}

struct ActiveSession {
    session: Session,
    detector: SleepDetector,
    pending: Vec<SensorSample>,
    open_segment: Option<OpenSegment>,
    onset_at: Option<DateTime<Utc>>,
    was_disturbed: bool,
}

impl ActiveSession {
    fn record(&mut self, outcome: &WindowOutcome) {
        let state = &outcome.state;

        if state.is_asleep && self.onset_at.is_none() {
            self.onset_at = Some(state.timestamp);
            let start = self.session.start_at.with_timezone(&Utc);
            let latency = (state.timestamp - start).num_minutes().max(0);
            self.session.sleep_latency_min = Some(latency as u32);
        }

        if outcome.transitioned && !state.is_asleep {
            self.session.awake_count += 1;
        }

        match self.open_segment {
            None => {
                // the first run is attributed from the moment the session began
                self.open_segment = Some(OpenSegment {
                    stage: state.stage,
                    start: self.session.start_at.with_timezone(&Utc),
                });
            }
            Some(open) if open.stage != state.stage => {
                self.close_segment(state.timestamp);
                self.open_segment = Some(OpenSegment {
                    stage: state.stage,
                    start: state.timestamp,
                });
            }
            Some(_) => {}
        }

        let disturbed = outcome.disturbance.is_disturbed();
        if disturbed && !self.was_disturbed {
            self.session.disturbances.push(DisturbanceEvent {
                timestamp: state.timestamp,
                kinds: outcome.disturbance.kinds.clone(),
            });
        }
        self.was_disturbed = disturbed;
    }

    fn close_segment(&mut self, end: DateTime<Utc>) {
        if let Some(open) = self.open_segment.take() {
            let end = end.max(open.start);
            self.session
                .stage_segments
                .push(StageSegment::new(open.stage, open.start, end));
        }
    }

    fn flush(&mut self, store: &dyn SensorChunkStore) -> Result<(), SleepError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // pending samples stay buffered until the store accepts them
        let chunk = SensorChunk::new(self.session.id.clone(), self.pending.clone());
        store.save_chunks(std::slice::from_ref(&chunk))?;
        self.pending.clear();
        debug!(session_id = %self.session.id, samples = chunk.samples.len(), "chunk_flushed");
        Ok(())
    }
}

/// Aggregates window outcomes of the single active session
pub struct SessionTracker {
    config: SessionConfig,
    active: Option<ActiveSession>,
}

impl SessionTracker {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            active: None,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// The session being recorded, if any
    pub fn session(&self) -> Option<&Session> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Begin a new session with a fresh detector.
    ///
    /// Fails with `InvalidState` while another session is active.
    pub fn start(
        &mut self,
        user_id: &str,
        start_at: DateTime<FixedOffset>,
        detector: DetectorConfig,
    ) -> Result<Session, SleepError> {
        if let Some(active) = &self.active {
            return Err(SleepError::InvalidState(format!(
                "session {} is already active",
                active.session.id
            )));
        }

        let session = Session::begin(user_id, start_at);
        info!(session_id = %session.id, user_id, start_at = %start_at, "session_started");

        self.active = Some(ActiveSession {
            session: session.clone(),
            detector: SleepDetector::new(detector),
            pending: Vec::new(),
            open_segment: None,
            onset_at: None,
            was_disturbed: false,
        });
        Ok(session)
    }

    /// Fold a sample batch into the active session.
    ///
    /// Only samples accepted by the detector are buffered for the chunk store.
    /// A failed flush leaves them buffered for the next flush.
    pub fn ingest(
        &mut self,
        batch: &[SensorSample],
        chunks: &dyn SensorChunkStore,
    ) -> Result<Option<WindowOutcome>, SleepError> {
        let threshold = self.config.chunk_flush_threshold;
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| SleepError::InvalidState("no active session".into()))?;

        let (accepted, outcome) = active.detector.process_batch_accepted(batch);
        if let Some(outcome) = &outcome {
            active.record(outcome);
        }

        active.pending.extend(accepted);
        if active.pending.len() >= threshold {
            active.flush(chunks)?;
        }
        Ok(outcome)
    }

    /// Last classification of the active session
    pub fn current_state(&self) -> Option<&SleepState> {
        self.active.as_ref()?.detector.current_state()
    }

    pub fn hysteresis_state(&self) -> Option<HysteresisState> {
        self.active.as_ref().map(|a| a.detector.hysteresis_state())
    }

    /// Auto-end check: two awake observations after sleep onset, at least the
    /// confirmation delay apart.
    pub fn is_wake_confirmed(&self, first: &SleepState, second: &SleepState) -> bool {
        let Some(onset) = self.active.as_ref().and_then(|a| a.onset_at) else {
            return false;
        };
        let delay = Duration::minutes(self.config.wake_confirmation_minutes);

        !first.is_asleep
            && !second.is_asleep
            && first.timestamp >= onset
            && second.timestamp - first.timestamp >= delay
    }

    /// Flush pending chunks and discard the active session.
    ///
    /// Returns the id of the discarded session.
    pub fn abort(&mut self, chunks: &dyn SensorChunkStore) -> Result<String, SleepError> {
        let mut active = self
            .active
            .take()
            .ok_or_else(|| SleepError::InvalidState("no active session".into()))?;

        if let Err(e) = active.flush(chunks) {
            // keep the session so the caller can retry the abort
            self.active = Some(active);
            return Err(e);
        }

        info!(session_id = %active.session.id, "session_aborted");
        Ok(active.session.id)
    }

    /// Flush pending chunks and return the active session as it would look
    /// closed at `end_at`. The session stays active.
    pub fn completed(
        &mut self,
        end_at: DateTime<FixedOffset>,
        chunks: &dyn SensorChunkStore,
    ) -> Result<Session, SleepError> {
        let active = self
            .active
            .as_mut()
            .ok_or_else(|| SleepError::InvalidState("no active session".into()))?;

        if end_at < active.session.start_at {
            return Err(SleepError::InvalidInput(format!(
                "session end {end_at} precedes start {}",
                active.session.start_at
            )));
        }

        active.flush(chunks)?;

        let mut session = active.session.clone();
        if let Some(open) = active.open_segment {
            let end = end_at.with_timezone(&Utc).max(open.start);
            session
                .stage_segments
                .push(StageSegment::new(open.stage, open.start, end));
        }
        session.end_at = Some(end_at);
        session.duration_min = Some((end_at - session.start_at).num_minutes().max(0) as u32);
        Ok(session)
    }

    /// Close the active session at `end_at` and return the completed record
    pub fn finish(
        &mut self,
        end_at: DateTime<FixedOffset>,
        chunks: &dyn SensorChunkStore,
    ) -> Result<Session, SleepError> {
        let session = self.completed(end_at, chunks)?;
        self.active = None;

        info!(
            session_id = %session.id,
            duration_min = session.duration_min,
            awake_count = session.awake_count,
            disturbances = session.disturbances.len(),
            "session_finished"
        );
        Ok(session)
    }
}
