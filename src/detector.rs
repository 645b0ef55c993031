//! Real-time sleep detection
//!
//! Folds incoming sample batches into the sliding window and produces one
//! classification per batch:
//! 1. Feature extraction (movement, audio, light)
//! 2. Sleep/wake hysteresis on the average movement magnitude
//! 3. Confidence-gated stage classification
//! 4. Disturbance evaluation

use crate::config::DetectorConfig;
use crate::disturbance::DisturbanceCounter;
use crate::features;
use crate::stage::{HeuristicStageClassifier, StageClassifier};
use crate::state_machine::{
    confidence_from_std_dev, HysteresisState, SleepWakeStateMachine, Transition,
};
use crate::types::{SensorSample, SleepStage, SleepState, WindowOutcome};
use crate::window::SensorWindow;
use tracing::warn;

/// Per-session detector. Not shared between sessions.
pub struct SleepDetector {
    config: DetectorConfig,
    window: SensorWindow,
    state_machine: SleepWakeStateMachine,
    classifier: Box<dyn StageClassifier>,
    current: Option<SleepState>,
}

impl Default for SleepDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl SleepDetector {
    /// Create a detector using the heuristic stage classifier
    pub fn new(config: DetectorConfig) -> Self {
        let classifier = Box::new(HeuristicStageClassifier::new(config.stage.clone()));
        Self::with_classifier(config, classifier)
    }

    /// Create a detector with a custom stage classifier
    pub fn with_classifier(config: DetectorConfig, classifier: Box<dyn StageClassifier>) -> Self {
        Self {
            window: SensorWindow::new(config.window_size),
            state_machine: SleepWakeStateMachine::new(config.hysteresis.clone()),
            classifier,
            config,
            current: None,
        }
    }

    /// Restore hysteresis counters captured from an earlier run
    pub fn resume(mut self, state: HysteresisState) -> Self {
        self.state_machine = SleepWakeStateMachine::with_state(self.config.hysteresis.clone(), state);
        self
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Fold a batch into the window and classify the resulting window.
    ///
    /// Invalid and out-of-order samples are skipped. Returns `None` when the
    /// batch contributed no sample.
    pub fn process_batch(&mut self, samples: &[SensorSample]) -> Option<WindowOutcome> {
        self.process_batch_accepted(samples).1
    }

    /// Same as [`process_batch`](Self::process_batch), also returning the
    /// samples that entered the window.
    pub fn process_batch_accepted(
        &mut self,
        samples: &[SensorSample],
    ) -> (Vec<SensorSample>, Option<WindowOutcome>) {
        let mut accepted = Vec::with_capacity(samples.len());

        for sample in samples {
            if let Err(e) = sample.validate() {
                warn!(error = %e, "sample_rejected");
                continue;
            }
            match self.window.push(sample.clone()) {
                Ok(()) => accepted.push(sample.clone()),
                Err(e) => warn!(error = %e, "sample_out_of_order"),
            }
        }

        if accepted.is_empty() {
            return (accepted, None);
        }

        let fresh_motion = accepted.iter().any(|s| s.accelerometer.is_some());
        let outcome = self.evaluate(fresh_motion);
        (accepted, Some(outcome))
    }

    fn evaluate(&mut self, fresh_motion: bool) -> WindowOutcome {
        let window_features = features::extract(&self.window, &self.config);
        let movement = window_features.movement;
        let audio = window_features.audio;

        // only batches that brought new accelerometer data move the hysteresis
        let transition = if fresh_motion && movement.has_data() {
            self.state_machine.observe(movement.average_magnitude)
        } else {
            Transition::None
        };

        let confidence = confidence_from_std_dev(movement.std_dev);
        let stage = if self.state_machine.stage_gate_open(confidence) {
            self.classifier.classify(&movement, &audio, &self.window)
        } else {
            SleepStage::Awake
        };

        let disturbance = DisturbanceCounter::new(&self.config.disturbance).evaluate(
            &movement,
            &audio,
            window_features.average_lux,
        );

        let timestamp = self
            .window
            .latest()
            .map(|s| s.timestamp)
            .unwrap_or_else(chrono::Utc::now);

        let state = SleepState {
            is_asleep: self.state_machine.is_asleep(),
            confidence,
            stage,
            timestamp,
        };
        self.current = Some(state.clone());

        WindowOutcome {
            state,
            movement,
            audio,
            disturbance,
            average_lux: window_features.average_lux,
            transitioned: transition.changed(),
        }
    }

    /// Most recent classification
    pub fn current_state(&self) -> Option<&SleepState> {
        self.current.as_ref()
    }

    pub fn hysteresis_state(&self) -> HysteresisState {
        self.state_machine.state()
    }

    pub fn window(&self) -> &SensorWindow {
        &self.window
    }

    /// Clear counters, buffer and the last state
    pub fn reset(&mut self) {
        self.state_machine.reset();
        self.window.clear();
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DisturbanceKind;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, 23, 0, 0).unwrap()
    }

    /// One batch of `n` samples at constant magnitude starting at `start_sec`
    fn batch(start_sec: i64, n: usize, magnitude: f64) -> Vec<SensorSample> {
        (0..n)
            .map(|i| {
                SensorSample::at(base() + Duration::seconds(start_sec + i as i64))
                    .with_accelerometer(magnitude, 0.0, 0.0)
            })
            .collect()
    }

    fn small_window_config() -> DetectorConfig {
        DetectorConfig {
            window_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn test_falls_asleep_after_three_quiet_batches() {
        let mut detector = SleepDetector::new(small_window_config());

        let first = detector.process_batch(&batch(0, 10, 0.1)).unwrap();
        assert!(!first.state.is_asleep);
        assert_eq!(first.state.stage, SleepStage::Awake);

        let second = detector.process_batch(&batch(10, 10, 0.1)).unwrap();
        assert!(!second.state.is_asleep);

        let third = detector.process_batch(&batch(20, 10, 0.1)).unwrap();
        assert!(third.state.is_asleep);
        assert!(third.transitioned);
        // constant signal: zero spread, full confidence, stage assigned
        assert!(third.state.confidence > 0.99);
        assert_ne!(third.state.stage, SleepStage::Awake);
        assert_eq!(third.state.timestamp, base() + Duration::seconds(29));
    }

    #[test]
    fn test_low_confidence_forces_awake_stage() {
        let mut detector = SleepDetector::new(small_window_config()).resume(HysteresisState {
            is_asleep: true,
            ..Default::default()
        });

        // one hard jolt in an otherwise still window: low mean, large spread
        let samples: Vec<SensorSample> = (0..10)
            .map(|i| {
                let m = if i == 9 { 2.5 } else { 0.0 };
                SensorSample::at(base() + Duration::seconds(i)).with_accelerometer(m, 0.0, 0.0)
            })
            .collect();
        let outcome = detector.process_batch(&samples).unwrap();

        assert!(outcome.state.is_asleep);
        assert!(outcome.state.confidence < 0.7);
        assert_eq!(outcome.state.stage, SleepStage::Awake);
    }

    #[test]
    fn test_wakes_after_two_restless_batches() {
        let mut detector = SleepDetector::new(small_window_config());
        for i in 0..3 {
            detector.process_batch(&batch(i * 10, 10, 0.05));
        }
        assert!(detector.current_state().unwrap().is_asleep);

        let outcome = detector.process_batch(&batch(30, 10, 1.2)).unwrap();
        assert!(outcome.state.is_asleep);
        assert!(outcome.disturbance.kinds.contains(&DisturbanceKind::Movement));

        let outcome = detector.process_batch(&batch(40, 10, 1.2)).unwrap();
        assert!(!outcome.state.is_asleep);
        assert_eq!(outcome.state.stage, SleepStage::Awake);
    }

    #[test]
    fn test_replay_is_deterministic() {
        let batches: Vec<Vec<SensorSample>> = (0..12)
            .map(|i| {
                let m = [0.05, 0.02, 0.4, 0.03, 1.1, 0.9][i % 6];
                batch(i as i64 * 10, 10, m)
            })
            .collect();

        let run = || {
            let mut detector = SleepDetector::new(small_window_config());
            batches
                .iter()
                .filter_map(|b| detector.process_batch(b))
                .map(|o| o.state)
                .collect::<Vec<_>>()
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn test_out_of_order_samples_skipped() {
        let mut detector = SleepDetector::new(small_window_config());
        detector.process_batch(&batch(100, 5, 0.1)).unwrap();
        assert!(detector.process_batch(&batch(0, 5, 0.1)).is_none());
        assert_eq!(detector.window().len(), 5);
    }

    #[test]
    fn test_empty_batch_yields_nothing() {
        let mut detector = SleepDetector::default();
        assert!(detector.process_batch(&[]).is_none());
        assert!(detector.current_state().is_none());
    }

    #[test]
    fn test_windows_without_motion_do_not_advance_hysteresis() {
        let mut detector = SleepDetector::new(small_window_config());
        for i in 0..5 {
            let samples = vec![SensorSample::at(base() + Duration::seconds(i)).with_light(0.0)];
            detector.process_batch(&samples).unwrap();
        }
        assert_eq!(detector.hysteresis_state(), HysteresisState::default());
    }

    #[test]
    fn test_stale_motion_does_not_advance_hysteresis() {
        let mut detector = SleepDetector::new(small_window_config());
        detector.process_batch(&batch(0, 10, 0.1)).unwrap();
        let after_motion = detector.hysteresis_state();
        assert_eq!(after_motion.consecutive_low_movement_windows, 1);

        // the window still holds the accelerometer samples above
        for i in 0..2 {
            let samples = vec![SensorSample::at(base() + Duration::seconds(10 + i)).with_light(0.0)];
            let outcome = detector.process_batch(&samples).unwrap();
            assert!(!outcome.state.is_asleep);
            assert!(!outcome.transitioned);
        }
        assert_eq!(detector.hysteresis_state(), after_motion);
    }

    #[test]
    fn test_accepted_samples_exclude_rejected_ones() {
        let mut detector = SleepDetector::new(small_window_config());
        detector.process_batch(&batch(100, 2, 0.1)).unwrap();

        let samples = vec![
            SensorSample::at(base() + Duration::seconds(50)).with_accelerometer(0.1, 0.0, 0.0),
            SensorSample::at(base() + Duration::seconds(102)).with_light(-3.0),
            SensorSample::at(base() + Duration::seconds(103))
                .with_accelerometer(f64::NAN, 0.0, 0.0),
            SensorSample::at(base() + Duration::seconds(104)).with_accelerometer(0.2, 0.0, 0.0),
        ];
        let (accepted, outcome) = detector.process_batch_accepted(&samples);

        assert_eq!(accepted.len(), 1);
        assert_eq!(accepted[0].timestamp, base() + Duration::seconds(104));
        assert!(outcome.is_some());
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut detector = SleepDetector::new(small_window_config());
        for i in 0..3 {
            detector.process_batch(&batch(i * 10, 10, 0.05));
        }
        detector.reset();
        assert!(detector.window().is_empty());
        assert!(detector.current_state().is_none());
        assert_eq!(detector.hysteresis_state(), HysteresisState::default());
    }
}
