//! Sleep/wake state machine
//!
//! Hysteresis over per-window movement magnitude. Falling asleep takes more
//! consecutive quiet windows than waking up takes restless ones, so settling
//! movement does not trigger a premature sleep onset while wake events are
//! reported promptly.
//!
//! The counters live in [`HysteresisState`], a plain serializable struct, so
//! callers can persist it or construct any intermediate state directly.

use crate::config::HysteresisConfig;
use serde::{Deserialize, Serialize};
use tracing::info;

/// State carried across windows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HysteresisState {
    pub consecutive_low_movement_windows: u32,
    pub consecutive_high_movement_windows: u32,
    pub is_asleep: bool,
}

/// Result of one window evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    FellAsleep,
    WokeUp,
}

impl Transition {
    pub fn changed(&self) -> bool {
        !matches!(self, Transition::None)
    }
}

/// Sleep/wake hysteresis machine; one instance per active session
#[derive(Debug, Clone)]
pub struct SleepWakeStateMachine {
    config: HysteresisConfig,
    state: HysteresisState,
}

impl SleepWakeStateMachine {
    pub fn new(config: HysteresisConfig) -> Self {
        Self::with_state(config, HysteresisState::default())
    }

    /// Resume from a previously captured state
    pub fn with_state(config: HysteresisConfig, state: HysteresisState) -> Self {
        Self { config, state }
    }

    pub fn state(&self) -> HysteresisState {
        self.state
    }

    pub fn is_asleep(&self) -> bool {
        self.state.is_asleep
    }

    pub fn config(&self) -> &HysteresisConfig {
        &self.config
    }

    /// Feed one window's movement magnitude
    pub fn observe(&mut self, magnitude: f64) -> Transition {
        let state = &mut self.state;

        if magnitude < self.config.sleep_threshold {
            state.consecutive_low_movement_windows += 1;
            state.consecutive_high_movement_windows = 0;
        } else if magnitude > self.config.awake_threshold {
            state.consecutive_high_movement_windows += 1;
            state.consecutive_low_movement_windows = 0;
        }
        // ambiguous band: no hysteresis progress either way

        if !state.is_asleep
            && state.consecutive_low_movement_windows >= self.config.windows_to_sleep
        {
            state.is_asleep = true;
            info!(
                magnitude,
                low_windows = state.consecutive_low_movement_windows,
                "sleep_onset"
            );
            return Transition::FellAsleep;
        }

        if state.is_asleep
            && state.consecutive_high_movement_windows >= self.config.windows_to_wake
        {
            state.is_asleep = false;
            info!(
                magnitude,
                high_windows = state.consecutive_high_movement_windows,
                "wake_detected"
            );
            return Transition::WokeUp;
        }

        Transition::None
    }

    /// Whether stage assignment may run for a window with this confidence
    pub fn stage_gate_open(&self, confidence: f64) -> bool {
        self.state.is_asleep && confidence > self.config.stage_confidence_gate
    }

    pub fn reset(&mut self) {
        self.state = HysteresisState::default();
    }
}

/// Confidence from motion spread: `clamp(1 - stddev, 0, 1)`
pub fn confidence_from_std_dev(std_dev: f64) -> f64 {
    (1.0 - std_dev).clamp(0.0, 1.0)
}
