//! SleepSense - On-device sleep detection, baseline calibration and scoring
//!
//! SleepSense turns a stream of motion/audio/light samples into live sleep
//! states through a deterministic pipeline: windowing → feature extraction →
//! sleep/wake hysteresis → stage classification → disturbance counting.
//! Completed nights are scored against a personal baseline calibrated from the
//! user's first two weeks.
//!
//! ## Modules
//!
//! - **Detection**: `window`, `features`, `state_machine`, `stage`, `disturbance`, `detector`
//! - **Nightly**: `session`, `baseline`, `scoring`
//! - **Boundaries**: `storage`, `sync`, `pipeline`, `ffi`

pub mod baseline;
pub mod config;
pub mod detector;
pub mod disturbance;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod scoring;
pub mod session;
pub mod stage;
pub mod state_machine;
pub mod storage;
pub mod sync;
pub mod types;
pub mod window;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use baseline::BaselineCalibrator;
pub use config::SleepSenseConfig;
pub use detector::SleepDetector;
pub use error::SleepError;
pub use pipeline::{calibrate_json, score_session_json, CompletedSession, SleepEngine};
pub use scoring::SleepScorer;
pub use session::SessionTracker;
pub use stage::{HeuristicStageClassifier, StageClassifier};
pub use state_machine::{HysteresisState, SleepWakeStateMachine};
pub use storage::{MemoryStore, Stores};
pub use sync::{HealthSyncTarget, LoggingSyncTarget, SyncTargetRegistry};

/// SleepSense version
pub const SLEEPSENSE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name reported by the CLI
pub const PRODUCER_NAME: &str = "sleepsense";
