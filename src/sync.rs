//! Health-platform sync targets
//!
//! Completed sessions and their scores are handed to every target enabled in
//! configuration. Platform-specific mapping lives behind `HealthSyncTarget`;
//! delivery failures are logged and never fail the session.

use crate::error::SleepError;
use crate::types::{Session, SleepScoreBreakdown};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// A destination for completed sessions
pub trait HealthSyncTarget: Send + Sync {
    /// Platform name used to enable the target in configuration
    fn name(&self) -> &str;

    fn deliver(
        &self,
        session: &Session,
        score: Option<&SleepScoreBreakdown>,
    ) -> Result<(), SleepError>;
}

/// Records deliveries in the log and nothing else
#[derive(Debug, Clone)]
pub struct LoggingSyncTarget {
    name: String,
}

impl LoggingSyncTarget {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LoggingSyncTarget {
    fn default() -> Self {
        Self::new("log")
    }
}

impl HealthSyncTarget for LoggingSyncTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(
        &self,
        session: &Session,
        score: Option<&SleepScoreBreakdown>,
    ) -> Result<(), SleepError> {
        info!(
            target_name = %self.name,
            session_id = %session.id,
            user_id = %session.user_id,
            total = score.map(|s| s.total),
            "session_synced"
        );
        Ok(())
    }
}

/// Registered targets keyed by name
#[derive(Default)]
pub struct SyncTargetRegistry {
    targets: BTreeMap<String, Box<dyn HealthSyncTarget>>,
}

impl SyncTargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a target, replacing any previous one with the same name
    pub fn register(&mut self, target: Box<dyn HealthSyncTarget>) {
        self.targets.insert(target.name().to_string(), target);
    }

    pub fn names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    /// Targets among `enabled`, in configuration order. Unknown names are
    /// logged and skipped.
    pub fn select<'a>(&'a self, enabled: &[String]) -> Vec<&'a dyn HealthSyncTarget> {
        enabled
            .iter()
            .filter_map(|name| match self.targets.get(name) {
                Some(target) => Some(target.as_ref()),
                None => {
                    warn!(platform = %name, "sync_target_unknown");
                    None
                }
            })
            .collect()
    }

    /// Deliver to every enabled target; returns how many accepted the session
    pub fn deliver(
        &self,
        enabled: &[String],
        session: &Session,
        score: Option<&SleepScoreBreakdown>,
    ) -> usize {
        let mut delivered = 0;
        for target in self.select(enabled) {
            match target.deliver(session, score) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    platform = target.name(),
                    session_id = %session.id,
                    error = %e,
                    "sync_delivery_failed"
                ),
            }
        }
        delivered
    }
}
