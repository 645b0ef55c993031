//! Persistence boundary
//!
//! The pipeline only talks to storage through these traits. `MemoryStore`
//! implements all of them and backs the CLI, the FFI and the tests.

use crate::error::SleepError;
use crate::types::{
    BaselineMetrics, ScoreRecord, SensorChunk, SensorSample, Session, SessionUpdate,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub trait SessionStore: Send + Sync {
    fn create_session(&self, session: &Session) -> Result<(), SleepError>;

    /// Apply a partial update; fails with `Storage` for unknown ids
    fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session, SleepError>;

    fn get_session(&self, id: &str) -> Result<Option<Session>, SleepError>;

    /// Sessions started within `days` before `now`, newest first
    fn recent_sessions(
        &self,
        user_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SleepError>;
}

pub trait SensorChunkStore: Send + Sync {
    /// Persist chunks; re-saving a chunk id is a no-op
    fn save_chunks(&self, chunks: &[SensorChunk]) -> Result<(), SleepError>;

    /// All samples recorded for a session in ascending timestamp order
    fn chunks_for_session(&self, session_id: &str) -> Result<Vec<SensorSample>, SleepError>;
}

pub trait BaselineStore: Send + Sync {
    fn get_baseline(&self, user_id: &str) -> Result<Option<BaselineMetrics>, SleepError>;

    /// Overwrites any previous baseline for the user
    fn save_baseline(&self, baseline: &BaselineMetrics) -> Result<(), SleepError>;
}

pub trait ScoreStore: Send + Sync {
    /// Append-only
    fn save_score(&self, record: &ScoreRecord) -> Result<(), SleepError>;

    fn scores_for_user(&self, user_id: &str) -> Result<Vec<ScoreRecord>, SleepError>;
}

/// The four collaborators the engine persists through
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionStore>,
    pub chunks: Arc<dyn SensorChunkStore>,
    pub baselines: Arc<dyn BaselineStore>,
    pub scores: Arc<dyn ScoreStore>,
}

impl Stores {
    /// Use one backend for every concern
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: SessionStore + SensorChunkStore + BaselineStore + ScoreStore + 'static,
    {
        Self {
            sessions: store.clone(),
            chunks: store.clone(),
            baselines: store.clone(),
            scores: store,
        }
    }

    pub fn in_memory() -> Self {
        Self::shared(Arc::new(MemoryStore::new()))
    }
}

/// In-process store behind read/write locks
#[derive(Debug, Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<String, Session>>,
    chunks: RwLock<Vec<SensorChunk>>,
    baselines: RwLock<HashMap<String, BaselineMetrics>>,
    scores: RwLock<Vec<ScoreRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.read().len()
    }

    fn has_chunk(&self, id: &Uuid) -> bool {
        self.chunks.read().iter().any(|c| &c.id == id)
    }
}

impl SessionStore for MemoryStore {
    fn create_session(&self, session: &Session) -> Result<(), SleepError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id) {
            return Err(SleepError::Storage(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    fn update_session(&self, id: &str, update: SessionUpdate) -> Result<Session, SleepError> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SleepError::Storage(format!("unknown session {id}")))?;
        session.apply(update);
        Ok(session.clone())
    }

    fn get_session(&self, id: &str) -> Result<Option<Session>, SleepError> {
        Ok(self.sessions.read().get(id).cloned())
    }

    fn recent_sessions(
        &self,
        user_id: &str,
        days: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, SleepError> {
        let since = now - Duration::days(days as i64);
        let mut sessions: Vec<Session> = self
            .sessions
            .read()
            .values()
            .filter(|s| s.user_id == user_id)
            .filter(|s| {
                let start = s.start_at.with_timezone(&Utc);
                start >= since && start <= now
            })
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.start_at.cmp(&a.start_at));
        Ok(sessions)
    }
}

impl SensorChunkStore for MemoryStore {
    fn save_chunks(&self, chunks: &[SensorChunk]) -> Result<(), SleepError> {
        let fresh: Vec<SensorChunk> = chunks
            .iter()
            .filter(|c| !self.has_chunk(&c.id))
            .cloned()
            .collect();
        let mut stored = self.chunks.write();
        for chunk in fresh {
            // a concurrent writer may have inserted it in between
            if !stored.iter().any(|c| c.id == chunk.id) {
                stored.push(chunk);
            }
        }
        Ok(())
    }

    fn chunks_for_session(&self, session_id: &str) -> Result<Vec<SensorSample>, SleepError> {
        let mut samples: Vec<SensorSample> = self
            .chunks
            .read()
            .iter()
            .filter(|c| c.session_id == session_id)
            .flat_map(|c| c.samples.iter().cloned())
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        Ok(samples)
    }
}

impl BaselineStore for MemoryStore {
    fn get_baseline(&self, user_id: &str) -> Result<Option<BaselineMetrics>, SleepError> {
        Ok(self.baselines.read().get(user_id).cloned())
    }

    fn save_baseline(&self, baseline: &BaselineMetrics) -> Result<(), SleepError> {
        self.baselines
            .write()
            .insert(baseline.user_id.clone(), baseline.clone());
        Ok(())
    }
}

impl ScoreStore for MemoryStore {
    fn save_score(&self, record: &ScoreRecord) -> Result<(), SleepError> {
        self.scores.write().push(record.clone());
        Ok(())
    }

    fn scores_for_user(&self, user_id: &str) -> Result<Vec<ScoreRecord>, SleepError> {
        Ok(self
            .scores
            .read()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}
