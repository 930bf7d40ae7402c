//! Phase status persistence boundary.
//!
//! The worker only ever talks to a [`StatusStore`]; the SQLite [`Database`]
//! is the production implementation and [`MemoryStatusStore`] backs tests.
//!
//! [`Database`]: crate::database::Database

use crate::database::{Phase, State, StatusRecord};
use crate::error::AppResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Returns an `Unknown` record for episodes never seen before.
    async fn get_status(&self, episode_id: i64) -> AppResult<StatusRecord>;

    /// Overwrites the episode's record (last write wins).
    async fn set_status(&self, episode_id: i64, record: &StatusRecord) -> AppResult<()>;

    async fn list_by_phase_and_state(
        &self,
        phase: Option<Phase>,
        state: Option<State>,
    ) -> AppResult<Vec<StatusRecord>>;

    async fn delete_status(&self, episode_id: i64) -> AppResult<()>;
}

/// Process-local status store. Keeps every write in order so callers can
/// inspect the full history of an episode, and counts reads.
#[derive(Default)]
pub struct MemoryStatusStore {
    records: Mutex<HashMap<i64, StatusRecord>>,
    history: Mutex<Vec<StatusRecord>>,
    reads: AtomicUsize,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record without counting it as a write.
    pub fn insert(&self, record: StatusRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.episode_id, record);
    }

    pub fn history(&self) -> Vec<StatusRecord> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn history_for(&self, episode_id: i64) -> Vec<StatusRecord> {
        self.history()
            .into_iter()
            .filter(|r| r.episode_id == episode_id)
            .collect()
    }
}

#[async_trait]
impl StatusStore for MemoryStatusStore {
    async fn get_status(&self, episode_id: i64) -> AppResult<StatusRecord> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(records
            .get(&episode_id)
            .cloned()
            .unwrap_or_else(|| StatusRecord::unknown(episode_id)))
    }

    async fn set_status(&self, episode_id: i64, record: &StatusRecord) -> AppResult<()> {
        let mut stored = record.clone();
        stored.episode_id = episode_id;
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(episode_id, stored.clone());
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(stored);
        Ok(())
    }

    async fn list_by_phase_and_state(
        &self,
        phase: Option<Phase>,
        state: Option<State>,
    ) -> AppResult<Vec<StatusRecord>> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let mut matching: Vec<StatusRecord> = records
            .values()
            .filter(|r| phase.map_or(true, |p| r.phase == p))
            .filter(|r| state.map_or(true, |s| r.state == s))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.episode_id);
        Ok(matching)
    }

    async fn delete_status(&self, episode_id: i64) -> AppResult<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&episode_id);
        Ok(())
    }
}
