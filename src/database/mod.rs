pub mod models;


use crate::error::AppResult;
use crate::worker::status::StatusStore;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub use models::*;

const EPISODES: &str = "episodes";
const TRANSCRIPTIONS: &str = "transcriptions";
const ENRICHMENTS: &str = "enrichments";
const SPEECHES: &str = "speeches";
const SUMMARIES: &str = "summaries";
const WORD_COUNTS: &str = "word_counts";

pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;

        // Enable WAL mode for concurrent reads
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        ",
        )?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;

        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS episode_status (
                episode_id INTEGER PRIMARY KEY,
                phase TEXT NOT NULL,
                state TEXT NOT NULL,
                info TEXT NOT NULL DEFAULT '',
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE INDEX IF NOT EXISTS idx_episode_status_phase_state
                ON episode_status(phase, state);
            "#,
        )?;

        for table in [EPISODES, TRANSCRIPTIONS, ENRICHMENTS, SPEECHES, SUMMARIES, WORD_COUNTS] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    episode_id INTEGER PRIMARY KEY,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );",
                table
            ))?;
        }

        Ok(())
    }

    // =========================================================================
    // Episode status
    // =========================================================================

    pub fn get_episode_status(&self, episode_id: i64) -> Result<StatusRecord> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT episode_id, phase, state, info FROM episode_status WHERE episode_id = ?1",
                params![episode_id],
                row_to_status,
            )
            .optional()?;

        Ok(record.unwrap_or_else(|| StatusRecord::unknown(episode_id)))
    }

    pub fn store_episode_status(&self, episode_id: i64, record: &StatusRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO episode_status (episode_id, phase, state, info, updated_at)
            VALUES (?1, ?2, ?3, ?4, datetime('now'))
            ON CONFLICT(episode_id) DO UPDATE SET
                phase = excluded.phase,
                state = excluded.state,
                info = excluded.info,
                updated_at = excluded.updated_at
            "#,
            params![
                episode_id,
                record.phase.as_str(),
                record.state.as_str(),
                record.info
            ],
        )?;
        Ok(())
    }

    pub fn list_episode_statuses(
        &self,
        phase: Option<Phase>,
        state: Option<State>,
    ) -> Result<Vec<StatusRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT episode_id, phase, state, info FROM episode_status
            WHERE (?1 IS NULL OR phase = ?1)
              AND (?2 IS NULL OR state = ?2)
            ORDER BY episode_id
            "#,
        )?;

        let records = stmt
            .query_map(
                params![phase.map(|p| p.as_str()), state.map(|s| s.as_str())],
                row_to_status,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    pub fn delete_episode_status(&self, episode_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM episode_status WHERE episode_id = ?1",
            params![episode_id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Artifacts
    // =========================================================================

    pub fn get_episode(&self, episode_id: i64) -> Result<Option<StoredEpisode>> {
        self.get_document(EPISODES, episode_id)
    }

    pub fn store_episode(&self, episode: &StoredEpisode) -> Result<()> {
        self.store_document(EPISODES, episode.episode_id, episode)
    }

    pub fn get_transcription(&self, episode_id: i64) -> Result<Option<StoredTranscription>> {
        self.get_document(TRANSCRIPTIONS, episode_id)
    }

    pub fn store_transcription(&self, transcription: &StoredTranscription) -> Result<()> {
        self.store_document(TRANSCRIPTIONS, transcription.episode_id, transcription)
    }

    pub fn get_enriched_episode(&self, episode_id: i64) -> Result<Option<EnrichedEpisode>> {
        self.get_document(ENRICHMENTS, episode_id)
    }

    pub fn store_enriched_episode(&self, enriched: &EnrichedEpisode) -> Result<()> {
        self.store_document(ENRICHMENTS, enriched.episode_id, enriched)
    }

    pub fn get_speech(&self, episode_id: i64) -> Result<Option<StoredSpeech>> {
        self.get_document(SPEECHES, episode_id)
    }

    pub fn store_speech(&self, speech: &StoredSpeech) -> Result<()> {
        self.store_document(SPEECHES, speech.episode_id, speech)
    }

    pub fn get_summarized_episode(&self, episode_id: i64) -> Result<Option<SummarizedEpisode>> {
        self.get_document(SUMMARIES, episode_id)
    }

    pub fn store_summarized_episode(&self, summary: &SummarizedEpisode) -> Result<()> {
        self.store_document(SUMMARIES, summary.episode_id, summary)
    }

    pub fn get_word_count(&self, episode_id: i64) -> Result<Option<WordCountEpisode>> {
        self.get_document(WORD_COUNTS, episode_id)
    }

    pub fn store_word_count(&self, word_count: &WordCountEpisode) -> Result<()> {
        self.store_document(WORD_COUNTS, word_count.episode_id, word_count)
    }

    fn get_document<T: DeserializeOwned>(&self, table: &str, episode_id: i64) -> Result<Option<T>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                &format!("SELECT body FROM {} WHERE episode_id = ?1", table),
                params![episode_id],
                |row| row.get(0),
            )
            .optional()?;

        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    fn store_document<T: Serialize>(&self, table: &str, episode_id: i64, value: &T) -> Result<()> {
        let body = serde_json::to_string(value)?;
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (episode_id, body, updated_at) VALUES (?1, ?2, datetime('now'))
                 ON CONFLICT(episode_id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
                table
            ),
            params![episode_id, body],
        )?;
        Ok(())
    }
}

fn row_to_status(row: &rusqlite::Row<'_>) -> rusqlite::Result<StatusRecord> {
    let phase: String = row.get(1)?;
    let state: String = row.get(2)?;
    Ok(StatusRecord {
        episode_id: row.get(0)?,
        phase: Phase::from(phase.as_str()),
        state: State::from(state.as_str()),
        info: row.get(3)?,
    })
}

#[async_trait]
impl StatusStore for Database {
    async fn get_status(&self, episode_id: i64) -> AppResult<StatusRecord> {
        Ok(self.get_episode_status(episode_id)?)
    }

    async fn set_status(&self, episode_id: i64, record: &StatusRecord) -> AppResult<()> {
        Ok(self.store_episode_status(episode_id, record)?)
    }

    async fn list_by_phase_and_state(
        &self,
        phase: Option<Phase>,
        state: Option<State>,
    ) -> AppResult<Vec<StatusRecord>> {
        Ok(self.list_episode_statuses(phase, state)?)
    }

    async fn delete_status(&self, episode_id: i64) -> AppResult<()> {
        Ok(self.delete_episode_status(episode_id)?)
    }
}
