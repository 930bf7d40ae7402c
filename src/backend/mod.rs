//! External collaborators the phase actions call out to.
//!
//! Each service sits behind a trait so the worker can be driven by fakes in
//! tests; the submodules hold the HTTP implementations.

pub mod speech_batch;
pub mod sverigesradio;
pub mod synthesis;
pub mod text_analytics;
pub mod translator;

use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use speech_batch::{SpeechBatchClient, TranscriptionResult};
pub use sverigesradio::{SrEpisode, SverigesRadioClient};
pub use synthesis::SynthesisClient;
pub use text_analytics::TextAnalyticsClient;
pub use translator::TranslatorClient;

// ── Batch jobs ─────────────────────────────────────────────────────────────

/// Opaque handle of a job submitted to a batch backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status a backend reports for a job. Anything the backend sends that is
/// not one of the known names, including an empty string, is `Unrecognized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    Unrecognized,
}

impl From<&str> for JobState {
    fn from(s: &str) -> Self {
        match s {
            "NotStarted" => Self::NotStarted,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            _ => Self::Unrecognized,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub handle: JobHandle,
    pub state: JobState,
    pub status_message: String,
    pub results_urls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobDefinition {
    pub name: String,
    pub description: String,
    pub locale: String,
    pub recordings_url: String,
}

#[async_trait]
pub trait BatchJobClient: Send + Sync {
    /// Short label used in log lines, never the credential itself.
    fn name(&self) -> &str;

    async fn submit_job(&self, definition: &JobDefinition) -> AppResult<JobHandle>;

    async fn get_job_status(&self, job: &JobHandle) -> AppResult<JobReport>;

    async fn delete_job(&self, job: &JobHandle) -> AppResult<()>;

    async fn list_jobs(&self) -> AppResult<Vec<JobHandle>>;

    async fn fetch_result(&self, url: &str) -> AppResult<TranscriptionResult>;
}

// ── Episode discovery ──────────────────────────────────────────────────────

#[async_trait]
pub trait EpisodeLister: Send + Sync {
    /// Ids of the latest `count` episodes of a program, newest first.
    async fn list_episode_ids(&self, program_id: i64, count: usize) -> AppResult<Vec<i64>>;
}

#[async_trait]
pub trait EpisodeSource: Send + Sync {
    async fn get_episode(&self, episode_id: i64) -> AppResult<SrEpisode>;
}

// ── Text services ──────────────────────────────────────────────────────────

#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates every text into `to`, preserving order.
    async fn translate(&self, texts: &[String], from: &str, to: &str) -> AppResult<Vec<String>>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextAnalysis {
    pub key_phrases: Vec<String>,
    pub entities: Vec<String>,
    pub sentiment: Option<f64>,
}

#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str, language: &str) -> AppResult<TextAnalysis>;
}

// ── Speech synthesis ───────────────────────────────────────────────────────

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Returns mp3 audio, or `None` when the service refused this text.
    async fn synthesize(&self, text: &str, locale: &str, voice: &str) -> AppResult<Option<Vec<u8>>>;
}
