//! In-process stand-ins for the worker's collaborators.

use super::runner::PhaseAction;
use crate::backend::speech_batch::{AudioFileResult, CombinedResult};
use crate::backend::{
    BatchJobClient, JobDefinition, JobHandle, JobReport, JobState, SpeechSynthesizer,
    TextAnalysis, TextAnalyzer, TranscriptionResult, Translator,
};
use crate::database::{StoredEpisode, StoredTranscription, TranscriptionStatus};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Batch job backend that replays a fixed sequence of job states.
/// Once the script runs out the last state repeats.
pub struct ScriptedJobClient {
    name: String,
    script: Mutex<VecDeque<JobState>>,
    last: Mutex<JobState>,
    status_fetches: AtomicUsize,
    jobs: Mutex<Vec<JobHandle>>,
    failing_deletes: Mutex<HashSet<String>>,
    deleted: Mutex<Vec<String>>,
    submitted: Mutex<Vec<JobDefinition>>,
    display: String,
}

impl ScriptedJobClient {
    pub fn new(name: &str, script: Vec<JobState>) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(script.into()),
            last: Mutex::new(JobState::Running),
            status_fetches: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            deleted: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            display: "Hej och välkommen till Ekot.".to_string(),
        }
    }

    pub fn track_jobs(&self, ids: &[&str]) {
        let mut jobs = self.jobs.lock().unwrap();
        jobs.extend(ids.iter().map(|id| JobHandle(id.to_string())));
    }

    pub fn fail_deletes_of(&self, id: &str) {
        self.failing_deletes.lock().unwrap().insert(id.to_string());
    }

    pub fn status_fetches(&self) -> usize {
        self.status_fetches.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn submitted(&self) -> Vec<JobDefinition> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn display(&self) -> &str {
        &self.display
    }
}

#[async_trait]
impl BatchJobClient for ScriptedJobClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn submit_job(&self, definition: &JobDefinition) -> AppResult<JobHandle> {
        self.submitted.lock().unwrap().push(definition.clone());
        let mut jobs = self.jobs.lock().unwrap();
        let handle = JobHandle(format!("{}-job-{}", self.name, jobs.len() + 1));
        jobs.push(handle.clone());
        Ok(handle)
    }

    async fn get_job_status(&self, job: &JobHandle) -> AppResult<JobReport> {
        self.status_fetches.fetch_add(1, Ordering::SeqCst);
        let state = {
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.script.lock().unwrap().pop_front() {
                *last = next;
            }
            *last
        };

        let mut results_urls = BTreeMap::new();
        if state == JobState::Succeeded {
            results_urls.insert(
                "channel_0".to_string(),
                format!("https://results.example/{}/channel_0.json", job),
            );
        }
        let status_message = match state {
            JobState::Failed => "Audio could not be decoded".to_string(),
            _ => String::new(),
        };

        Ok(JobReport {
            handle: job.clone(),
            state,
            status_message,
            results_urls,
        })
    }

    async fn delete_job(&self, job: &JobHandle) -> AppResult<()> {
        if self.failing_deletes.lock().unwrap().contains(&job.0) {
            return Err(AppError::Backend(format!("cannot delete {}", job)));
        }
        self.jobs.lock().unwrap().retain(|j| j != job);
        self.deleted.lock().unwrap().push(job.0.clone());
        Ok(())
    }

    async fn list_jobs(&self) -> AppResult<Vec<JobHandle>> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn fetch_result(&self, _url: &str) -> AppResult<TranscriptionResult> {
        Ok(TranscriptionResult {
            audio_file_results: vec![AudioFileResult {
                audio_file_name: "channel_0".to_string(),
                combined_results: vec![CombinedResult {
                    channel_number: "0".to_string(),
                    display: self.display.clone(),
                }],
            }],
        })
    }
}

/// Tracks how many episodes are inside a phase action at the same time.
#[derive(Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyProbe {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

/// Phase action that counts its calls and fails, cancels or sleeps on request.
#[derive(Default)]
pub struct CountingAction {
    calls: AtomicUsize,
    episodes: Mutex<Vec<i64>>,
    fail_all: Mutex<Option<String>>,
    fail_for: Mutex<HashMap<i64, String>>,
    cancel_on_run: bool,
    delay: Duration,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl CountingAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(self, message: &str) -> Self {
        *self.fail_all.lock().unwrap() = Some(message.to_string());
        self
    }

    pub fn failing_for(self, episode_id: i64, message: &str) -> Self {
        self.fail_for
            .lock()
            .unwrap()
            .insert(episode_id, message.to_string());
        self
    }

    pub fn cancelling(mut self) -> Self {
        self.cancel_on_run = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration, probe: Arc<ConcurrencyProbe>) -> Self {
        self.delay = delay;
        self.probe = Some(probe);
        self
    }

    pub fn recover(&self) {
        *self.fail_all.lock().unwrap() = None;
        self.fail_for.lock().unwrap().clear();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn episodes(&self) -> Vec<i64> {
        self.episodes.lock().unwrap().clone()
    }
}

#[async_trait]
impl PhaseAction for CountingAction {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.episodes.lock().unwrap().push(episode_id);

        if let Some(probe) = &self.probe {
            probe.enter();
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(self.delay) => {}
            }
            probe.exit();
        }

        if self.cancel_on_run || cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if let Some(message) = self.fail_all.lock().unwrap().clone() {
            return Err(AppError::Backend(message));
        }
        if let Some(message) = self.fail_for.lock().unwrap().get(&episode_id).cloned() {
            return Err(AppError::Backend(message));
        }
        Ok(())
    }
}

// ── Stored artifacts and text services ─────────────────────────────────────

pub fn stored_episode(episode_id: i64, locale: &str) -> StoredEpisode {
    StoredEpisode {
        episode_id,
        program_id: 4540,
        program_name: "Ekot".to_string(),
        title: "Ekot 16:45".to_string(),
        description: "Senaste nytt om coronaviruset.".to_string(),
        url: format!("https://sverigesradio.se/artikel/{}", episode_id),
        image_url: "https://static-cdn.sr.se/images/ekot.jpg".to_string(),
        publish_date: Utc.with_ymd_and_hms(2020, 3, 16, 16, 45, 0).unwrap(),
        original_audio_url: format!("https://media.sr.se/{}.m4a", episode_id),
        audio_path: format!("/media/SR/4540/{}.m4a", episode_id),
        audio_extension: "m4a".to_string(),
        audio_locale: locale.to_string(),
    }
}

pub fn transcribed(episode_id: i64, text: &str) -> StoredTranscription {
    StoredTranscription {
        episode_id,
        status: TranscriptionStatus::Transcribed,
        combined_display: text.to_string(),
        result_urls: BTreeMap::new(),
    }
}

/// Prefixes every text with the target locale, e.g. `[en-US] Hej`.
#[derive(Default)]
pub struct PrefixTranslator {
    requests: Mutex<Vec<(Vec<String>, String, String)>>,
}

impl PrefixTranslator {
    pub fn requests(&self) -> Vec<(Vec<String>, String, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Translator for PrefixTranslator {
    async fn translate(&self, texts: &[String], from: &str, to: &str) -> AppResult<Vec<String>> {
        self.requests
            .lock()
            .unwrap()
            .push((texts.to_vec(), from.to_string(), to.to_string()));
        Ok(texts.iter().map(|t| format!("[{}] {}", to, t)).collect())
    }
}

/// Uses the first word as the only key phrase; records what it was asked.
#[derive(Default)]
pub struct FirstWordAnalyzer {
    requests: Mutex<Vec<(usize, String)>>,
}

impl FirstWordAnalyzer {
    /// `(char count, language)` of every analyzed text.
    pub fn requests(&self) -> Vec<(usize, String)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextAnalyzer for FirstWordAnalyzer {
    async fn analyze(&self, text: &str, language: &str) -> AppResult<TextAnalysis> {
        self.requests
            .lock()
            .unwrap()
            .push((text.chars().count(), language.to_string()));
        Ok(TextAnalysis {
            key_phrases: text.split_whitespace().take(1).map(str::to_string).collect(),
            entities: Vec::new(),
            sentiment: Some(0.5),
        })
    }
}

/// Returns the text's bytes as "audio", or refuses texts containing `refuse`.
#[derive(Default)]
pub struct EchoSynthesizer {
    refuse: Option<String>,
    voices: Mutex<Vec<String>>,
}

impl EchoSynthesizer {
    pub fn refusing(marker: &str) -> Self {
        Self {
            refuse: Some(marker.to_string()),
            voices: Mutex::new(Vec::new()),
        }
    }

    pub fn voices(&self) -> Vec<String> {
        self.voices.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for EchoSynthesizer {
    async fn synthesize(&self, text: &str, _locale: &str, voice: &str) -> AppResult<Option<Vec<u8>>> {
        self.voices.lock().unwrap().push(voice.to_string());
        match &self.refuse {
            Some(marker) if text.contains(marker.as_str()) => Ok(None),
            _ => Ok(Some(text.as_bytes().to_vec())),
        }
    }
}
