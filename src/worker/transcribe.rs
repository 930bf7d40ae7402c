use super::poller::{JobPoller, PollOutcome};
use super::pool::ClientPool;
use super::runner::PhaseAction;
use crate::backend::{BatchJobClient, JobDefinition, JobHandle, JobReport};
use crate::database::{Database, StoredTranscription, TranscriptionStatus};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const RESULT_CHANNEL: &str = "channel_0";

/// Transcribe: submit the collected audio to a batch speech backend picked
/// from the pool, wait for the job and store the combined display text.
pub struct TranscribeAction {
    db: Arc<Database>,
    pool: Arc<ClientPool<dyn BatchJobClient>>,
    poller: JobPoller,
}

impl TranscribeAction {
    pub fn new(db: Arc<Database>, pool: Arc<ClientPool<dyn BatchJobClient>>, poller: JobPoller) -> Self {
        Self { db, pool, poller }
    }
}

#[async_trait]
impl PhaseAction for TranscribeAction {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()> {
        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| AppError::NotFound(format!("collected episode {}", episode_id)))?;

        if let Some(existing) = self.db.get_transcription(episode_id)? {
            if existing.status == TranscriptionStatus::Transcribed {
                log::info!("Episode {} already transcribed", episode_id);
                return Ok(());
            }
        }

        self.db.store_transcription(&StoredTranscription {
            episode_id,
            status: TranscriptionStatus::Transcribing,
            combined_display: String::new(),
            result_urls: BTreeMap::new(),
        })?;

        let client = self.pool.next();
        let definition = JobDefinition {
            name: format!("RadioText - Episode {}", episode_id),
            description: "RadioText".to_string(),
            locale: episode.audio_locale.clone(),
            recordings_url: remove_query_string(&episode.original_audio_url).to_string(),
        };

        let job = client.submit_job(&definition).await?;
        log::info!("Transcribing episode {} as job {} on {}", episode_id, job, client.name());

        let outcome = self.await_transcript(&job, client.as_ref(), cancel).await;
        if let Err(e) = client.delete_job(&job).await {
            log::warn!("Failed to delete job {}: {}", job, e);
        }
        let (report, combined_display) = outcome?;

        self.db.store_transcription(&StoredTranscription {
            episode_id,
            status: TranscriptionStatus::Transcribed,
            combined_display,
            result_urls: report.results_urls,
        })?;

        log::info!("Transcribed episode {}", episode_id);
        Ok(())
    }
}

impl TranscribeAction {
    /// Polls the job to completion and downloads its display text. The caller
    /// owns the job and deletes it whatever the outcome.
    async fn await_transcript(
        &self,
        job: &JobHandle,
        client: &dyn BatchJobClient,
        cancel: &CancellationToken,
    ) -> AppResult<(JobReport, String)> {
        let report = match self.poller.await_completion(job, client, cancel).await? {
            PollOutcome::Succeeded(report) => report,
            PollOutcome::Failed(message) => {
                return Err(AppError::JobFailed {
                    job: job.to_string(),
                    message,
                })
            }
            PollOutcome::Cancelled => return Err(AppError::Cancelled),
        };

        let combined_display = match report.results_urls.get(RESULT_CHANNEL) {
            Some(url) => client.fetch_result(url).await?.combined_display(),
            None => {
                log::warn!("Job {} finished without a {} result", job, RESULT_CHANNEL);
                String::new()
            }
        };
        Ok((report, combined_display))
    }
}

/// Batch backends fetch recordings themselves; signed query strings are dropped.
pub fn remove_query_string(url: &str) -> &str {
    match url.find('?') {
        Some(index) if index > 0 => &url[..index],
        _ => url,
    }
}
