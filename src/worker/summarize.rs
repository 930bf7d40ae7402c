use super::runner::PhaseAction;
use crate::database::{
    Database, EnrichedEpisode, StoredEpisode, StoredSpeech, StoredTranscription, SummarizedEpisode,
    TranscriptionStatus,
};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Summarize: merge every stored artifact into one document per episode.
pub struct SummarizeAction {
    db: Arc<Database>,
}

impl SummarizeAction {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl PhaseAction for SummarizeAction {
    async fn run(&self, episode_id: i64, _cancel: &CancellationToken) -> AppResult<()> {
        let missing = |what: &str| AppError::NotFound(format!("{} of episode {}", what, episode_id));

        let episode = self.db.get_episode(episode_id)?.ok_or_else(|| missing("collected audio"))?;
        let transcription = self
            .db
            .get_transcription(episode_id)?
            .filter(|t| t.status == TranscriptionStatus::Transcribed)
            .ok_or_else(|| missing("transcription"))?;
        let enriched = self
            .db
            .get_enriched_episode(episode_id)?
            .ok_or_else(|| missing("enrichment"))?;
        let speech = self.db.get_speech(episode_id)?.ok_or_else(|| missing("speech"))?;

        if self.db.get_summarized_episode(episode_id)?.is_some() {
            log::info!("Episode {} already summarized", episode_id);
            return Ok(());
        }

        let summary = summarize(episode, transcription, enriched, speech);
        self.db.store_summarized_episode(&summary)?;
        log::info!("Summarized episode {}", episode_id);
        Ok(())
    }
}

pub fn summarize(
    episode: StoredEpisode,
    transcription: StoredTranscription,
    enriched: EnrichedEpisode,
    speech: StoredSpeech,
) -> SummarizedEpisode {
    SummarizedEpisode {
        episode_id: episode.episode_id,
        original_audio_url: episode.original_audio_url,
        audio_path: episode.audio_path,
        audio_locale: episode.audio_locale,
        title: episode.title,
        description: episode.description,
        url: episode.url,
        publish_date: episode.publish_date,
        image_url: episode.image_url,
        program_id: episode.program_id,
        program_name: episode.program_name,
        transcription: transcription.combined_display,
        original: enriched.original,
        english: enriched.english,
        swedish: enriched.swedish,
        speech_path_en: speech.speech_path_en,
        speech_path_sv: speech.speech_path_sv,
    }
}
