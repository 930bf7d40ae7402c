use super::pool::ClientPool;
use super::runner::PhaseAction;
use crate::backend::SpeechSynthesizer;
use crate::database::{Database, StoredEpisode, StoredSpeech};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const ENGLISH_VOICE: &str = "en-US-AriaNeural";
pub const SWEDISH_VOICE: &str = "sv-SE-HedvigRUS";

/// GenerateSpeech: read the English and Swedish transcriptions aloud and
/// keep the mp3 files next to the collected audio.
pub struct SpeakAction {
    db: Arc<Database>,
    pool: Arc<ClientPool<dyn SpeechSynthesizer>>,
    media_path: PathBuf,
}

impl SpeakAction {
    pub fn new(db: Arc<Database>, pool: Arc<ClientPool<dyn SpeechSynthesizer>>, media_path: PathBuf) -> Self {
        Self {
            db,
            pool,
            media_path,
        }
    }

    /// Returns the written file, or `None` when the service refused the text.
    async fn speak(
        &self,
        episode: &StoredEpisode,
        text: &str,
        locale: &str,
        voice: &str,
    ) -> AppResult<Option<String>> {
        if text.trim().is_empty() {
            log::warn!("No {} text to speak for episode {}", locale, episode.episode_id);
            return Ok(None);
        }

        let synthesizer = self.pool.next();
        let audio = match synthesizer.synthesize(text, locale, voice).await? {
            Some(audio) => audio,
            None => {
                log::error!("Could not create {} speech for episode {}", locale, episode.episode_id);
                return Ok(None);
            }
        };

        let path = self.media_path.join(speech_file_name(episode, voice));
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &audio).await?;
        log::info!("Created {} speech for episode {} ({} bytes)", locale, episode.episode_id, audio.len());

        Ok(Some(path.to_string_lossy().to_string()))
    }
}

#[async_trait]
impl PhaseAction for SpeakAction {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()> {
        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| AppError::NotFound(format!("collected episode {}", episode_id)))?;
        let enriched = self
            .db
            .get_enriched_episode(episode_id)?
            .ok_or_else(|| AppError::NotFound(format!("enrichment of episode {}", episode_id)))?;

        if self.db.get_speech(episode_id)?.is_some() {
            log::info!("Episode {} already has speech", episode_id);
            return Ok(());
        }

        let mut speech = StoredSpeech {
            episode_id,
            ..Default::default()
        };

        if let Some(english) = &enriched.english.transcription {
            speech.speech_path_en = self.speak(&episode, &english.text, "en-US", ENGLISH_VOICE).await?;
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if let Some(swedish) = &enriched.swedish.transcription {
            speech.speech_path_sv = self.speak(&episode, &swedish.text, "sv-SE", SWEDISH_VOICE).await?;
        }

        self.db.store_speech(&speech)?;
        Ok(())
    }
}

/// `SR/programs/{program}/episodes/{episode}/SR_{program}__{date}__{episode}__Speaker_{voice}.mp3`
pub fn speech_file_name(episode: &StoredEpisode, voice: &str) -> String {
    format!(
        "SR/programs/{p}/episodes/{e}/SR_{p}__{d}__{e}__Speaker_{v}.mp3",
        p = episode.program_id,
        e = episode.episode_id,
        d = episode.publish_date.format("%Y-%m-%d_%H-%M"),
        v = voice
    )
}
