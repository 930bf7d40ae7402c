use super::runner::PhaseAction;
use crate::backend::{TextAnalyzer, Translator};
use crate::database::{Database, EnrichedEpisode, EnrichedText, EnrichedTexts, TranscriptionStatus};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MAX_TRANSLATION_CHARS: usize = 4500;
pub const MAX_ANALYTICS_CHARS: usize = 5120;

const SWEDISH: &str = "sv-SE";
const ENGLISH: &str = "en-US";

/// Enrich: translate title, description and transcription into Swedish and
/// English and run text analytics on every variant.
pub struct EnrichAction {
    db: Arc<Database>,
    translator: Arc<dyn Translator>,
    analyzer: Arc<dyn TextAnalyzer>,
}

struct SourceTexts<'a> {
    title: &'a str,
    description: &'a str,
    transcription: &'a str,
    locale: &'a str,
}

impl EnrichAction {
    pub fn new(db: Arc<Database>, translator: Arc<dyn Translator>, analyzer: Arc<dyn TextAnalyzer>) -> Self {
        Self {
            db,
            translator,
            analyzer,
        }
    }

    async fn texts_in(&self, source: &SourceTexts<'_>, target: &str) -> AppResult<EnrichedTexts> {
        if source.locale == target {
            return Ok(EnrichedTexts {
                title: Some(self.analyze(source.title, target).await?),
                description: Some(self.analyze(source.description, target).await?),
                transcription: Some(self.analyze(source.transcription, target).await?),
            });
        }

        log::info!("Translating from {} to {}", source.locale, target);
        let inputs: Vec<String> = [source.title, source.description, source.transcription]
            .iter()
            .map(|t| truncate_chars(t, MAX_TRANSLATION_CHARS).to_string())
            .collect();
        let translated = self.translator.translate(&inputs, source.locale, target).await?;
        let translation = |i: usize| translated.get(i).map(String::as_str).unwrap_or_default();

        Ok(EnrichedTexts {
            title: Some(self.analyze(translation(0), target).await?),
            description: Some(self.analyze(translation(1), target).await?),
            transcription: Some(self.analyze(translation(2), target).await?),
        })
    }

    async fn analyze(&self, text: &str, locale: &str) -> AppResult<EnrichedText> {
        let analysis = self
            .analyzer
            .analyze(truncate_chars(text, MAX_ANALYTICS_CHARS), locale)
            .await?;
        Ok(EnrichedText {
            text: text.to_string(),
            key_phrases: analysis.key_phrases,
            entities: analysis.entities,
            sentiment: analysis.sentiment,
        })
    }
}

#[async_trait]
impl PhaseAction for EnrichAction {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()> {
        let episode = self
            .db
            .get_episode(episode_id)?
            .ok_or_else(|| AppError::NotFound(format!("collected episode {}", episode_id)))?;
        let transcription = self
            .db
            .get_transcription(episode_id)?
            .filter(|t| t.status == TranscriptionStatus::Transcribed)
            .ok_or_else(|| AppError::NotFound(format!("transcription of episode {}", episode_id)))?;

        if self.db.get_enriched_episode(episode_id)?.is_some() {
            log::info!("Episode {} already enriched", episode_id);
            return Ok(());
        }

        let source = SourceTexts {
            title: &episode.title,
            description: &episode.description,
            transcription: &transcription.combined_display,
            locale: &episode.audio_locale,
        };

        let swedish = self.texts_in(&source, SWEDISH).await?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let english = self.texts_in(&source, ENGLISH).await?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        let original = match source.locale {
            SWEDISH => swedish.clone(),
            ENGLISH => english.clone(),
            other => self.texts_in(&source, other).await?,
        };

        self.db.store_enriched_episode(&EnrichedEpisode {
            episode_id,
            original_locale: episode.audio_locale.clone(),
            original,
            english,
            swedish,
        })?;

        log::info!("Enriched episode {}", episode_id);
        Ok(())
    }
}

/// First `max` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::fakes::{stored_episode, transcribed, FirstWordAnalyzer, PrefixTranslator};
    use tempfile::TempDir;

    struct Setup {
        _temp: TempDir,
        db: Arc<Database>,
        translator: Arc<PrefixTranslator>,
        analyzer: Arc<FirstWordAnalyzer>,
        action: EnrichAction,
    }

    fn setup(locale: &str, transcription: &str) -> Setup {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        db.store_episode(&stored_episode(42, locale)).unwrap();
        db.store_transcription(&transcribed(42, transcription)).unwrap();

        let translator = Arc::new(PrefixTranslator::default());
        let analyzer = Arc::new(FirstWordAnalyzer::default());
        let action = EnrichAction::new(db.clone(), translator.clone(), analyzer.clone());
        Setup {
            _temp: temp,
            db,
            translator,
            analyzer,
            action,
        }
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("åäö", 2), "åä");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[tokio::test]
    async fn test_swedish_episode_is_translated_to_english_only() {
        let s = setup("sv-SE", "Hej och välkommen");
        s.action.run(42, &CancellationToken::new()).await.unwrap();

        let requests = s.translator.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].2, "en-US");

        let enriched = s.db.get_enriched_episode(42).unwrap().unwrap();
        assert_eq!(enriched.original_locale, "sv-SE");
        let english = enriched.english.transcription.unwrap();
        assert_eq!(english.text, "[en-US] Hej och välkommen");
        assert_eq!(
            enriched.original.transcription,
            enriched.swedish.transcription
        );
        assert_eq!(s.analyzer.requests().len(), 6);
    }

    #[tokio::test]
    async fn test_other_locale_is_also_analyzed_in_its_own_language() {
        let s = setup("fi-FI", "Hyvää päivää");
        s.action.run(42, &CancellationToken::new()).await.unwrap();

        let targets: Vec<String> = s.translator.requests().into_iter().map(|r| r.2).collect();
        assert_eq!(targets, vec!["sv-SE", "en-US"]);
        assert_eq!(s.analyzer.requests().len(), 9);

        let enriched = s.db.get_enriched_episode(42).unwrap().unwrap();
        assert_eq!(enriched.original.transcription.unwrap().text, "Hyvää päivää");
    }

    #[tokio::test]
    async fn test_long_texts_are_capped_per_service() {
        let long = "ord ".repeat(3000);
        let s = setup("sv-SE", &long);
        s.action.run(42, &CancellationToken::new()).await.unwrap();

        let requests = s.translator.requests();
        assert!(requests[0].0.iter().all(|t| t.chars().count() <= MAX_TRANSLATION_CHARS));
        assert!(s
            .analyzer
            .requests()
            .iter()
            .all(|(len, _)| *len <= MAX_ANALYTICS_CHARS));

        let enriched = s.db.get_enriched_episode(42).unwrap().unwrap();
        assert_eq!(enriched.swedish.transcription.unwrap().text, long);
    }

    #[tokio::test]
    async fn test_untranscribed_episode_is_an_error() {
        let temp = TempDir::new().unwrap();
        let db = Arc::new(Database::new(&temp.path().join("test.db")).unwrap());
        db.store_episode(&stored_episode(42, "sv-SE")).unwrap();
        let action = EnrichAction::new(
            db,
            Arc::new(PrefixTranslator::default()),
            Arc::new(FirstWordAnalyzer::default()),
        );

        let err = action.run(42, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_enriched_episode_is_not_redone() {
        let s = setup("sv-SE", "Hej");
        s.action.run(42, &CancellationToken::new()).await.unwrap();
        s.action.run(42, &CancellationToken::new()).await.unwrap();
        assert_eq!(s.translator.requests().len(), 1);
    }
}
