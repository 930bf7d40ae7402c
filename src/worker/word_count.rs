use super::runner::PhaseAction;
use crate::database::{Database, WordCountEpisode};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const MAX_STORED_TRANSCRIPTION_CHARS: usize = 60_000;

/// CountWords: count keyword groups in the summarized transcription.
pub struct WordCountAction {
    db: Arc<Database>,
    word_groups: Vec<Vec<String>>,
}

impl WordCountAction {
    pub fn new(db: Arc<Database>, word_groups: Vec<Vec<String>>) -> Self {
        Self { db, word_groups }
    }
}

#[async_trait]
impl PhaseAction for WordCountAction {
    async fn run(&self, episode_id: i64, _cancel: &CancellationToken) -> AppResult<()> {
        let summary = self
            .db
            .get_summarized_episode(episode_id)?
            .ok_or_else(|| AppError::NotFound(format!("summary of episode {}", episode_id)))?;

        let word_count = count_words(&summary.transcription, &self.word_groups);
        let hits: usize = word_count.values().sum();

        self.db.store_word_count(&WordCountEpisode {
            episode_id,
            audio_url: summary.original_audio_url,
            audio_locale: summary.audio_locale,
            title: summary.title,
            url: summary.url,
            publish_date: summary.publish_date,
            program_id: summary.program_id,
            program_name: summary.program_name,
            transcription: truncate_with_ellipsis(&summary.transcription, MAX_STORED_TRANSCRIPTION_CHARS),
            word_count,
        })?;

        log::info!("Counted {} keyword hits in episode {}", hits, episode_id);
        Ok(())
    }
}

/// Occurrences per group, keyed by the group's first word. Matching is
/// case-insensitive substring matching without overlaps.
pub fn count_words(text: &str, groups: &[Vec<String>]) -> BTreeMap<String, usize> {
    let normalized = text.trim().to_lowercase();
    groups
        .iter()
        .filter_map(|group| {
            let key = group.first()?;
            let count: usize = group
                .iter()
                .map(|word| occurrences(&normalized, &word.to_lowercase()))
                .sum();
            Some((key.clone(), count))
        })
        .collect()
}

fn occurrences(text: &str, word: &str) -> usize {
    if text.trim().is_empty() || word.trim().is_empty() {
        return 0;
    }
    text.matches(word).count()
}

pub fn truncate_with_ellipsis(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max.saturating_sub(3)).collect();
    truncated.push_str("...");
    truncated
}
