use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Processing phases in pipeline order. A higher phase implies every lower
/// phase has completed for that episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    Unknown = 0,
    Collect = 1,
    Transcribe = 2,
    Enrich = 3,
    GenerateSpeech = 4,
    Summarize = 5,
    CountWords = 6,
}

impl Phase {
    /// The phases the workflow walks, in execution order.
    pub const PIPELINE: [Phase; 6] = [
        Phase::Collect,
        Phase::Transcribe,
        Phase::Enrich,
        Phase::GenerateSpeech,
        Phase::Summarize,
        Phase::CountWords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Collect => "Collect",
            Self::Transcribe => "Transcribe",
            Self::Enrich => "Enrich",
            Self::GenerateSpeech => "GenerateSpeech",
            Self::Summarize => "Summarize",
            Self::CountWords => "CountWords",
        }
    }
}

impl Default for Phase {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unrecognized names fall back to `Unknown`, which re-runs from the first phase.
impl From<&str> for Phase {
    fn from(s: &str) -> Self {
        match s {
            "Collect" => Self::Collect,
            "Transcribe" => Self::Transcribe,
            "Enrich" => Self::Enrich,
            "GenerateSpeech" => Self::GenerateSpeech,
            "Summarize" => Self::Summarize,
            "CountWords" => Self::CountWords,
            _ => Self::Unknown,
        }
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match Phase::from(s) {
            Phase::Unknown if s != "Unknown" => Err(format!("Invalid phase: {}", s)),
            phase => Ok(phase),
        }
    }
}

/// Execution state of the phase recorded in a [`StatusRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum State {
    Unknown,
    Started,
    Done,
    Error,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "Unknown",
            Self::Started => "Started",
            Self::Done => "Done",
            Self::Error => "Error",
        }
    }
}

impl Default for State {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for State {
    fn from(s: &str) -> Self {
        match s {
            "Started" => Self::Started,
            "Done" => Self::Done,
            "Error" => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl std::str::FromStr for State {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match State::from(s) {
            State::Unknown if s != "Unknown" => Err(format!("Invalid state: {}", s)),
            state => Ok(state),
        }
    }
}

/// Last known phase and state of one episode. One record per episode,
/// overwritten in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub episode_id: i64,
    pub phase: Phase,
    pub state: State,
    pub info: String,
}

impl StatusRecord {
    pub fn unknown(episode_id: i64) -> Self {
        Self {
            episode_id,
            phase: Phase::Unknown,
            state: State::Unknown,
            info: String::new(),
        }
    }

    pub fn started(episode_id: i64, phase: Phase) -> Self {
        Self {
            episode_id,
            phase,
            state: State::Started,
            info: String::new(),
        }
    }

    pub fn done(episode_id: i64, phase: Phase) -> Self {
        Self {
            episode_id,
            phase,
            state: State::Done,
            info: String::new(),
        }
    }

    pub fn error(episode_id: i64, phase: Phase, info: impl Into<String>) -> Self {
        Self {
            episode_id,
            phase,
            state: State::Error,
            info: info.into(),
        }
    }
}

// ── Stored artifacts ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredEpisode {
    pub episode_id: i64,
    pub program_id: i64,
    pub program_name: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub image_url: String,
    pub publish_date: DateTime<Utc>,
    pub original_audio_url: String,
    pub audio_path: String,
    pub audio_extension: String,
    pub audio_locale: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionStatus {
    Transcribing,
    Transcribed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTranscription {
    pub episode_id: i64,
    pub status: TranscriptionStatus,
    #[serde(default)]
    pub combined_display: String,
    #[serde(default)]
    pub result_urls: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedText {
    pub text: String,
    pub key_phrases: Vec<String>,
    pub entities: Vec<String>,
    pub sentiment: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichedTexts {
    pub title: Option<EnrichedText>,
    pub description: Option<EnrichedText>,
    pub transcription: Option<EnrichedText>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEpisode {
    pub episode_id: i64,
    pub original_locale: String,
    pub original: EnrichedTexts,
    pub english: EnrichedTexts,
    pub swedish: EnrichedTexts,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredSpeech {
    pub episode_id: i64,
    pub speech_path_en: Option<String>,
    pub speech_path_sv: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizedEpisode {
    pub episode_id: i64,
    pub original_audio_url: String,
    pub audio_path: String,
    pub audio_locale: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub publish_date: DateTime<Utc>,
    pub image_url: String,
    pub program_id: i64,
    pub program_name: String,
    pub transcription: String,
    pub original: EnrichedTexts,
    pub english: EnrichedTexts,
    pub swedish: EnrichedTexts,
    pub speech_path_en: Option<String>,
    pub speech_path_sv: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordCountEpisode {
    pub episode_id: i64,
    pub audio_url: String,
    pub audio_locale: String,
    pub title: String,
    pub url: String,
    pub publish_date: DateTime<Utc>,
    pub program_id: i64,
    pub program_name: String,
    pub transcription: String,
    pub word_count: BTreeMap<String, usize>,
}
