//! Worker configuration.
//!
//! Loaded from a YAML file; secrets can be supplied through a `.env` file next
//! to the config or the process environment instead of living in the YAML.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const SPEECH_KEYS_VAR: &str = "RADIOTEXT_SPEECH_KEYS";
pub const TRANSLATOR_KEY_VAR: &str = "RADIOTEXT_TRANSLATOR_KEY";
pub const TEXT_ANALYTICS_KEY_VAR: &str = "RADIOTEXT_TEXT_ANALYTICS_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub media_path: PathBuf,
    pub max_parallelism: usize,
    pub poll_interval_secs: u64,
    /// Program id → number of latest episodes to pick up per run.
    pub programs: BTreeMap<i64, usize>,
    pub default_locale: String,
    /// Program id → audio locale, for programs not broadcast in `default_locale`.
    pub program_locales: BTreeMap<i64, String>,
    pub speech: Vec<SpeechClientConfig>,
    pub translator: TranslatorConfig,
    pub text_analytics: TextAnalyticsConfig,
    pub sverigesradio_base_url: String,
    /// Keyword groups counted per episode. The first word names the group.
    pub word_groups: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechClientConfig {
    pub key: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub region: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    443
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranslatorConfig {
    pub key: String,
    pub endpoint: String,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TextAnalyticsConfig {
    pub key: String,
    pub endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("radio-text");

        Self {
            database_path: data_dir.join("radio_text.db"),
            media_path: data_dir.join("media"),
            max_parallelism: 8,
            poll_interval_secs: 30,
            programs: BTreeMap::from([
                (4540, 15), // Ekot
                (2054, 20), // Radio Sweden English
                (3869, 3),  // Radio Sweden Arabic
                (1646, 3),  // P3 Nyheter
                (185, 3),   // Sisuradio Finnish
            ]),
            default_locale: "sv-SE".to_string(),
            program_locales: BTreeMap::from([
                (2054, "en-US".to_string()),
                (3869, "ar-EG".to_string()),
                (185, "fi-FI".to_string()),
            ]),
            speech: Vec::new(),
            translator: TranslatorConfig {
                key: String::new(),
                endpoint: "https://api.cognitive.microsofttranslator.com".to_string(),
                region: None,
            },
            text_analytics: TextAnalyticsConfig::default(),
            sverigesradio_base_url: crate::backend::sverigesradio::DEFAULT_BASE_URL.to_string(),
            word_groups: default_word_groups(),
        }
    }
}

fn default_word_groups() -> Vec<Vec<String>> {
    let groups: &[&[&str]] = &[
        &["corona"],
        &["covid", "kovid"],
        &["sars"],
        &["pandemi"],
        &["flockimmunitet"],
        &["kris"],
        &["beredskap"],
        &["karantän"],
        &["plana ut"],
        &["peak"],
        &["virus"],
        &["symtom", "symptom"],
        &["folkhälsomyndigheten"],
        &["statsepidemiolog"],
        &["tegnell"],
        &["toalettpapper"],
        &["handsprit"],
        &["bunkra"],
        &["konkurs"],
        &["arbetslös"],
        &["uppsägning"],
        &["varsel", "varsla"],
        &["permittering", "permittera"],
        &["recession"],
        &["depression"],
        &["ras"],
        &["usa"],
        &["kina"],
        &["italien"],
        &["spanien"],
        &["sverige"],
    ];
    groups
        .iter()
        .map(|g| g.iter().map(|w| w.to_string()).collect())
        .collect()
}

impl Config {
    /// Load `path` if it exists (defaults otherwise), then apply secret overrides.
    pub fn load(path: &Path) -> AppResult<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_yaml::from_str::<Config>(&content)?
        } else {
            log::warn!("Config file {:?} not found, using defaults", path);
            Config::default()
        };

        let env_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.apply_env(|key| {
            std::env::var(key)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| load_env_value(env_dir, key))
        });

        Ok(config)
    }

    /// Overrides secrets from `lookup`. Speech keys replace the keys of the
    /// configured clients slot by slot; extra keys add clients that reuse
    /// the first client's host and region.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(keys) = lookup(SPEECH_KEYS_VAR) {
            let keys: Vec<&str> = keys.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
            let template = self.speech.first().cloned();
            for (slot, key) in keys.into_iter().enumerate() {
                match self.speech.get_mut(slot) {
                    Some(client) => client.key = key.to_string(),
                    None => {
                        if let Some(template) = &template {
                            let mut client = template.clone();
                            client.key = key.to_string();
                            self.speech.push(client);
                        }
                    }
                }
            }
        }
        if let Some(key) = lookup(TRANSLATOR_KEY_VAR) {
            self.translator.key = key;
        }
        if let Some(key) = lookup(TEXT_ANALYTICS_KEY_VAR) {
            self.text_analytics.key = key;
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.speech.is_empty() {
            return Err(AppError::Config(
                "at least one speech client must be configured".to_string(),
            ));
        }
        if let Some(slot) = self.speech.iter().position(|c| c.key.trim().is_empty()) {
            return Err(AppError::Config(format!("speech client {} has no key", slot)));
        }
        if self.speech.iter().any(|c| c.hostname.trim().is_empty()) {
            return Err(AppError::Config("speech clients need a hostname".to_string()));
        }
        if self.max_parallelism == 0 {
            return Err(AppError::Config("max_parallelism must be at least 1".to_string()));
        }
        if self.poll_interval_secs == 0 {
            return Err(AppError::Config("poll_interval_secs must be at least 1".to_string()));
        }
        if self.translator.key.is_empty() || self.translator.endpoint.is_empty() {
            return Err(AppError::Config("translator key and endpoint are required".to_string()));
        }
        if self.text_analytics.key.is_empty() || self.text_analytics.endpoint.is_empty() {
            return Err(AppError::Config(
                "text analytics key and endpoint are required".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Load a value from the .env file in `dir` by key name
pub fn load_env_value(dir: &Path, key: &str) -> Option<String> {
    let env_path = dir.join(".env");
    let prefix = format!("{}=", key);
    let content = std::fs::read_to_string(env_path).ok()?;
    content.lines().find_map(|line| {
        let value = line
            .trim()
            .strip_prefix(&prefix)?
            .trim()
            .trim_matches('"')
            .trim_matches('\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}
