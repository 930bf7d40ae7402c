use super::{TextAnalysis, TextAnalyzer};
use crate::config::TextAnalyticsConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const BASE_PATH: &str = "text/analytics/v3.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Key phrase, sentiment and entity extraction REST client (API v3.0).
pub struct TextAnalyticsClient {
    client: reqwest::Client,
    endpoint: String,
    key: String,
}

impl TextAnalyticsClient {
    pub fn new(config: &TextAnalyticsConfig) -> AppResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
        })
    }

    async fn call<T: DeserializeOwned>(&self, operation: &str, text: &str, language: &str) -> AppResult<T> {
        let request = DocumentsRequest {
            documents: vec![Document {
                id: "1",
                language,
                text,
            }],
        };

        let response = self
            .client
            .post(format!("{}/{}/{}", self.endpoint, BASE_PATH, operation))
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!(
                "Text analytics {} returned {}: {}",
                operation, status, body
            )));
        }

        Ok(response.json().await?)
    }
}

/// Text analytics wants a bare language code ("sv"), not a locale ("sv-SE").
pub fn language_of(locale: &str) -> &str {
    locale.split('-').next().unwrap_or(locale)
}

#[derive(Serialize)]
struct DocumentsRequest<'a> {
    documents: Vec<Document<'a>>,
}

#[derive(Serialize)]
struct Document<'a> {
    id: &'a str,
    language: &'a str,
    text: &'a str,
}

#[derive(Deserialize)]
struct DocumentsResponse<T> {
    #[serde(default = "Vec::new")]
    documents: Vec<T>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyPhrasesDocument {
    #[serde(default)]
    key_phrases: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentimentDocument {
    confidence_scores: ConfidenceScores,
}

#[derive(Deserialize)]
struct ConfidenceScores {
    positive: f64,
}

#[derive(Deserialize)]
struct EntitiesDocument {
    #[serde(default)]
    entities: Vec<Entity>,
}

#[derive(Deserialize)]
struct Entity {
    text: String,
}

#[async_trait]
impl TextAnalyzer for TextAnalyticsClient {
    async fn analyze(&self, text: &str, language: &str) -> AppResult<TextAnalysis> {
        if text.trim().is_empty() {
            return Ok(TextAnalysis::default());
        }
        let language = language_of(language);

        let key_phrases: DocumentsResponse<KeyPhrasesDocument> =
            self.call("keyPhrases", text, language).await?;
        let sentiment: DocumentsResponse<SentimentDocument> =
            self.call("sentiment", text, language).await?;
        let entities: DocumentsResponse<EntitiesDocument> =
            self.call("entities/recognition/general", text, language).await?;

        let mut entity_names: Vec<String> = entities
            .documents
            .into_iter()
            .flat_map(|d| d.entities.into_iter().map(|e| e.text))
            .collect();
        entity_names.dedup();

        Ok(TextAnalysis {
            key_phrases: key_phrases
                .documents
                .into_iter()
                .flat_map(|d| d.key_phrases)
                .collect(),
            entities: entity_names,
            sentiment: sentiment
                .documents
                .first()
                .map(|d| d.confidence_scores.positive),
        })
    }
}
