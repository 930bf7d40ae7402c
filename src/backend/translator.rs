use super::text_analytics::language_of;
use super::Translator;
use crate::config::TranslatorConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_VERSION: &str = "3.0";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Text translation REST client (API v3.0).
pub struct TranslatorClient {
    client: reqwest::Client,
    endpoint: String,
    key: String,
    region: Option<String>,
}

impl TranslatorClient {
    pub fn new(config: &TranslatorConfig) -> AppResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            key: config.key.clone(),
            region: config.region.clone().filter(|r| !r.is_empty()),
        })
    }
}

#[derive(Serialize)]
struct TranslationRequest<'a> {
    #[serde(rename = "Text")]
    text: &'a str,
}

#[derive(Deserialize)]
struct TranslationResult {
    #[serde(default)]
    translations: Vec<Translation>,
}

#[derive(Deserialize)]
struct Translation {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl Translator for TranslatorClient {
    async fn translate(&self, texts: &[String], from: &str, to: &str) -> AppResult<Vec<String>> {
        let body: Vec<TranslationRequest<'_>> = texts
            .iter()
            .map(|t| TranslationRequest { text: t })
            .collect();

        let mut request = self
            .client
            .post(format!("{}/translate", self.endpoint))
            .query(&[
                ("api-version", API_VERSION),
                ("from", language_of(from)),
                ("to", language_of(to)),
            ])
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .json(&body);
        if let Some(region) = &self.region {
            request = request.header("Ocp-Apim-Subscription-Region", region);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!(
                "Translator returned {}: {}",
                status, body
            )));
        }

        let results: Vec<TranslationResult> = response.json().await?;
        Ok(results
            .into_iter()
            .map(|r| {
                r.translations
                    .into_iter()
                    .next()
                    .map(|t| t.text)
                    .unwrap_or_default()
            })
            .collect())
    }
}
