//! Batch speech-to-text REST client (API v2.0).
//!
//! Submits transcription jobs for publicly reachable recordings, reports job
//! status and downloads the per-channel result documents.

use super::{BatchJobClient, JobDefinition, JobHandle, JobReport, JobState};
use crate::config::SpeechClientConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, LOCATION};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use uuid::Uuid;

const SPEECH_TO_TEXT_BASE_PATH: &str = "api/speechtotext/v2.0";
const OPERATION_LOCATION_HEADER: &str = "Operation-Location";
const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(25 * 60);

pub struct SpeechBatchClient {
    client: reqwest::Client,
    base_url: String,
    label: String,
}

impl SpeechBatchClient {
    pub fn new(config: &SpeechClientConfig, label: impl Into<String>) -> AppResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.key)
            .map_err(|e| AppError::Config(format!("invalid speech key: {}", e)))?;
        headers.insert(SUBSCRIPTION_KEY_HEADER, key);

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: format!(
                "https://{}:{}/{}",
                config.hostname, config.port, SPEECH_TO_TEXT_BASE_PATH
            ),
            label: label.into(),
        })
    }

    fn transcriptions_url(&self) -> String {
        format!("{}/Transcriptions", self.base_url)
    }

    fn transcription_url(&self, job: &JobHandle) -> String {
        format!("{}/Transcriptions/{}", self.base_url, job)
    }
}

#[async_trait]
impl BatchJobClient for SpeechBatchClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn submit_job(&self, definition: &JobDefinition) -> AppResult<JobHandle> {
        let request = TranscriptionDefinition::from(definition);
        let response = self
            .client
            .post(format!("{}/", self.transcriptions_url()))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(describe_failure(status, &body)));
        }

        let location = response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .or_else(|| response.headers().get(LOCATION))
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Backend("transcription submitted without a location".to_string()))?;

        job_handle_from_location(location)
    }

    async fn get_job_status(&self, job: &JobHandle) -> AppResult<JobReport> {
        let response = self.client.get(self.transcription_url(job)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(describe_failure(status, &body)));
        }

        let transcription: Transcription = response.json().await?;
        Ok(transcription.into_report(job.clone()))
    }

    async fn delete_job(&self, job: &JobHandle) -> AppResult<()> {
        let response = self.client.delete(self.transcription_url(job)).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(describe_failure(status, &body)));
        }
        Ok(())
    }

    async fn list_jobs(&self) -> AppResult<Vec<JobHandle>> {
        let response = self.client.get(self.transcriptions_url()).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(describe_failure(status, &body)));
        }

        let transcriptions: Vec<Transcription> = response.json().await?;
        Ok(transcriptions
            .into_iter()
            .map(|t| JobHandle(t.id.to_string()))
            .collect())
    }

    async fn fetch_result(&self, url: &str) -> AppResult<TranscriptionResult> {
        // Result URLs are pre-signed; the subscription header is harmless there.
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Backend(format!(
                "Failed to download transcription result: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }
}

/// The job id is the last path segment of the location the service returns.
pub fn job_handle_from_location(location: &str) -> AppResult<JobHandle> {
    let segment = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default();

    Uuid::parse_str(segment)
        .map(|id| JobHandle(id.to_string()))
        .map_err(|_| AppError::Backend(format!("Unexpected transcription location: {}", location)))
}

fn describe_failure(status: reqwest::StatusCode, body: &str) -> String {
    match status.as_u16() {
        401 => "Not authorized to see the resource.".to_string(),
        403 => "No permission to access this resource.".to_string(),
        404 => "The resource could not be found.".to_string(),
        415 => "The file type isn't supported.".to_string(),
        400 => serde_json::from_str::<BadRequest>(body)
            .ok()
            .map(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| format!("Bad request: {}", status)),
        _ => format!("Speech service returned {}: {}", status, body),
    }
}

#[derive(Debug, Deserialize)]
struct BadRequest {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranscriptionDefinition {
    name: String,
    description: String,
    locale: String,
    recordings_url: String,
    models: Vec<String>,
    properties: HashMap<&'static str, &'static str>,
}

impl From<&JobDefinition> for TranscriptionDefinition {
    fn from(definition: &JobDefinition) -> Self {
        let properties = HashMap::from([
            ("PunctuationMode", "DictatedAndAutomatic"),
            ("ProfanityFilterMode", "None"),
            ("AddWordLevelTimestamps", "True"),
            ("AddSentiment", "False"),
        ]);
        Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            locale: definition.locale.clone(),
            recordings_url: definition.recordings_url.clone(),
            models: Vec::new(),
            properties,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Transcription {
    id: Uuid,
    #[serde(default)]
    status: String,
    #[serde(default)]
    status_message: String,
    #[serde(default)]
    results_urls: BTreeMap<String, String>,
}

impl Transcription {
    fn into_report(self, handle: JobHandle) -> JobReport {
        JobReport {
            handle,
            state: JobState::from(self.status.as_str()),
            status_message: self.status_message,
            results_urls: self.results_urls,
        }
    }
}

/// Result document of one transcribed channel.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TranscriptionResult {
    #[serde(default)]
    pub audio_file_results: Vec<AudioFileResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AudioFileResult {
    #[serde(default)]
    pub audio_file_name: String,
    #[serde(default)]
    pub combined_results: Vec<CombinedResult>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CombinedResult {
    #[serde(default)]
    pub channel_number: String,
    #[serde(default)]
    pub display: String,
}

impl TranscriptionResult {
    /// Display text of the first combined result of the first audio file.
    pub fn combined_display(&self) -> String {
        self.audio_file_results
            .first()
            .and_then(|f| f.combined_results.first())
            .map(|c| c.display.clone())
            .unwrap_or_default()
    }
}
