use super::SpeechSynthesizer;
use crate::config::SpeechClientConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use std::time::Duration;

const OUTPUT_FORMAT: &str = "audio-24khz-160kbitrate-mono-mp3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Text-to-speech REST client for one regional speech resource.
pub struct SynthesisClient {
    client: reqwest::Client,
    url: String,
    key: String,
}

impl SynthesisClient {
    pub fn new(config: &SpeechClientConfig) -> AppResult<Self> {
        if config.region.is_empty() {
            return Err(AppError::Config(
                "speech synthesis requires a region".to_string(),
            ));
        }
        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            url: format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                config.region
            ),
            key: config.key.clone(),
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for SynthesisClient {
    async fn synthesize(&self, text: &str, locale: &str, voice: &str) -> AppResult<Option<Vec<u8>>> {
        let response = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", "radio-text")
            .body(ssml(text, locale, voice))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::BAD_REQUEST {
            // Expected for some texts (too long, unsupported characters)
            let body = response.text().await.unwrap_or_default();
            log::error!("Speech synthesis refused text for {}: {}", voice, body);
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Backend(format!(
                "Speech synthesis returned {}: {}",
                status, body
            )));
        }

        Ok(Some(response.bytes().await?.to_vec()))
    }
}

fn ssml(text: &str, locale: &str, voice: &str) -> String {
    format!(
        "<speak version='1.0' xml:lang='{}'><voice xml:lang='{}' name='{}'>{}</voice></speak>",
        locale,
        locale,
        voice,
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
