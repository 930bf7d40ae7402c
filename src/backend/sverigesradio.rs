//! Sveriges Radio open API client: episode listing and episode details.

use super::{EpisodeLister, EpisodeSource};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.sr.se/api/v2";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct SverigesRadioClient {
    client: reqwest::Client,
    base_url: String,
}

impl SverigesRadioClient {
    pub fn new(base_url: &str) -> AppResult<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrEpisode {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub imageurl: String,
    #[serde(default)]
    pub publishdateutc: String,
    pub program: SrProgram,
    #[serde(default)]
    pub broadcast: Option<SrBroadcast>,
    #[serde(default)]
    pub downloadpodfile: Option<SrFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrProgram {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrBroadcast {
    #[serde(default)]
    pub broadcastfiles: Vec<SrFile>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SrFile {
    pub url: String,
}

impl SrEpisode {
    /// Broadcast file first, falling back to the podcast file.
    pub fn file_url(&self) -> Option<&str> {
        self.broadcast
            .as_ref()
            .and_then(|b| b.broadcastfiles.first())
            .or(self.downloadpodfile.as_ref())
            .map(|f| f.url.as_str())
    }

    pub fn publish_date(&self) -> DateTime<Utc> {
        parse_sr_date(&self.publishdateutc).unwrap_or_else(Utc::now)
    }
}

/// Parses the API's `/Date(1584367200000)/` timestamps.
pub fn parse_sr_date(value: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = value
        .trim()
        .strip_prefix("/Date(")?
        .strip_suffix(")/")?
        .parse()
        .ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Deserialize)]
struct EpisodeListResponse {
    #[serde(default)]
    episodes: Vec<EpisodeId>,
}

#[derive(Deserialize)]
struct EpisodeId {
    id: i64,
}

#[derive(Deserialize)]
struct EpisodeResponse {
    episode: SrEpisode,
}

#[async_trait]
impl EpisodeLister for SverigesRadioClient {
    async fn list_episode_ids(&self, program_id: i64, count: usize) -> AppResult<Vec<i64>> {
        let response = self
            .client
            .get(format!("{}/episodes/index", self.base_url))
            .query(&[
                ("programid", program_id.to_string()),
                ("size", count.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Backend(format!(
                "Listing episodes for program {} returned {}",
                program_id,
                response.status()
            )));
        }

        let list: EpisodeListResponse = response.json().await?;
        Ok(list.episodes.into_iter().take(count).map(|e| e.id).collect())
    }
}

#[async_trait]
impl EpisodeSource for SverigesRadioClient {
    async fn get_episode(&self, episode_id: i64) -> AppResult<SrEpisode> {
        let response = self
            .client
            .get(format!("{}/episodes/get", self.base_url))
            .query(&[
                ("id", episode_id.to_string()),
                ("audioquality", "hi".to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::NotFound(format!("episode {}", episode_id)));
        }
        if !response.status().is_success() {
            return Err(AppError::Backend(format!(
                "Fetching episode {} returned {}",
                episode_id,
                response.status()
            )));
        }

        let body: EpisodeResponse = response.json().await?;
        Ok(body.episode)
    }
}
