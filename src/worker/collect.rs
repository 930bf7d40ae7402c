use super::runner::PhaseAction;
use crate::backend::EpisodeSource;
use crate::config::Config;
use crate::database::{Database, StoredEpisode};
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

const BACKOFF_DELAYS: [u64; 3] = [2, 8, 30];

/// Collect: fetch episode metadata, download its audio into the media
/// directory and store the episode record.
pub struct CollectAction {
    db: Arc<Database>,
    source: Arc<dyn EpisodeSource>,
    no_redirect: reqwest::Client,
    download: reqwest::Client,
    media_path: PathBuf,
    default_locale: String,
    program_locales: BTreeMap<i64, String>,
}

impl CollectAction {
    pub fn new(db: Arc<Database>, source: Arc<dyn EpisodeSource>, config: &Config) -> AppResult<Self> {
        let no_redirect = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;
        let download = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()?;

        Ok(Self {
            db,
            source,
            no_redirect,
            download,
            media_path: config.media_path.clone(),
            default_locale: config.default_locale.clone(),
            program_locales: config.program_locales.clone(),
        })
    }

    fn locale_for(&self, program_id: i64) -> &str {
        self.program_locales
            .get(&program_id)
            .map(String::as_str)
            .unwrap_or(&self.default_locale)
    }

    /// Follows at most one redirect, so the stored URL points at the file host
    /// rather than the API's tracking link.
    async fn resolve_one_redirect(&self, url: &str) -> AppResult<String> {
        let response = self.no_redirect.get(url).send().await?;
        if !response.status().is_redirection() {
            return Ok(url.to_string());
        }

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok());
        match location {
            Some(location) => {
                let base = reqwest::Url::parse(url)
                    .map_err(|e| AppError::Other(format!("Invalid audio URL {}: {}", url, e)))?;
                let resolved = base
                    .join(location)
                    .map_err(|e| AppError::Other(format!("Invalid redirect {}: {}", location, e)))?;
                Ok(resolved.to_string())
            }
            None => Ok(url.to_string()),
        }
    }

    /// Fetches the audio into `file_path`, retrying after 2s, 8s and 30s.
    /// Returns the number of bytes written.
    async fn download_audio(
        &self,
        url: &str,
        file_path: &Path,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        if let Some(parent) = file_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        for (attempt, delay) in BACKOFF_DELAYS.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.try_download(url, file_path).await {
                Ok(size) => return Ok(size),
                Err(e) => {
                    // A failed attempt may leave a truncated file behind.
                    let _ = tokio::fs::remove_file(file_path).await;

                    if attempt + 1 == BACKOFF_DELAYS.len() {
                        return Err(AppError::Backend(format!(
                            "Giving up on audio after {} attempts: {}",
                            BACKOFF_DELAYS.len(),
                            e
                        )));
                    }
                    log::warn!(
                        "Audio fetch {} of {} failed, next try in {}s: {}",
                        attempt + 1,
                        BACKOFF_DELAYS.len(),
                        delay,
                        e
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        _ = tokio::time::sleep(Duration::from_secs(*delay)) => {}
                    }
                }
            }
        }

        Err(AppError::Backend("Download was never attempted".to_string()))
    }

    /// Streams the response body to disk and checks it against `Content-Length`.
    async fn try_download(&self, url: &str, file_path: &Path) -> AppResult<u64> {
        log::info!("Fetching {} into {}", url, file_path.display());

        let response = self.download.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AppError::Backend(format!(
                "Audio host answered {}",
                response.status()
            )));
        }

        let content_length = response.content_length();
        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(file_path).await?;
        let mut downloaded: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            downloaded += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = content_length {
            if downloaded != expected {
                return Err(AppError::Backend(format!(
                    "Truncated audio: {} of {} bytes",
                    downloaded, expected
                )));
            }
        }

        log::info!("Download complete: {} bytes", downloaded);
        Ok(downloaded)
    }
}

#[async_trait]
impl PhaseAction for CollectAction {
    async fn run(&self, episode_id: i64, cancel: &CancellationToken) -> AppResult<()> {
        if self.db.get_episode(episode_id)?.is_some() {
            log::info!("Episode {} was already collected", episode_id);
            return Ok(());
        }

        let episode = self.source.get_episode(episode_id).await?;
        let file_url = episode
            .file_url()
            .ok_or_else(|| AppError::NotFound(format!("audio file for episode {}", episode_id)))?;

        let audio_url = self.resolve_one_redirect(file_url).await?;
        let extension = extension_of(&audio_url);
        let publish_date = episode.publish_date();
        let relative = audio_file_name(episode.program.id, publish_date, episode_id, &extension);
        let audio_path = self.media_path.join(&relative);

        self.download_audio(&audio_url, &audio_path, cancel).await?;

        let stored = StoredEpisode {
            episode_id,
            program_id: episode.program.id,
            program_name: episode.program.name.clone(),
            title: episode.title.clone(),
            description: episode.description.clone(),
            url: episode.url.clone(),
            image_url: episode.imageurl.clone(),
            publish_date,
            original_audio_url: audio_url,
            audio_path: audio_path.to_string_lossy().to_string(),
            audio_extension: extension,
            audio_locale: self.locale_for(episode.program.id).to_string(),
        };
        self.db.store_episode(&stored)?;

        log::info!("Collected episode {} ({})", episode_id, stored.title);
        Ok(())
    }
}

/// Extension of the file a URL points at, ignoring any query string.
pub fn extension_of(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    match file.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_lowercase(),
        _ => "mp3".to_string(),
    }
}

/// `SR/{program}/SR_{program}__{yyyy-MM-dd}_{HH-mm}__{episode}.{ext}`
pub fn audio_file_name(
    program_id: i64,
    publish_date: DateTime<Utc>,
    episode_id: i64,
    extension: &str,
) -> String {
    format!(
        "SR/{}/SR_{}__{}__{}.{}",
        program_id,
        program_id,
        publish_date.format("%Y-%m-%d_%H-%M"),
        episode_id,
        extension
    )
}
