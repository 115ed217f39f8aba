//! One YouTube channel as an upload destination.

use crate::config::YouTubeConfig;
use crate::model::{ChannelConfig, UploadTask, UploadedVideo};
use crate::oauth::{self, ClientSecrets, OAuthManager};
use crate::pipeline::VideoHost;
use crate::youtube_api::{TimeBoundAccessToken, VideoInsert, YouTubeClient};
use eyre::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Uploads to one channel with that channel's own OAuth credentials.
///
/// Credentials are loaded on first use, so a channel that is never uploaded to in a run never
/// has its token refreshed.
#[derive(Debug)]
pub struct ChannelUploader {
    channel: ChannelConfig,
    http: reqwest::Client,
    api_key: String,
    max_retries: u32,
    timeout: Duration,
    client: OnceCell<YouTubeClient>,
}

impl ChannelUploader {
    pub fn new(
        channel: ChannelConfig,
        http: reqwest::Client,
        youtube: &YouTubeConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            channel,
            http,
            api_key: youtube.api_key.clone(),
            max_retries: youtube.max_retries,
            timeout,
            client: OnceCell::new(),
        }
    }

    async fn client(&self) -> eyre::Result<&YouTubeClient> {
        self.client
            .get_or_try_init(|| async {
                let secrets = ClientSecrets::from_file(&self.channel.credentials_file)?;
                let manager = OAuthManager::new(secrets)?;
                let token_file = self.channel.token_file();
                let token = oauth::load_token(&token_file).with_context(|| {
                    format!(
                        "channel {} is not authorized; run authorize-channels",
                        self.channel.name
                    )
                })?;
                tracing::debug!(token_file = %token_file.display(), "loaded channel token");
                eyre::Ok(
                    YouTubeClient::new(
                        TimeBoundAccessToken::expired(token),
                        Arc::new(manager),
                        self.http.clone(),
                    )
                    .with_api_key(self.api_key.clone())
                    .with_max_retries(self.max_retries)
                    .with_timeout(self.timeout),
                )
            })
            .await
    }

    /// Writes the possibly refreshed token back so the next run starts from it.
    async fn persist_token(&self, client: &YouTubeClient) {
        let token_file = self.channel.token_file();
        if let Err(e) = oauth::save_token(&token_file, &client.token().await).await {
            tracing::warn!(error = %format!("{e:#}"), "could not save refreshed token");
        }
    }
}

impl VideoHost for ChannelUploader {
    #[instrument(skip(self, task), fields(channel = %self.channel.name, file = %task.file.name))]
    async fn upload(&self, task: &UploadTask) -> eyre::Result<UploadedVideo> {
        let client = self.client().await?;
        let insert = VideoInsert::from_metadata(&task.metadata);
        let mime_type = if task.file.mime_type.is_empty() {
            "video/*"
        } else {
            task.file.mime_type.as_str()
        };

        let result = client.upload_video(&task.path, mime_type, &insert).await;
        self.persist_token(client).await;
        let video = result?;

        if let Some(thumbnail) = &task.metadata.thumbnail {
            match client.set_thumbnail(&video.id, thumbnail).await {
                Ok(()) => tracing::debug!(video = %video.id, "set thumbnail"),
                Err(e) => {
                    tracing::warn!(video = %video.id, error = %format!("{e:#}"), "could not set thumbnail")
                }
            }
        }

        Ok(UploadedVideo::from_id(video.id))
    }
}
