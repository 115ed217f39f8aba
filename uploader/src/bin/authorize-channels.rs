use clap::Parser;
use drive_youtube_uploader::model::ChannelConfig;
use drive_youtube_uploader::oauth::{self, ClientSecrets, OAuthManager};
use drive_youtube_uploader::youtube_api::{TimeBoundAccessToken, YouTubeClient};
use drive_youtube_uploader::{config, google, logging};
use eyre::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Instrument;

const OAUTH_DONE: &str = include_str!("../../oauth_success.html");

/// Authorize the uploader to publish to each configured YouTube channel.
///
/// Opens the Google consent page once per channel; sign in as that channel's owner.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// Only authorize the channel with this name or handle.
    #[arg(long)]
    channel: Option<String>,

    /// Go through consent again even if a working token is already stored.
    #[arg(long)]
    force: bool,

    /// Read environment variables from this file instead of `./.env`.
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,
}

/// Whether the account the token belongs to looks like the configured channel.
fn same_channel(configured: &ChannelConfig, title: &str, custom_url: Option<&str>) -> bool {
    configured.matches(title)
        || custom_url.is_some_and(|url| {
            url.trim_start_matches('@')
                .eq_ignore_ascii_case(&configured.handle)
        })
}

async fn authorize(
    channel: &ChannelConfig,
    http: &reqwest::Client,
    api_key: Option<&str>,
    force: bool,
) -> eyre::Result<()> {
    if !channel.credentials_file.exists() {
        tokio::fs::write(&channel.credentials_file, oauth::placeholder(channel))
            .await
            .with_context(|| format!("write {}", channel.credentials_file.display()))?;
        eyre::bail!(
            "no OAuth client secret yet; wrote setup instructions to {}",
            channel.credentials_file.display()
        );
    }
    let secrets = ClientSecrets::from_file(&channel.credentials_file)?;
    let manager = Arc::new(OAuthManager::new(secrets)?.with_done_page(OAUTH_DONE));
    let token_file = channel.token_file();

    let mut stored = None;
    if !force && token_file.exists() {
        let mut token = TimeBoundAccessToken::expired(oauth::load_token(&token_file)?);
        if token.refresh(&manager).await? {
            tracing::info!("stored token still works");
            stored = Some(token);
        } else {
            tracing::warn!("stored token was rejected, authorizing again");
        }
    }
    let token = match stored {
        Some(token) => token,
        None => {
            println!(
                "Sign in as the owner of {} (@{}) in the browser window that opens.",
                channel.name, channel.handle
            );
            let raw = manager
                .authenticate(&[oauth::UPLOAD_SCOPE, oauth::READONLY_SCOPE])
                .await
                .context("authorize channel")?;
            TimeBoundAccessToken::new(raw)
        }
    };
    oauth::save_token(&token_file, token.raw_token()).await?;

    let mut client = YouTubeClient::new(token, manager, http.clone());
    if let Some(key) = api_key {
        client = client.with_api_key(key);
    }
    match client.my_channel().await {
        Ok(Some(found)) => {
            let custom_url = found.snippet.custom_url.as_deref();
            if same_channel(channel, &found.snippet.title, custom_url) {
                println!("✅ {}: authorized", channel.name);
            } else {
                println!(
                    "⚠️ {}: authorized, but the account's channel is {:?} ({})",
                    channel.name,
                    found.snippet.title,
                    custom_url.unwrap_or("no handle")
                );
            }
        }
        Ok(None) => println!("⚠️ {}: authorized, but the account has no channel", channel.name),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "could not look up the authorized channel");
            println!("✅ {}: authorized", channel.name);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = Cli::parse();
    logging::init(None)?;

    config::load_env(cli.env_file.as_deref())?;
    let channels = config::channels_from_env()?;
    let api_key = std::env::var("YOUTUBE_API_KEY")
        .ok()
        .filter(|k| !k.trim().is_empty());
    let http = google::http_client()?;

    let selected: Vec<_> = channels
        .iter()
        .filter(|ch| cli.channel.as_deref().is_none_or(|wanted| ch.matches(wanted)))
        .collect();
    if selected.is_empty() {
        eyre::bail!("no configured channel matches {:?}", cli.channel.unwrap_or_default());
    }

    let mut failed = 0;
    for channel in selected {
        let span = tracing::info_span!("channel", name = %channel.name);
        let result = authorize(channel, &http, api_key.as_deref(), cli.force)
            .instrument(span)
            .await;
        if let Err(e) = result {
            tracing::error!(error = %format!("{e:#}"), "channel not authorized");
            println!("❌ {}: {e:#}", channel.name);
            failed += 1;
        }
    }
    if failed > 0 {
        eyre::bail!("{failed} channel(s) could not be authorized");
    }
    Ok(())
}
