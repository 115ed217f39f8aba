//! Publishes videos from a Google Drive folder to several YouTube channels.
//!
//! One run walks the storage folder, checks each video against the upload log kept in Google
//! Sheets, uploads it to every channel that does not have it yet, appends the outcomes to the log
//! and posts a summary to Telegram.

pub mod channel;
pub mod check;
pub mod config;
pub mod drive;
pub mod error;
pub mod explore;
pub mod google;
pub mod logging;
#[cfg(test)]
mod mock_api;
pub mod model;
pub mod oauth;
pub mod pipeline;
pub mod sheets;
pub mod telegram;
pub mod youtube_api;

pub use config::Config;
pub use error::Error;
pub use pipeline::{Pipeline, RunOptions, RunSummary};

use channel::ChannelUploader;
use drive::DriveClient;
use google::GoogleAuth;
use pipeline::Destination;
use sheets::SheetsLog;
use telegram::TelegramNotifier;

/// The pipeline wired to the real Google and Telegram clients.
pub type UploadPipeline = Pipeline<DriveClient, SheetsLog, ChannelUploader, TelegramNotifier>;

/// Builds the clients described by `config`.
///
/// Credentials that cannot be used are reported as configuration errors.
pub async fn build_pipeline(config: &Config, test_only: bool) -> Result<UploadPipeline, Error> {
    let http = google::http_client().map_err(Error::Configuration)?;
    let service_account = config.service_account_file.as_deref();

    let drive_auth = GoogleAuth::new(&config.drive.api_key, service_account, &[drive::DRIVE_SCOPE])
        .await
        .map_err(Error::Configuration)?;
    let sheets_auth = GoogleAuth::new(
        &config.sheets.api_key,
        service_account,
        &[sheets::SHEETS_SCOPE],
    )
    .await
    .map_err(Error::Configuration)?;
    if !sheets_auth.can_write() {
        tracing::warn!("no service account configured; uploads cannot be written to the log");
    }

    let source = DriveClient::new(
        http.clone(),
        drive_auth,
        config.drive.folder_id.clone(),
        config.drive.max_depth,
        config.request_timeout,
    );
    let log = SheetsLog::new(
        http.clone(),
        sheets_auth,
        config.sheets.spreadsheet_id.clone(),
        config.request_timeout,
    );
    let notifier = TelegramNotifier::new(
        http.clone(),
        &config.telegram.bot_token,
        config.telegram.chat_id.clone(),
        config.request_timeout,
    );
    let destinations = config
        .channels
        .iter()
        .map(|channel| Destination {
            config: channel.clone(),
            host: ChannelUploader::new(
                channel.clone(),
                http.clone(),
                &config.youtube,
                config.request_timeout,
            ),
        })
        .collect();

    let options = RunOptions {
        test_only,
        upload_delay: config.youtube.upload_delay,
        ..RunOptions::default()
    };
    Ok(Pipeline::new(source, log, destinations, notifier, options))
}

/// Checks the notification endpoint, then runs one pass.
///
/// The check only logs what it finds; a broken endpoint shows up again, per task, during the run.
pub async fn run(config: &Config, test_only: bool) -> Result<RunSummary, Error> {
    let pipeline = build_pipeline(config, test_only).await?;
    if let Err(e) = pipeline.notifier().check_connection().await {
        tracing::warn!(error = %format!("{e:#}"), "could not reach Telegram");
    }
    pipeline.run().await
}
