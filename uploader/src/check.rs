//! A readiness report over a loaded [`Config`], touching each service once without uploading.

use crate::config::Config;
use crate::drive::{self, DriveClient};
use crate::google::{self, GoogleAuth, service_account::ServiceAccount};
use crate::model::ChannelConfig;
use crate::oauth::{self, ClientSecrets};
use crate::telegram::TelegramNotifier;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Ready(String),
    /// Usable, with something the operator should know about.
    Warning(String),
    Broken(String),
}

impl Status {
    pub fn is_broken(&self) -> bool {
        matches!(self, Status::Broken(_))
    }
}

#[derive(Debug, Clone)]
pub struct CheckItem {
    pub name: String,
    pub status: Status,
}

impl fmt::Display for CheckItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            Status::Ready(detail) => write!(f, "✅ {}: {detail}", self.name),
            Status::Warning(detail) => write!(f, "⚠️ {}: {detail}", self.name),
            Status::Broken(detail) => write!(f, "❌ {}: {detail}", self.name),
        }
    }
}

/// Whether a channel's client secret and stored token are in place.
pub fn channel_status(channel: &ChannelConfig) -> Status {
    let path = &channel.credentials_file;
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return Status::Broken(format!("no client secret at {}", path.display())),
    };
    if oauth::is_placeholder(&raw) {
        return Status::Broken(format!("{} is still the placeholder", path.display()));
    }
    if let Err(e) = ClientSecrets::parse(&raw) {
        return Status::Broken(format!("{}: {e:#}", path.display()));
    }
    let token_file = channel.token_file();
    if !token_file.exists() {
        return Status::Warning("not authorized yet; run authorize-channels".to_string());
    }
    match oauth::load_token(&token_file) {
        Ok(_) => Status::Ready("authorized".to_string()),
        Err(e) => Status::Broken(format!("{e:#}")),
    }
}

async fn service_account_status(config: &Config) -> Status {
    let Some(path) = config.service_account_file.as_deref() else {
        return Status::Warning("none configured; uploads cannot be written to the log".to_string());
    };
    let account = match ServiceAccount::from_file(path, &[drive::DRIVE_SCOPE]).await {
        Ok(account) => account,
        Err(e) => return Status::Broken(format!("{e:#}")),
    };
    match account.access_token().await {
        Ok(_) => Status::Ready(account.client_email().to_string()),
        Err(e) => Status::Broken(format!("{}: {e:#}", account.client_email())),
    }
}

async fn drive_status(config: &Config, http: &reqwest::Client) -> Status {
    let auth = match GoogleAuth::new(
        &config.drive.api_key,
        config.service_account_file.as_deref(),
        &[drive::DRIVE_SCOPE],
    )
    .await
    {
        Ok(auth) => auth,
        Err(e) => return Status::Broken(format!("{e:#}")),
    };
    let client = DriveClient::new(
        http.clone(),
        auth,
        config.drive.folder_id.clone(),
        config.drive.max_depth,
        config.request_timeout,
    );
    match client.get(client.folder_id()).await {
        Ok(folder) if folder.is_folder() => Status::Ready(format!("storage folder {:?}", folder.name)),
        Ok(file) => Status::Broken(format!("{:?} is not a folder", file.name)),
        Err(e) => Status::Broken(format!("{e:#}")),
    }
}

async fn telegram_status(config: &Config, http: &reqwest::Client) -> Status {
    let notifier = TelegramNotifier::new(
        http.clone(),
        &config.telegram.bot_token,
        config.telegram.chat_id.clone(),
        config.request_timeout,
    );
    match notifier.check_connection().await {
        Ok(bot) => Status::Ready(format!(
            "bot {}",
            bot.username.map(|u| format!("@{u}")).unwrap_or(bot.first_name)
        )),
        Err(e) => Status::Broken(format!("{e:#}")),
    }
}

/// Checks every service the uploader depends on, in the order a run touches them.
pub async fn check(config: &Config) -> eyre::Result<Vec<CheckItem>> {
    let http = google::http_client()?;
    let mut items = vec![
        CheckItem {
            name: "Service account".to_string(),
            status: service_account_status(config).await,
        },
        CheckItem {
            name: "Google Drive".to_string(),
            status: drive_status(config, &http).await,
        },
        CheckItem {
            name: "Telegram".to_string(),
            status: telegram_status(config, &http).await,
        },
    ];
    for channel in &config.channels {
        items.push(CheckItem {
            name: format!("{} (@{})", channel.name, channel.handle),
            status: channel_status(channel),
        });
    }
    Ok(items)
}
