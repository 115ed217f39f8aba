//! Run configuration.
//!
//! All credentials and target identifiers are read once, from the process environment (optionally
//! seeded from a `.env` file), into a [`Config`] that is handed to each client at construction.
//! Upload destinations come from a separate TOML file listing the channels.

use crate::model::ChannelConfig;
use eyre::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_SERVICE_ACCOUNT_FILE: &str = "credentials.json";
const DEFAULT_CHANNELS_FILE: &str = "channels.toml";
const DEFAULT_LOG_FILE: &str = "upload_logs.log";

#[derive(Debug, Clone)]
pub struct Config {
    pub drive: DriveConfig,
    pub youtube: YouTubeConfig,
    pub sheets: SheetsConfig,
    pub telegram: TelegramConfig,
    /// Service-account key file used for Drive and Sheets when present.
    pub service_account_file: Option<PathBuf>,
    pub channels: Vec<ChannelConfig>,
    /// Plain-text run log, separate from the spreadsheet.
    pub log_file: PathBuf,
    /// Timeout for JSON API calls. Byte transfers are not bounded by it.
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DriveConfig {
    pub api_key: String,
    pub folder_id: String,
    /// How many folder levels below `folder_id` to search for videos.
    pub max_depth: usize,
}

#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    /// Pause between consecutive channel uploads.
    pub upload_delay: Duration,
    /// Retries of a failed byte transfer before the upload is given up.
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_key: String,
    pub spreadsheet_id: String,
}

#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsFile {
    #[serde(rename = "channel", default)]
    channels: Vec<ChannelConfig>,
}

impl Config {
    /// Loads the configuration from the process environment.
    ///
    /// If `env_file` is given it must exist; otherwise a `.env` in the working directory is used
    /// when there is one. Variables already set in the environment take precedence.
    pub fn load(env_file: Option<&Path>) -> eyre::Result<Self> {
        load_env(env_file)?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let drive = vars.drive()?;
        let youtube = YouTubeConfig {
            api_key: vars.required("YOUTUBE_API_KEY")?,
            upload_delay: Duration::from_secs(vars.parse_or("UPLOAD_DELAY_SECS", 5)?),
            max_retries: vars.parse_or("UPLOAD_MAX_RETRIES", 3)?,
        };
        let sheets = SheetsConfig {
            api_key: vars.required("GOOGLE_SHEETS_API_KEY")?,
            spreadsheet_id: vars.required("SPREADSHEET_ID")?,
        };
        let telegram = TelegramConfig {
            bot_token: vars.required("TELEGRAM_BOT_TOKEN")?,
            chat_id: vars.required("TELEGRAM_CHAT_ID")?,
        };
        let service_account_file = vars.service_account_file()?;
        let channels = read_channels(&channels_file(vars.get("CHANNELS_FILE")))?;

        Ok(Self {
            drive,
            youtube,
            sheets,
            telegram,
            service_account_file,
            channels,
            log_file: PathBuf::from(
                vars.get("UPLOAD_LOG_FILE")
                    .unwrap_or_else(|| DEFAULT_LOG_FILE.into()),
            ),
            request_timeout: vars.request_timeout()?,
        })
    }
}

/// Drive access alone, for looking around a Drive without the rest of the setup.
#[derive(Debug, Clone)]
pub struct DriveAccess {
    pub drive: DriveConfig,
    pub service_account_file: Option<PathBuf>,
    pub request_timeout: Duration,
}

impl DriveAccess {
    pub fn load(env_file: Option<&Path>) -> eyre::Result<Self> {
        load_env(env_file)?;
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> eyre::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);
        Ok(Self {
            drive: vars.drive()?,
            service_account_file: vars.service_account_file()?,
            request_timeout: vars.request_timeout()?,
        })
    }
}

/// Environment lookups with blank values treated as unset.
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// A value that must be set, and not left at the `your_...` example from the template.
    fn required(&self, key: &str) -> eyre::Result<String> {
        let value = self
            .get(key)
            .ok_or_else(|| eyre::eyre!("{key} is not set"))?;
        eyre::ensure!(
            !value.trim().starts_with("your_"),
            "{key} still holds the example value {value:?}"
        );
        Ok(value)
    }

    fn parse_or<T>(&self, key: &str, default: T) -> eyre::Result<T>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        match self.get(key) {
            Some(v) => v.trim().parse().with_context(|| format!("parse {key}={v:?}")),
            None => Ok(default),
        }
    }

    fn drive(&self) -> eyre::Result<DriveConfig> {
        Ok(DriveConfig {
            api_key: self.required("GOOGLE_DRIVE_API_KEY")?,
            folder_id: self
                .get("DRIVE_FOLDER_ID")
                .unwrap_or_else(|| "root".to_string()),
            max_depth: self.parse_or("DRIVE_MAX_DEPTH", 2)?,
        })
    }

    /// `GOOGLE_SERVICE_ACCOUNT_FILE` if set (it must exist), else `credentials.json` if present.
    fn service_account_file(&self) -> eyre::Result<Option<PathBuf>> {
        match self.get("GOOGLE_SERVICE_ACCOUNT_FILE") {
            Some(path) => {
                let path = PathBuf::from(path);
                eyre::ensure!(
                    path.exists(),
                    "GOOGLE_SERVICE_ACCOUNT_FILE points to missing file {}",
                    path.display()
                );
                Ok(Some(path))
            }
            None => Ok(Some(PathBuf::from(DEFAULT_SERVICE_ACCOUNT_FILE)).filter(|p| p.exists())),
        }
    }

    fn request_timeout(&self) -> eyre::Result<Duration> {
        Ok(Duration::from_secs(
            self.parse_or("REQUEST_TIMEOUT_SECS", 60)?,
        ))
    }
}

/// Seeds the process environment from `env_file`, or from `./.env` if there is one.
pub fn load_env(env_file: Option<&Path>) -> eyre::Result<()> {
    match env_file {
        Some(path) => {
            dotenv::from_path(path)
                .with_context(|| format!("load environment file {}", path.display()))?;
        }
        None => {
            if let Err(e) = dotenv::dotenv() {
                if !e.not_found() {
                    return Err(e).context("load .env");
                }
            }
        }
    }
    Ok(())
}

fn channels_file(configured: Option<String>) -> PathBuf {
    PathBuf::from(configured.unwrap_or_else(|| DEFAULT_CHANNELS_FILE.into()))
}

/// The channel list alone, for tools that need nothing else from the configuration.
pub fn channels_from_env() -> eyre::Result<Vec<ChannelConfig>> {
    let configured = std::env::var("CHANNELS_FILE")
        .ok()
        .filter(|v| !v.trim().is_empty());
    read_channels(&channels_file(configured))
}

fn read_channels(path: &Path) -> eyre::Result<Vec<ChannelConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read channels file {}", path.display()))?;
    parse_channels(&raw, path.parent())
}

/// Parses a channels file.
///
/// Relative credential paths are resolved against `base`, the directory holding the file.
pub fn parse_channels(raw: &str, base: Option<&Path>) -> eyre::Result<Vec<ChannelConfig>> {
    let file: ChannelsFile = toml::from_str(raw).context("parse channels file")?;
    let mut channels = file.channels;
    eyre::ensure!(!channels.is_empty(), "no channels configured");

    for ch in &mut channels {
        eyre::ensure!(!ch.name.trim().is_empty(), "channel without a name");
        ch.handle = ch.handle.trim_start_matches('@').to_string();
        if let Some(base) = base.filter(|b| !b.as_os_str().is_empty()) {
            if ch.credentials_file.is_relative() {
                ch.credentials_file = base.join(&ch.credentials_file);
            }
        }
    }

    let first_dup = channels
        .iter()
        .enumerate()
        .find_map(|(i, ch)| channels[..i].iter().find(|c| c.name == ch.name));
    if let Some(dup) = first_dup {
        eyre::bail!("channel {:?} is configured twice", dup.name);
    }

    Ok(channels)
}
