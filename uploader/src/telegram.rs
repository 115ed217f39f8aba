//! Run notifications through a Telegram bot.

use crate::pipeline::Notifier;
use eyre::Context;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

const API_URL: &str = "https://api.telegram.org";

/// Telegram rejects longer messages.
const MAX_MESSAGE_CHARS: usize = 4096;

/// Envelope of every Bot API response.
///
/// See: <https://core.telegram.org/bots/api#making-requests>
#[derive(Debug, Deserialize)]
struct BotResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BotUser {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

/// Escapes text for `parse_mode=HTML`.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Cuts `text` to at most `max` characters, marking the cut with an ellipsis.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

#[derive(Clone)]
pub struct TelegramNotifier {
    http: reqwest::Client,
    base_url: String,
    chat_id: String,
    attempts: u32,
    retry_delay: Duration,
    timeout: Duration,
}

// The bot token is part of the base URL and must not end up in logs.
impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("chat_id", &self.chat_id)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl TelegramNotifier {
    pub fn new(
        http: reqwest::Client,
        bot_token: &str,
        chat_id: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: format!("{API_URL}/bot{bot_token}"),
            chat_id: chat_id.into(),
            attempts: 3,
            retry_delay: Duration::from_secs(5),
            timeout,
        }
    }

    pub fn with_retries(mut self, attempts: u32, retry_delay: Duration) -> Self {
        self.attempts = attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    async fn parse<T>(response: reqwest::Response, method: &str) -> eyre::Result<T>
    where
        T: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        let body: BotResponse<T> = response
            .json()
            .await
            .with_context(|| format!("parse Telegram {method} response (status {status})"))?;
        if !body.ok {
            eyre::bail!(
                "Telegram {method} failed with status {status}: {}",
                body.description.as_deref().unwrap_or("no description")
            );
        }
        body.result
            .ok_or_else(|| eyre::eyre!("Telegram {method} returned no result"))
    }

    /// Checks that the bot token works.
    #[instrument(skip(self))]
    pub async fn check_connection(&self) -> eyre::Result<BotUser> {
        let response = self
            .http
            .get(format!("{}/getMe", self.base_url))
            .timeout(self.timeout)
            .send()
            .await
            .context("send Telegram getMe request")?;
        let me: BotUser = Self::parse(response, "getMe").await?;
        tracing::info!(
            bot = me.username.as_deref().unwrap_or(&me.first_name),
            "connected to Telegram"
        );
        Ok(me)
    }

    async fn send_once(&self, text: &str) -> eyre::Result<()> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base_url))
            .form(&[
                ("chat_id", self.chat_id.as_str()),
                ("text", text),
                ("parse_mode", "HTML"),
            ])
            .timeout(self.timeout)
            .send()
            .await
            .context("send Telegram sendMessage request")?;
        let _: serde_json::Value = Self::parse(response, "sendMessage").await?;
        Ok(())
    }

    /// Sends `text` to the chat, retrying a few times before giving up.
    ///
    /// Messages go out with `parse_mode=HTML`. `text` is HTML-escaped first, so any markup in
    /// file names or errors shows up literally.
    #[instrument(skip(self, text))]
    pub async fn send_message(&self, text: &str) -> eyre::Result<()> {
        // The limit applies to the text after entities are parsed.
        let text = escape_html(&truncate(text, MAX_MESSAGE_CHARS));
        let mut attempt = 1;
        loop {
            match self.send_once(&text).await {
                Ok(()) => {
                    tracing::debug!(attempt, "notification sent");
                    return Ok(());
                }
                Err(e) if attempt < self.attempts => {
                    tracing::warn!(attempt, error = %format!("{e:#}"), "Telegram send failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("giving up after {attempt} attempts"));
                }
            }
        }
    }
}

impl Notifier for TelegramNotifier {
    async fn notify(&self, text: &str) -> eyre::Result<()> {
        self.send_message(text).await
    }
}
