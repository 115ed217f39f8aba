//! Plumbing shared by the Drive and Sheets clients.
//!
//! Both APIs accept either a plain API key (read-only access to shared resources) or a bearer
//! token minted from a service account. [`GoogleAuth`] hides the difference from the callers.

pub mod service_account;

use eyre::Context;
use service_account::ServiceAccount;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// How requests to a Google API are authorized.
#[derive(Debug, Clone)]
pub enum GoogleAuth {
    /// Read-only access with an API key.
    ApiKey(String),
    /// Full access as a service account.
    ServiceAccount(Arc<ServiceAccount>),
    /// A fixed bearer token.
    #[cfg(test)]
    Token(String),
}

impl GoogleAuth {
    /// Prefers the service account when a key file is configured, and falls back to the API key.
    pub async fn new(
        api_key: &str,
        service_account_file: Option<&Path>,
        scopes: &[&str],
    ) -> eyre::Result<Self> {
        match service_account_file {
            Some(path) => {
                let account = ServiceAccount::from_file(path, scopes).await?;
                tracing::info!(account = account.client_email(), "using service account");
                Ok(GoogleAuth::ServiceAccount(Arc::new(account)))
            }
            None => {
                tracing::info!("using API key");
                Ok(GoogleAuth::ApiKey(api_key.to_string()))
            }
        }
    }

    /// API keys cannot modify resources.
    pub fn can_write(&self) -> bool {
        !matches!(self, GoogleAuth::ApiKey(_))
    }

    /// Attaches credentials to an outgoing request.
    pub async fn authorize(
        &self,
        request: reqwest::RequestBuilder,
    ) -> eyre::Result<reqwest::RequestBuilder> {
        match self {
            GoogleAuth::ApiKey(key) => Ok(request.query(&[("key", key.as_str())])),
            GoogleAuth::ServiceAccount(account) => {
                let token = account
                    .access_token()
                    .await
                    .context("get service account access token")?;
                Ok(request.bearer_auth(token))
            }
            #[cfg(test)]
            GoogleAuth::Token(token) => Ok(request.bearer_auth(token)),
        }
    }
}

/// Builds the HTTP client shared by all API clients.
///
/// Only connecting is bounded here; JSON calls add their own per-request timeout so that large
/// transfers are not cut off.
pub fn http_client() -> eyre::Result<reqwest::Client> {
    reqwest::ClientBuilder::new()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .context("build HTTP client")
}

/// Turns a non-2xx response into an error that carries the response body.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
    what: &str,
) -> eyre::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(eyre::eyre!("{what} failed with status {status}: {body}"))
}
