//! OAuth 2.0 for the per-channel YouTube credentials.
//!
//! Each channel has its own Google "installed app" client secret. [`OAuthManager`] runs the
//! one-time browser consent flow for it and refreshes the resulting tokens on later runs.

use crate::model::ChannelConfig;
use eyre::Context;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode, body};
use oauth2::basic::{BasicClient, BasicErrorResponseType, BasicTokenResponse};
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, PkceCodeChallenge,
    RedirectUrl, RequestTokenError, RevocationUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use std::future::Future;
use std::path::Path;

/// Lets the application upload videos, and nothing else.
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";

/// Needed to look up which channel a token belongs to.
pub const READONLY_SCOPE: &str = "https://www.googleapis.com/auth/youtube.readonly";

const REVOCATION_URL: &str = "https://oauth2.googleapis.com/revoke";

const DEFAULT_DONE_PAGE: &str = "Authorization complete. You can close this window.";

fn default_auth_uri() -> String {
    "https://accounts.google.com/o/oauth2/auth".to_string()
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

/// The OAuth client a channel's uploads are authorized through.
#[derive(Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

impl std::fmt::Debug for ClientSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSecrets")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// A client-secret file as downloaded from the Google Cloud Console.
#[derive(Debug, Deserialize)]
struct ClientSecretFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    pub fn parse(raw: &str) -> eyre::Result<Self> {
        if is_placeholder(raw) {
            eyre::bail!("credentials are a placeholder; replace the file with a real client secret");
        }
        let file: ClientSecretFile =
            serde_json::from_str(raw).context("parse OAuth client secret")?;
        file.installed
            .or(file.web)
            .ok_or_else(|| eyre::eyre!("client secret has neither an 'installed' nor a 'web' section"))
    }

    pub fn from_file(path: &Path) -> eyre::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read OAuth client secret {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("load {}", path.display()))
    }
}

/// Reads a token saved by [`save_token`].
pub fn load_token(path: &Path) -> eyre::Result<BasicTokenResponse> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read OAuth token {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parse OAuth token {}", path.display()))
}

pub async fn save_token(path: &Path, token: &BasicTokenResponse) -> eyre::Result<()> {
    let json = serde_json::to_string_pretty(token).context("serialize OAuth token")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("write OAuth token {}", path.display()))
}

/// Whether a credentials file is still the placeholder written by [`placeholder`].
pub fn is_placeholder(raw: &str) -> bool {
    raw.trim_start().starts_with('#')
}

/// Contents written in place of a channel's missing client secret, explaining how to get one.
pub fn placeholder(channel: &ChannelConfig) -> String {
    let file = channel
        .credentials_file
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!(
        "# Placeholder for YouTube OAuth credentials\n\
         # Channel: {} (@{})\n\
         #\n\
         # To upload videos to this channel, replace this file with OAuth credentials\n\
         # from the Google Cloud Console:\n\
         #\n\
         # 1. Go to https://console.cloud.google.com/\n\
         # 2. Create a new project or select an existing one\n\
         # 3. Enable the YouTube Data API v3\n\
         # 4. Create OAuth credentials (application type: Desktop app)\n\
         # 5. Download the credentials as {file} and replace this file\n\
         # 6. Run `authorize-channels` and sign in as the channel owner\n",
        channel.name, channel.handle,
    )
}

/// Runs OAuth flows for one client secret.
#[derive(Debug, Clone)]
pub struct OAuthManager {
    secrets: ClientSecrets,
    oauth_done_html: &'static str,
    http: reqwest::Client,
}

impl OAuthManager {
    pub fn new(secrets: ClientSecrets) -> eyre::Result<Self> {
        let http = reqwest::ClientBuilder::new()
            // SSRF no thank you.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build OAuth HTTP client")?;
        Ok(Self {
            secrets,
            oauth_done_html: DEFAULT_DONE_PAGE,
            http,
        })
    }

    /// Sets the page shown in the browser once consent has been given.
    pub fn with_done_page(mut self, html: &'static str) -> Self {
        self.oauth_done_html = html;
        self
    }

    fn token_url(&self) -> eyre::Result<TokenUrl> {
        TokenUrl::new(self.secrets.token_uri.clone()).context("invalid token endpoint URL")
    }

    /// Walks the user through the consent page in their browser and returns the granted token.
    ///
    /// Google only hands out a refresh token when consent is explicitly prompted for offline
    /// access, so both are requested.
    pub async fn authenticate(&self, scopes: &[&str]) -> eyre::Result<BasicTokenResponse> {
        let csrf = CsrfToken::new_random();
        let (redirect_url, eventually_authorization_code) = self
            .setup_redirect(csrf.clone())
            .await
            .context("set up redirect endpoint")?;

        let client = BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_auth_uri(
                AuthUrl::new(self.secrets.auth_uri.clone())
                    .context("invalid authorization endpoint URL")?,
            )
            .set_token_uri(self.token_url()?)
            .set_redirect_uri(redirect_url)
            .set_revocation_url(
                RevocationUrl::new(REVOCATION_URL.to_string())
                    .context("invalid revocation endpoint URL")?,
            );

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, _csrf_token) = client
            // We never re-use the CSRF since we only go through the flow exactly once.
            .authorize_url(move || csrf.clone())
            .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        tracing::info!(url = %auth_url, "asking user to follow OAuth flow");
        if let Err(e) = webbrowser::open(auth_url.as_ref()) {
            tracing::warn!(error = %e, "could not open a browser; open the URL above manually");
        }
        let authorization_code = eventually_authorization_code
            .await
            .context("await user authorization code")?;

        let token = client
            .exchange_code(authorization_code)
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .context("exchange authorization code with access token")?;
        if token.refresh_token().is_none() {
            tracing::warn!("no refresh token was granted; the channel will need re-authorizing");
        }
        Ok(token)
    }

    /// Exchanges the refresh token in `token` for a fresh access token.
    ///
    /// Returns `Ok(None)` when there is no refresh token or Google no longer accepts it; the
    /// channel then has to go through [`Self::authenticate`] again.
    pub async fn refresh_token(
        &self,
        token: &BasicTokenResponse,
    ) -> eyre::Result<Option<BasicTokenResponse>> {
        let Some(refresh_token) = token.refresh_token() else {
            tracing::warn!("no refresh token available, cannot refresh");
            return Ok(None);
        };

        tracing::debug!("attempting to refresh OAuth token");
        let client = BasicClient::new(ClientId::new(self.secrets.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.secrets.client_secret.clone()))
            .set_token_uri(self.token_url()?);

        match client
            .exchange_refresh_token(refresh_token)
            .request_async(&self.http)
            .await
        {
            Ok(new_token) => {
                tracing::debug!("successfully refreshed OAuth token");
                Ok(Some(new_token))
            }
            Err(ref e @ RequestTokenError::ServerResponse(ref sr))
                if matches!(sr.error(), BasicErrorResponseType::InvalidGrant) =>
            {
                tracing::warn!("OAuth refresh token considered invalid grant: {}", e);
                Ok(None)
            }
            Err(e) => Err(e).context("exchange refresh token"),
        }
    }

    /// Starts a one-shot HTTP server on a random local port for Google to redirect back to.
    ///
    /// Returns the redirect URL and a future that resolves to the authorization code once a
    /// request with the right `state` arrives.
    async fn setup_redirect(
        &self,
        csrf: CsrfToken,
    ) -> eyre::Result<(
        RedirectUrl,
        impl Future<Output = eyre::Result<AuthorizationCode>>,
    )> {
        let socket = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("bind to localhost")?;
        let addr = socket.local_addr().context("get local address")?;
        let url = RedirectUrl::new(format!("http://{}:{}", addr.ip(), addr.port()))
            .context("construct redirect url")?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let oauth_done = self.oauth_done_html;
        tokio::spawn(async move {
            let r = async move {
                let (got, mut gotten) = tokio::sync::mpsc::channel(1);
                // Browsers like to ask for /favicon.ico first, so keep accepting until we get
                // the code.
                loop {
                    let (conn, _) = socket.accept().await.context("accept")?;
                    let conn = hyper_util::rt::TokioIo::new(conn);
                    let csrf = csrf.clone();
                    let got = got.clone();
                    let service = service_fn(move |req: Request<body::Incoming>| {
                        let csrf = csrf.clone();
                        let got = got.clone();
                        async move {
                            let code = callback_code(req.uri().query().unwrap_or(""), &csrf);
                            let response = match code {
                                Ok(code) => {
                                    let _ = got.send(code).await;
                                    Response::new(Full::<Bytes>::from(oauth_done))
                                }
                                Err(reason) => {
                                    let mut response = Response::new(Full::<Bytes>::from(reason));
                                    *response.status_mut() = StatusCode::BAD_REQUEST;
                                    response
                                }
                            };
                            Ok::<_, std::convert::Infallible>(response)
                        }
                    });
                    let mut serve = std::pin::pin!(
                        hyper::server::conn::http1::Builder::new()
                            .keep_alive(false)
                            .serve_connection(conn, service)
                    );

                    tokio::select! {
                        exit = &mut serve => {
                            if let Err(e) = exit {
                                tracing::debug!(error = %e, "redirect connection failed");
                            }
                        }
                        code = gotten.recv() => {
                            serve.as_mut().graceful_shutdown();
                            let _ = serve.await;
                            return code.ok_or_else(|| eyre::eyre!("redirect server stopped"));
                        }
                    }
                    // The connection may finish before the select notices the code.
                    if let Ok(code) = gotten.try_recv() {
                        return Ok(code);
                    }
                }
            };
            let _ = tx.send(r.await);
        });
        Ok((url, async move {
            rx.await.context("redirect future dropped prematurely")?
        }))
    }
}

/// Pulls the authorization code out of the redirect's query string, checking `state` first.
fn callback_code(query: &str, csrf: &CsrfToken) -> Result<AuthorizationCode, &'static str> {
    let mut presented_state = None;
    let mut presented_code = None;
    let mut presented_error = None;
    for (k, v) in form_urlencoded::parse(query.as_bytes()) {
        match &*k {
            "state" => presented_state = Some(v),
            "code" => presented_code = Some(v),
            "error" => presented_error = Some(v),
            _ => {}
        }
    }
    if presented_state.as_deref() != Some(csrf.secret().as_str()) {
        return Err("invalid csrf token");
    }
    if presented_error.is_some() {
        return Err("authorization was denied");
    }
    let Some(code) = presented_code else {
        return Err("no authorization code found");
    };
    Ok(AuthorizationCode::new(code.into_owned()))
}
