//! Server-to-server authentication with a Google service-account key.
//!
//! See: <https://developers.google.com/identity/protocols/oauth2/service-account>

use eyre::Context;
use std::path::Path;
use tracing::instrument;
use yup_oauth2::ServiceAccountAuthenticator;
use yup_oauth2::authenticator::DefaultAuthenticator;

/// Hands out access tokens for one service account and scope set.
///
/// The authenticator caches tokens and renews them shortly before they expire.
pub struct ServiceAccount {
    client_email: String,
    scopes: Vec<String>,
    auth: DefaultAuthenticator,
}

impl std::fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("client_email", &self.client_email)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

impl ServiceAccount {
    pub async fn from_file(path: &Path, scopes: &[&str]) -> eyre::Result<Self> {
        let key = yup_oauth2::read_service_account_key(path)
            .await
            .with_context(|| format!("read service account key {}", path.display()))?;
        let client_email = key.client_email.clone();
        let auth = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .with_context(|| format!("load service account key {}", path.display()))?;
        Ok(Self {
            client_email,
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            auth,
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    #[instrument(skip(self), fields(account = %self.client_email), level = tracing::Level::TRACE)]
    pub async fn access_token(&self) -> eyre::Result<String> {
        let token = self
            .auth
            .token(&self.scopes)
            .await
            .context("request service account token")?;
        token
            .token()
            .map(String::from)
            .ok_or_else(|| eyre::eyre!("service account token response has no access token"))
    }
}
