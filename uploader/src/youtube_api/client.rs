//! Core YouTube API client functionality and authentication management.

use crate::oauth::OAuthManager;
use crate::youtube_api::{
    channels::{Channel, ChannelListResponse},
    videos::{Video, VideoInsert},
};
use eyre::Context;
use http::{Method, StatusCode, header};
use oauth2::TokenResponse;
use oauth2::basic::BasicTokenResponse;
use serde::Serialize;
use std::io::SeekFrom;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::io::AsyncSeekExt;
use tokio::sync::Mutex;
use tracing::instrument;

const API_BASE: &str = "https://www.googleapis.com";
const UPLOAD_PATH: &str = "/upload/youtube/v3/videos";
const THUMBNAIL_PATH: &str = "/upload/youtube/v3/thumbnails/set";
const CHANNELS_PATH: &str = "/youtube/v3/channels";

/// YouTube's "Resume Incomplete".
const RESUME_INCOMPLETE: u16 = 308;

/// Statuses after which an interrupted transfer is resumed rather than given up.
const RETRIABLE_STATUSES: [StatusCode; 4] = [
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Longest pause between two transfer attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(64);

#[derive(Debug, Clone)]
pub struct TimeBoundAccessToken {
    token: BasicTokenResponse,
    /// When the current access token expires (with safety buffer)
    expires_at: SystemTime,
}

impl TimeBoundAccessToken {
    /// Wraps a token whose age is unknown, such as one loaded from disk, so that it is refreshed
    /// before first use.
    pub fn expired(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: SystemTime::UNIX_EPOCH,
            token,
        }
    }

    /// Wraps a token that was just issued.
    pub fn new(token: BasicTokenResponse) -> Self {
        Self {
            expires_at: Self::calculate_token_expiry(&token),
            token,
        }
    }

    pub fn raw_token(&self) -> &BasicTokenResponse {
        &self.token
    }

    pub fn is_expired(&self) -> bool {
        SystemTime::now() >= self.expires_at
    }

    /// Refreshes this token using the provided OAuth manager, preserving the refresh token.
    ///
    /// Returns `Ok(false)` if the refresh token was rejected.
    pub async fn refresh(&mut self, oauth_manager: &OAuthManager) -> eyre::Result<bool> {
        tracing::trace!("refreshing token");
        match oauth_manager
            .refresh_token(&self.token)
            .await
            .context("refresh OAuth token")?
        {
            Some(new_token) => {
                let old_token = std::mem::replace(&mut self.token, new_token);

                // Google does not repeat the refresh token in refresh responses.
                if self.token.refresh_token().is_none() {
                    tracing::trace!("new token lacks refresh token, preserving original");
                    self.token
                        .set_refresh_token(old_token.refresh_token().cloned());
                }

                self.expires_at = Self::calculate_token_expiry(&self.token);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Now plus `expires_in` minus a five minute buffer, or 55 minutes if the token doesn't say.
    fn calculate_token_expiry(token: &BasicTokenResponse) -> SystemTime {
        let now = SystemTime::now();
        match token.expires_in() {
            Some(expires_in) => now + expires_in.saturating_sub(Duration::from_secs(300)),
            None => now + Duration::from_secs(3300),
        }
    }
}

/// How far a resumable transfer got.
#[derive(Debug)]
enum Transfer {
    Done(Video),
    /// YouTube has every byte before this offset.
    Incomplete(u64),
    /// Worth trying again after a pause.
    Retriable(eyre::Report),
}

/// Reads the offset to resume from out of a `Range: bytes=0-N` header.
fn next_offset(range: Option<&str>) -> eyre::Result<u64> {
    let Some(range) = range else {
        return Ok(0);
    };
    let last = range
        .trim()
        .strip_prefix("bytes=")
        .and_then(|r| r.split_once('-'))
        .map(|(_, last)| last)
        .ok_or_else(|| eyre::eyre!("unexpected Range header {range:?}"))?;
    let last: u64 = last
        .parse()
        .with_context(|| format!("parse Range header {range:?}"))?;
    Ok(last + 1)
}

fn backoff(retry: u32) -> Duration {
    Duration::from_secs(1u64 << retry.saturating_sub(1).min(6)).min(MAX_BACKOFF)
}

fn image_content_type(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Client for one channel's view of the YouTube Data API v3.
///
/// Access tokens are refreshed automatically before they expire.
#[derive(Debug, Clone)]
pub struct YouTubeClient {
    token: Arc<Mutex<TimeBoundAccessToken>>,
    oauth_manager: Arc<OAuthManager>,
    client: reqwest::Client,
    base_url: String,
    /// Project API key, sent along with every request when set.
    api_key: Option<String>,
    max_retries: u32,
    timeout: Duration,
}

impl YouTubeClient {
    pub fn new(
        token: TimeBoundAccessToken,
        oauth_manager: Arc<OAuthManager>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            token: Arc::new(Mutex::new(token)),
            oauth_manager,
            client,
            base_url: API_BASE.to_string(),
            api_key: None,
            max_retries: 3,
            timeout: Duration::from_secs(60),
        }
    }

    /// Points the client at another API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// How often an interrupted transfer is resumed before the upload is given up.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Timeout for metadata calls. Video bytes are never subject to it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns a clone of the underlying OAuth2 token, e.g. to persist it.
    pub async fn token(&self) -> BasicTokenResponse {
        self.token.lock().await.token.clone()
    }

    /// Gets a guaranteed-fresh access token, refreshing if necessary.
    #[instrument(skip(self))]
    pub(crate) async fn fresh_access_token(&self) -> eyre::Result<String> {
        let mut token = self.token.lock().await;

        if token.is_expired() {
            tracing::debug!("access token expired, attempting refresh");
            if token.refresh(&self.oauth_manager).await? {
                tracing::debug!("access token successfully refreshed");
            } else {
                tracing::error!("access token refresh failed, client is unusable");
                eyre::bail!("Unable to refresh expired access token; re-run authorize-channels");
            }
        }

        Ok(token.token.access_token().secret().to_string())
    }

    /// A request with a fresh bearer token and the API key attached.
    async fn authenticated_request(
        &self,
        method: Method,
        url: &str,
    ) -> eyre::Result<reqwest::RequestBuilder> {
        let access_token = self.fresh_access_token().await?;
        let mut request = self.client.request(method, url).bearer_auth(access_token);
        if let Some(key) = &self.api_key {
            request = request.query(&[("key", key.as_str())]);
        }
        Ok(request)
    }

    /// Makes an authenticated metadata request to the YouTube API and checks its status.
    #[instrument(skip(self, json_body), level = tracing::Level::TRACE)]
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        url: &str,
        query_params: Option<&[(&str, &str)]>,
        json_body: Option<&impl Serialize>,
    ) -> eyre::Result<reqwest::Response> {
        let mut request = self
            .authenticated_request(method.clone(), url)
            .await?
            .timeout(self.timeout);

        if let Some(params) = query_params {
            request = request.query(params);
        }
        if let Some(body) = json_body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("send {} request to YouTube API: {}", method, url))?;

        let status_code = response.status();
        if !status_code.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(eyre::eyre!(
                "YouTube API {} request failed with status {}: {}",
                method,
                status_code,
                error_text
            ));
        }

        Ok(response)
    }

    /// The channel the token belongs to, if the account has one.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.readonly`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/channels/list>
    #[instrument(skip(self))]
    pub async fn my_channel(&self) -> eyre::Result<Option<Channel>> {
        let query_params = [("part", "id,snippet"), ("mine", "true")];
        let response = self
            .make_authenticated_request(
                Method::GET,
                &self.url(CHANNELS_PATH),
                Some(&query_params),
                None::<&()>,
            )
            .await?;
        let channels: ChannelListResponse = response
            .json()
            .await
            .context("parse YouTube channels API response as JSON")?;
        Ok(channels.items.into_iter().next())
    }

    /// Uploads the video at `path` and returns the new video resource.
    ///
    /// Transport errors and 5xx responses during the byte transfer are retried with exponential
    /// backoff, resuming from the last byte YouTube confirmed.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.upload`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/videos/insert>
    #[instrument(skip(self, video), fields(path = %path.display(), title = %video.snippet.title))]
    pub async fn upload_video(
        &self,
        path: &Path,
        mime_type: &str,
        video: &VideoInsert,
    ) -> eyre::Result<Video> {
        let total = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        eyre::ensure!(total > 0, "{} is empty", path.display());

        let session = self.start_upload(total, mime_type, video).await?;
        tracing::debug!(bytes = total, "opened upload session");

        let mut offset = 0;
        let mut retries = 0;
        loop {
            let transfer = self.put_bytes(&session, path, offset, total, mime_type).await?;
            let error = match transfer {
                Transfer::Done(video) => return Ok(video),
                Transfer::Incomplete(next) if next > offset => {
                    offset = next;
                    continue;
                }
                Transfer::Incomplete(next) => eyre::eyre!("upload stalled at byte {next}"),
                Transfer::Retriable(e) => e,
            };

            retries += 1;
            if retries > self.max_retries {
                return Err(error).with_context(|| {
                    format!("giving up after {} retries", self.max_retries)
                });
            }
            let delay = backoff(retries);
            tracing::warn!(
                retry = retries,
                delay = ?delay,
                error = %format!("{error:#}"),
                "upload interrupted, resuming"
            );
            tokio::time::sleep(delay).await;

            match self.query_progress(&session, total).await? {
                Transfer::Done(video) => return Ok(video),
                Transfer::Incomplete(next) => offset = next,
                // Resend from where we were; the next attempt will tell us more.
                Transfer::Retriable(_) => {}
            }
        }
    }

    /// Opens a resumable upload session and returns its URL.
    async fn start_upload(
        &self,
        total: u64,
        mime_type: &str,
        video: &VideoInsert,
    ) -> eyre::Result<String> {
        let response = self
            .authenticated_request(Method::POST, &self.url(UPLOAD_PATH))
            .await?
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", total)
            .json(video)
            .timeout(self.timeout)
            .send()
            .await
            .context("send YouTube upload session request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            eyre::bail!("YouTube upload session request failed with status {status}: {error_text}");
        }
        response
            .headers()
            .get(header::LOCATION)
            .and_then(|l| l.to_str().ok())
            .map(String::from)
            .ok_or_else(|| eyre::eyre!("YouTube did not return an upload session URL"))
    }

    /// Sends the file from `offset` to the end.
    async fn put_bytes(
        &self,
        session: &str,
        path: &Path,
        offset: u64,
        total: u64,
        mime_type: &str,
    ) -> eyre::Result<Transfer> {
        let mut file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        file.seek(SeekFrom::Start(offset))
            .await
            .with_context(|| format!("seek {}", path.display()))?;

        let mut request = self
            .authenticated_request(Method::PUT, session)
            .await?
            .header(header::CONTENT_TYPE, mime_type)
            .header(header::CONTENT_LENGTH, total - offset);
        if offset > 0 {
            request = request.header(
                header::CONTENT_RANGE,
                format!("bytes {offset}-{}/{total}", total - 1),
            );
        }

        match request.body(reqwest::Body::from(file)).send().await {
            Ok(response) => Self::classify(response).await,
            Err(e) => Ok(Transfer::Retriable(
                eyre::Report::new(e).wrap_err("send video bytes"),
            )),
        }
    }

    /// Asks YouTube how much of the file it has.
    async fn query_progress(&self, session: &str, total: u64) -> eyre::Result<Transfer> {
        let request = self
            .authenticated_request(Method::PUT, session)
            .await?
            .header(header::CONTENT_LENGTH, 0)
            .header(header::CONTENT_RANGE, format!("bytes */{total}"))
            .timeout(self.timeout);
        match request.send().await {
            Ok(response) => Self::classify(response).await,
            Err(e) => Ok(Transfer::Retriable(
                eyre::Report::new(e).wrap_err("query upload progress"),
            )),
        }
    }

    async fn classify(response: reqwest::Response) -> eyre::Result<Transfer> {
        let status = response.status();
        if status.is_success() {
            let video = response
                .json()
                .await
                .context("parse YouTube videos.insert response as JSON")?;
            return Ok(Transfer::Done(video));
        }
        if status.as_u16() == RESUME_INCOMPLETE {
            let range = response
                .headers()
                .get(header::RANGE)
                .and_then(|r| r.to_str().ok());
            return Ok(Transfer::Incomplete(next_offset(range)?));
        }

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "unknown error".to_string());
        let error = eyre::eyre!("YouTube upload failed with status {status}: {error_text}");
        if RETRIABLE_STATUSES.contains(&status) {
            Ok(Transfer::Retriable(error))
        } else {
            Err(error)
        }
    }

    /// Sets a custom thumbnail on an uploaded video.
    ///
    /// # Required Scopes
    ///
    /// * `https://www.googleapis.com/auth/youtube.upload`
    ///
    /// # API Reference
    ///
    /// <https://developers.google.com/youtube/v3/docs/thumbnails/set>
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn set_thumbnail(&self, video_id: &str, path: &Path) -> eyre::Result<()> {
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("read {}", path.display()))?;
        let response = self
            .authenticated_request(Method::POST, &self.url(THUMBNAIL_PATH))
            .await?
            .query(&[("videoId", video_id), ("uploadType", "media")])
            .header(header::CONTENT_TYPE, image_content_type(path))
            .body(image)
            .timeout(self.timeout)
            .send()
            .await
            .context("send YouTube thumbnails.set request")?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            eyre::bail!("YouTube thumbnails.set failed with status {status}: {error_text}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_api::{MockApi, Recorded, Reply};
    use crate::oauth::ClientSecrets;
    use crate::model::VideoMetadata;
    use crate::model::tests::video;
    use oauth2::basic::BasicTokenType;
    use serde_json::json;
    use oauth2::{AccessToken, EmptyExtraTokenFields, RefreshToken};

    fn token(expires_in: Option<u64>) -> BasicTokenResponse {
        let mut token = BasicTokenResponse::new(
            AccessToken::new("a".into()),
            BasicTokenType::Bearer,
            EmptyExtraTokenFields {},
        );
        token.set_expires_in(expires_in.map(Duration::from_secs).as_ref());
        token.set_refresh_token(Some(RefreshToken::new("r".into())));
        token
    }

    #[test]
    fn loaded_tokens_start_expired() {
        assert!(TimeBoundAccessToken::expired(token(Some(3600))).is_expired());
    }

    #[test]
    fn expiry_keeps_a_buffer() {
        let now = SystemTime::now();
        let fresh = TimeBoundAccessToken::new(token(Some(3600)));
        assert!(!fresh.is_expired());
        let left = fresh.expires_at.duration_since(now).unwrap();
        assert!(left <= Duration::from_secs(3300), "{left:?}");
        assert!(left > Duration::from_secs(3290), "{left:?}");

        // less than the buffer
        assert!(TimeBoundAccessToken::new(token(Some(60))).is_expired());

        let unknown = TimeBoundAccessToken::new(token(None));
        let left = unknown.expires_at.duration_since(now).unwrap();
        assert!(left > Duration::from_secs(3290), "{left:?}");
    }

    #[test]
    fn resume_offsets() {
        assert_eq!(next_offset(None).unwrap(), 0);
        assert_eq!(next_offset(Some("bytes=0-42")).unwrap(), 43);
        assert_eq!(next_offset(Some("bytes=0-1048575")).unwrap(), 1_048_576);
        assert!(next_offset(Some("0-42")).is_err());
        assert!(next_offset(Some("bytes=0-")).is_err());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(20), MAX_BACKOFF);
    }

    #[test]
    fn thumbnail_types() {
        assert_eq!(image_content_type(Path::new("thumbnail.jpg")), "image/jpeg");
        assert_eq!(image_content_type(Path::new("thumbnail.PNG")), "image/png");
    }

    const CLIP: &[u8] = b"0123456789";

    fn client(api: &MockApi, max_retries: u32) -> YouTubeClient {
        let secrets =
            ClientSecrets::parse(r#"{"installed": {"client_id": "id", "client_secret": "s"}}"#)
                .unwrap();
        YouTubeClient::new(
            TimeBoundAccessToken::new(token(Some(3600))),
            Arc::new(OAuthManager::new(secrets).unwrap()),
            reqwest::Client::new(),
        )
        .with_base_url(&api.url)
        .with_api_key("yt-key")
        .with_max_retries(max_retries)
        .with_timeout(Duration::from_secs(5))
    }

    fn insert() -> VideoInsert {
        VideoInsert::from_metadata(&VideoMetadata::for_file(&video("f1", "The Lost Map")))
    }

    fn clip() -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), CLIP).unwrap();
        file
    }

    /// Opens sessions at `/session`; `transfer` answers every PUT to it.
    fn upload_api(transfer: fn(&Recorded) -> Reply) -> impl Fn(&Recorded) -> Reply {
        move |req: &Recorded| match req.path.as_str() {
            UPLOAD_PATH if req.method == Method::POST => {
                let host = req.header("host");
                Reply::status(200).header("location", format!("http://{host}/session"))
            }
            "/session" => transfer(req),
            _ => Reply::status(404),
        }
    }

    fn done() -> Reply {
        Reply::json(json!({
            "id": "vid123",
            "status": {"privacyStatus": "public", "uploadStatus": "uploaded"}
        }))
    }

    fn puts(api: &MockApi) -> Vec<Recorded> {
        api.requests()
            .into_iter()
            .filter(|r| r.path == "/session")
            .collect()
    }

    #[tokio::test]
    async fn upload_opens_a_session_and_sends_the_bytes() {
        let api = MockApi::start(upload_api(|_| done())).await;
        let file = clip();

        let video = client(&api, 3)
            .upload_video(file.path(), "video/mp4", &insert())
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        let requests = api.requests();
        let session = &requests[0];
        assert_eq!(session.param("uploadType"), "resumable");
        assert_eq!(session.param("key"), "yt-key");
        assert_eq!(session.header("authorization"), "Bearer a");
        assert_eq!(session.header("x-upload-content-type"), "video/mp4");
        assert_eq!(session.header("x-upload-content-length"), "10");
        let body: serde_json::Value = serde_json::from_slice(&session.body).unwrap();
        assert_eq!(body["snippet"]["title"], "The Lost Map");
        assert_eq!(&requests[1].body[..], CLIP);
    }

    #[tokio::test]
    async fn upload_resumes_after_partial_transfer() {
        let api = MockApi::start(upload_api(|req| match req.header("content-range") {
            "" => Reply::status(308).header("range", "bytes=0-3"),
            "bytes 4-9/10" => done(),
            _ => Reply::status(400),
        }))
        .await;
        let file = clip();

        let video = client(&api, 0)
            .upload_video(file.path(), "video/mp4", &insert())
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        let puts = puts(&api);
        assert_eq!(puts.len(), 2);
        assert_eq!(&puts[1].body[..], &CLIP[4..]);
    }

    #[tokio::test]
    async fn server_error_is_resumed_from_confirmed_offset() {
        let api = MockApi::start(upload_api(|req| match req.header("content-range") {
            "" => Reply::status(503).body("backendError"),
            "bytes */10" => Reply::status(308).header("range", "bytes=0-4"),
            "bytes 5-9/10" => done(),
            _ => Reply::status(400),
        }))
        .await;
        let file = clip();

        let video = client(&api, 1)
            .upload_video(file.path(), "video/mp4", &insert())
            .await
            .unwrap();

        assert_eq!(video.id, "vid123");
        let ranges: Vec<_> = puts(&api)
            .iter()
            .map(|r| r.header("content-range").to_string())
            .collect();
        assert_eq!(ranges, vec!["", "bytes */10", "bytes 5-9/10"]);
        assert_eq!(&puts(&api)[2].body[..], &CLIP[5..]);
    }

    #[tokio::test]
    async fn upload_gives_up_after_max_retries() {
        let api =
            MockApi::start(upload_api(|_| Reply::status(503).body("backendError"))).await;
        let file = clip();

        let err = client(&api, 1)
            .upload_video(file.path(), "video/mp4", &insert())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("giving up after 1 retries"), "{err:#}");
        let transfers = puts(&api)
            .iter()
            .filter(|r| !r.header("content-range").starts_with("bytes */"))
            .count();
        assert_eq!(transfers, 2);
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let api = MockApi::start(upload_api(|_| Reply::status(403).body("quotaExceeded"))).await;
        let file = clip();

        let err = client(&api, 3)
            .upload_video(file.path(), "video/mp4", &insert())
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("quotaExceeded"), "{err:#}");
        assert_eq!(puts(&api).len(), 1);
    }
}
