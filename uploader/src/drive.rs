//! Google Drive as the source of videos to upload.
//!
//! The storage folder is expected to look like `folder/subfolder/video.mp4`, with optional
//! sidecar files (`title.txt`, `description.txt`, `tags.txt`, `thumbnail.jpg`) next to each video.

use crate::google::{GoogleAuth, ensure_success};
use crate::model::{UploadTask, VideoFile, VideoMetadata};
use crate::pipeline::VideoSource;
use eyre::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::instrument;

const API_BASE: &str = "https://www.googleapis.com";
pub(crate) const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Read-only access is all discovery needs.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";

const TITLE_FILE: &str = "title.txt";
const DESCRIPTION_FILE: &str = "description.txt";
const TAGS_FILE: &str = "tags.txt";
const THUMBNAIL_FILE: &str = "thumbnail.jpg";

/// The optional files read next to each video.
pub const SIDECAR_FILES: [&str; 4] = [TITLE_FILE, DESCRIPTION_FILE, TAGS_FILE, THUMBNAIL_FILE];

const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, size, parents)";

/// A `files` resource, trimmed to the fields we request.
///
/// See: <https://developers.google.com/drive/api/reference/rest/v3/files>
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    /// Drive reports sizes as decimal strings.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_video(&self) -> bool {
        self.mime_type.starts_with("video/")
    }

    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_deref().and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    next_page_token: Option<String>,
}

/// Quotes a value for use inside a Drive search query.
pub(crate) fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn folders_query(parent: &str) -> String {
    format!(
        "mimeType = '{FOLDER_MIME_TYPE}' and {} in parents and trashed = false",
        quote(parent)
    )
}

fn videos_query(parent: &str) -> String {
    format!(
        "mimeType contains 'video/' and {} in parents and trashed = false",
        quote(parent)
    )
}

fn children_query(parent: &str) -> String {
    format!("{} in parents and trashed = false", quote(parent))
}

fn named_file_query(parent: &str, name: &str) -> String {
    format!(
        "name = {} and {} in parents and trashed = false",
        quote(name),
        quote(parent)
    )
}

/// Makes a Drive file name safe to use as a local file name.
fn local_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.trim() {
        "" | "." | ".." => "video".to_string(),
        s => s.to_string(),
    }
}

pub(crate) fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

#[derive(Debug, Clone)]
pub struct DriveClient {
    http: reqwest::Client,
    base_url: String,
    auth: GoogleAuth,
    folder_id: String,
    max_depth: usize,
    timeout: Duration,
}

impl DriveClient {
    pub fn new(
        http: reqwest::Client,
        auth: GoogleAuth,
        folder_id: impl Into<String>,
        max_depth: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: API_BASE.to_string(),
            auth,
            folder_id: folder_id.into(),
            max_depth,
            timeout,
        }
    }

    /// Points the client at another Drive API host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn folder_id(&self) -> &str {
        &self.folder_id
    }

    fn files_url(&self) -> String {
        format!("{}/drive/v3/files", self.base_url)
    }

    /// Returns every file matching a Drive search `query`, following pagination.
    #[instrument(skip(self), level = tracing::Level::TRACE)]
    pub async fn search(&self, query: &str) -> eyre::Result<Vec<DriveFile>> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![
                ("q", query),
                ("fields", LIST_FIELDS),
                ("orderBy", "folder,name"),
                ("pageSize", "1000"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ];
            if let Some(token) = page_token.as_deref() {
                params.push(("pageToken", token));
            }
            let request = self
                .http
                .get(self.files_url())
                .query(&params)
                .timeout(self.timeout);
            let response = self
                .auth
                .authorize(request)
                .await?
                .send()
                .await
                .context("send Drive list request")?;
            let page: FileList = ensure_success(response, "Drive files.list")
                .await?
                .json()
                .await
                .context("parse Drive file list")?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(files),
            }
        }
    }

    /// Fetches one file's metadata. Used to check that the storage folder is reachable.
    #[instrument(skip(self))]
    pub async fn get(&self, file_id: &str) -> eyre::Result<DriveFile> {
        let request = self
            .http
            .get(format!("{}/{file_id}", self.files_url()))
            .query(&[
                ("fields", "id, name, mimeType, size, parents"),
                ("supportsAllDrives", "true"),
            ])
            .timeout(self.timeout);
        let response = self
            .auth
            .authorize(request)
            .await?
            .send()
            .await
            .context("send Drive get request")?;
        ensure_success(response, "Drive files.get")
            .await?
            .json()
            .await
            .context("parse Drive file")
    }

    pub async fn folders(&self, parent_id: &str) -> eyre::Result<Vec<DriveFile>> {
        self.search(&folders_query(parent_id)).await
    }

    pub async fn videos(&self, parent_id: &str) -> eyre::Result<Vec<DriveFile>> {
        self.search(&videos_query(parent_id)).await
    }

    /// Everything directly inside a folder, folders first.
    pub async fn children(&self, parent_id: &str) -> eyre::Result<Vec<DriveFile>> {
        self.search(&children_query(parent_id)).await
    }

    /// Looks up a file by exact name within a folder.
    pub async fn find_file(&self, parent_id: &str, name: &str) -> eyre::Result<Option<DriveFile>> {
        let mut files = self.search(&named_file_query(parent_id, name)).await?;
        Ok((!files.is_empty()).then(|| files.swap_remove(0)))
    }

    fn media_request(&self, file_id: &str) -> reqwest::RequestBuilder {
        self.http
            .get(format!("{}/{file_id}", self.files_url()))
            .query(&[("alt", "media"), ("supportsAllDrives", "true")])
    }

    /// Streams a file's contents to `dest`.
    #[instrument(skip(self), fields(dest = %dest.display()))]
    pub async fn download(&self, file_id: &str, dest: &Path) -> eyre::Result<u64> {
        let response = self
            .auth
            .authorize(self.media_request(file_id))
            .await?
            .send()
            .await
            .context("send Drive download request")?;
        let response = ensure_success(response, "Drive download").await?;
        let total = response.content_length();

        let mut out = tokio::fs::File::create(dest)
            .await
            .with_context(|| format!("create {}", dest.display()))?;
        let mut body = response.bytes_stream();
        let mut written = 0u64;
        let mut last_reported = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.context("read Drive download body")?;
            out.write_all(&chunk)
                .await
                .with_context(|| format!("write {}", dest.display()))?;
            written += chunk.len() as u64;
            if let Some(total) = total.filter(|t| *t > 0) {
                let percent = written * 100 / total;
                if percent >= last_reported + 25 {
                    last_reported = percent - percent % 25;
                    tracing::debug!(percent, "downloading");
                }
            }
        }
        out.flush().await.context("flush download")?;
        tracing::debug!(bytes = written, "download complete");
        Ok(written)
    }

    /// Reads a small text file, trimming surrounding whitespace.
    pub async fn read_text(&self, file_id: &str) -> eyre::Result<String> {
        let response = self
            .auth
            .authorize(self.media_request(file_id).timeout(self.timeout))
            .await?
            .send()
            .await
            .context("send Drive download request")?;
        let text = ensure_success(response, "Drive download")
            .await?
            .text()
            .await
            .context("read Drive text file")?;
        Ok(text.trim().to_string())
    }

    /// Reads an optional sidecar text file. Lookup problems are logged and treated as absent.
    async fn sidecar_text(&self, folder_id: &str, name: &str) -> Option<String> {
        let found = match self.find_file(folder_id, name).await {
            Ok(found) => found?,
            Err(e) => {
                tracing::warn!(file = name, error = %format!("{e:#}"), "could not look up metadata file");
                return None;
            }
        };
        match self.read_text(&found.id).await {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::warn!(file = name, error = %format!("{e:#}"), "could not read metadata file");
                None
            }
        }
    }

    async fn thumbnail(&self, folder_id: &str, dir: &Path) -> Option<PathBuf> {
        let result = async {
            let Some(found) = self.find_file(folder_id, THUMBNAIL_FILE).await? else {
                return Ok(None);
            };
            let dest = dir.join(THUMBNAIL_FILE);
            self.download(&found.id, &dest).await?;
            eyre::Ok(Some(dest))
        }
        .await;
        result.unwrap_or_else(|e| {
            tracing::warn!(error = %format!("{e:#}"), "could not fetch thumbnail");
            None
        })
    }

    /// Reads the sidecar files next to a video into its metadata.
    pub async fn metadata(&self, file: &VideoFile, dir: &Path) -> VideoMetadata {
        let mut meta = VideoMetadata::for_file(file);
        if let Some(title) = self
            .sidecar_text(&file.parent_id, TITLE_FILE)
            .await
            .filter(|t| !t.is_empty())
        {
            meta.title = title;
        }
        if let Some(description) = self.sidecar_text(&file.parent_id, DESCRIPTION_FILE).await {
            meta.description = description;
        }
        if let Some(tags) = self.sidecar_text(&file.parent_id, TAGS_FILE).await {
            meta.tags = VideoMetadata::parse_tags(&tags);
        }
        meta.thumbnail = self.thumbnail(&file.parent_id, dir).await;
        meta
    }
}

fn to_video(file: DriveFile, parent_id: &str, folder_path: &str) -> VideoFile {
    VideoFile {
        size: file.size_bytes(),
        id: file.id,
        name: file.name,
        mime_type: file.mime_type,
        parent_id: parent_id.to_string(),
        folder_path: folder_path.to_string(),
    }
}

impl VideoSource for DriveClient {
    /// Walks the storage folder depth-first, folders in name order, collecting videos at every
    /// level down to `max_depth`.
    ///
    /// The storage folder itself must be listable. Problems with a nested folder are logged and
    /// that folder is skipped.
    #[instrument(skip(self), fields(folder = %self.folder_id))]
    async fn discover(&self, limit: Option<usize>) -> eyre::Result<Vec<VideoFile>> {
        let root = self
            .get(&self.folder_id)
            .await
            .context("access storage folder")?;
        let limit = limit.unwrap_or(usize::MAX);

        let mut found = Vec::new();
        let mut stack = vec![(root.id, root.name, 0usize)];
        while let Some((folder_id, path, depth)) = stack.pop() {
            let listing = async {
                let videos = self.videos(&folder_id).await?;
                let folders = if depth < self.max_depth {
                    self.folders(&folder_id).await?
                } else {
                    Vec::new()
                };
                eyre::Ok((videos, folders))
            }
            .await;
            let (videos, folders) = match listing {
                Ok(listing) => listing,
                Err(e) if depth == 0 => return Err(e).context("list storage folder"),
                Err(e) => {
                    tracing::warn!(folder = %path, error = %format!("{e:#}"), "skipping unreadable folder");
                    continue;
                }
            };

            tracing::debug!(folder = %path, videos = videos.len(), subfolders = folders.len(), "listed folder");
            for video in videos {
                found.push(to_video(video, &folder_id, &path));
                if found.len() >= limit {
                    return Ok(found);
                }
            }
            // Reversed so that the first folder is visited first.
            for folder in folders.into_iter().rev() {
                let child_path = join_path(&path, &folder.name);
                stack.push((folder.id, child_path, depth + 1));
            }
        }

        tracing::info!(videos = found.len(), "discovery complete");
        Ok(found)
    }

    #[instrument(skip(self, dir), fields(file = %file.name))]
    async fn stage(&self, file: &VideoFile, dir: &Path) -> eyre::Result<UploadTask> {
        let path = dir.join(local_name(&file.name));
        tracing::info!("downloading video");
        self.download(&file.id, &path)
            .await
            .with_context(|| format!("download {}", file.name))?;
        let metadata = self.metadata(file, dir).await;
        Ok(UploadTask {
            file: file.clone(),
            metadata,
            path,
        })
    }
}
