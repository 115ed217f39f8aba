//! The records that flow through the upload pipeline.
//!
//! A [`VideoFile`] is what discovery finds in Drive. Once it has been staged on local disk together
//! with its sidecar metadata it becomes an [`UploadTask`], and every attempt to push that task to
//! a channel produces exactly one [`UploadRecord`] in the spreadsheet log.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// YouTube category used when a video does not say otherwise ("People & Blogs").
pub const DEFAULT_CATEGORY_ID: &str = "22";

/// A video file discovered in the storage folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    /// Drive file id. This is the key of the dedup log.
    pub id: String,
    /// File name as shown in Drive, e.g. `clip1.mp4`.
    pub name: String,
    pub mime_type: String,
    pub size: Option<u64>,
    /// Id of the folder the file lives in; sidecar metadata is looked up there.
    pub parent_id: String,
    /// Human-readable `folder/subfolder` path the file was found under.
    pub folder_path: String,
}

/// Visibility of an uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrivacyStatus {
    #[default]
    Public,
    Unlisted,
    Private,
}

/// Title, description and friends for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoMetadata {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy_status: PrivacyStatus,
    /// Local path of a staged thumbnail image, if the folder had one.
    pub thumbnail: Option<PathBuf>,
}

impl VideoMetadata {
    /// Metadata for a video that has no sidecar files: the file name becomes the title.
    pub fn for_file(file: &VideoFile) -> Self {
        Self {
            title: file.name.clone(),
            description: String::new(),
            tags: Vec::new(),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
            privacy_status: PrivacyStatus::default(),
            thumbnail: None,
        }
    }

    /// Splits the contents of a `tags.txt` file.
    ///
    /// Tags are comma-separated; surrounding whitespace is trimmed and empty entries dropped.
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A discovered video whose bytes have been staged locally and are ready to upload.
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub file: VideoFile,
    pub metadata: VideoMetadata,
    /// Where the video bytes were downloaded to.
    pub path: PathBuf,
}

/// One configured upload destination.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
    /// Display name, e.g. `Tiny Trailblazers`. This is what gets written to the log.
    pub name: String,
    /// Channel handle without the leading `@`.
    pub handle: String,
    /// Path to the channel's OAuth client-secret file.
    pub credentials_file: PathBuf,
}

impl ChannelConfig {
    /// Whether a channel column value in the upload log refers to this channel.
    ///
    /// Older logs recorded either the display name or the handle, so both are accepted.
    pub fn matches(&self, logged: &str) -> bool {
        let logged = logged.trim();
        let logged_handle = logged.strip_prefix('@').unwrap_or(logged);
        logged == self.name || logged_handle == self.handle
    }

    /// Where the channel's OAuth token is kept: `youtube-oauth2-<stem>.json` next to the
    /// client-secret file.
    pub fn token_file(&self) -> PathBuf {
        let stem = self
            .credentials_file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.handle.clone());
        self.credentials_file
            .with_file_name(format!("youtube-oauth2-{stem}.json"))
    }
}

/// The configured channel a channel column value in the upload log refers to.
///
/// Display names are matched first. A handle, with or without the `@`, only counts when no
/// channel has it as its display name.
pub fn logged_channel<'a>(logged: &str, channels: &'a [ChannelConfig]) -> Option<&'a ChannelConfig> {
    let logged = logged.trim();
    if let Some(ch) = channels.iter().find(|ch| ch.name == logged) {
        return Some(ch);
    }
    let handle = logged.strip_prefix('@').unwrap_or(logged);
    channels.iter().find(|ch| ch.handle == handle)
}

/// A video as it landed on the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedVideo {
    pub id: String,
    pub url: String,
}

impl UploadedVideo {
    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            url: format!("https://www.youtube.com/watch?v={id}"),
            id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Success,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Success => "success",
            UploadStatus::Failed => "failed",
        }
    }

    /// Parses the status column of a log row.
    ///
    /// Rows written before the status column existed only ever recorded successful uploads, so
    /// an empty cell counts as a success.
    pub fn from_cell(cell: Option<&str>) -> Option<Self> {
        match cell.map(str::trim) {
            None | Some("") => Some(UploadStatus::Success),
            Some(s) if s.eq_ignore_ascii_case("success") => Some(UploadStatus::Success),
            Some(s) if s.eq_ignore_ascii_case("failed") => Some(UploadStatus::Failed),
            Some(_) => None,
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the upload log. Never mutated once written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRecord {
    pub file_id: String,
    pub file_name: String,
    pub folder_path: String,
    /// Display name of the channel.
    pub channel: String,
    pub uploaded_at: Timestamp,
    /// Remote URL on success, empty on failure.
    pub url: String,
    pub status: UploadStatus,
    /// Why the upload failed, empty on success.
    pub error: String,
}

impl UploadRecord {
    pub fn new(
        file: &VideoFile,
        channel: &ChannelConfig,
        outcome: &Result<UploadedVideo, String>,
    ) -> Self {
        let (url, status, error) = match outcome {
            Ok(video) => (video.url.clone(), UploadStatus::Success, String::new()),
            Err(e) => (String::new(), UploadStatus::Failed, e.clone()),
        };
        Self {
            file_id: file.id.clone(),
            file_name: file.name.clone(),
            folder_path: file.folder_path.clone(),
            channel: channel.name.clone(),
            uploaded_at: Timestamp::now(),
            url,
            status,
            error,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn channel(name: &str, handle: &str) -> ChannelConfig {
        ChannelConfig {
            name: name.to_string(),
            handle: handle.to_string(),
            credentials_file: PathBuf::from(format!("{handle}_client_secret.json")),
        }
    }

    pub(crate) fn video(id: &str, name: &str) -> VideoFile {
        VideoFile {
            id: id.to_string(),
            name: name.to_string(),
            mime_type: "video/mp4".to_string(),
            size: Some(1024),
            parent_id: "sub".to_string(),
            folder_path: "Stories/Episode 1".to_string(),
        }
    }

    #[test]
    fn tags_are_trimmed_and_empties_dropped() {
        assert_eq!(
            VideoMetadata::parse_tags(" kids, adventure ,,maps,\n"),
            vec!["kids", "adventure", "maps"]
        );
        assert!(VideoMetadata::parse_tags("").is_empty());
    }

    #[test]
    fn default_metadata_uses_file_name() {
        let meta = VideoMetadata::for_file(&video("f1", "clip1.mp4"));
        assert_eq!(meta.title, "clip1.mp4");
        assert_eq!(meta.category_id, "22");
        assert_eq!(meta.privacy_status, PrivacyStatus::Public);
    }

    #[test]
    fn logged_names_win_over_handles() {
        let channels = vec![
            channel("Quest", "QuestOfficial"),
            channel("Map Tales", "Quest"),
        ];
        assert_eq!(logged_channel("Quest", &channels), Some(&channels[0]));
        assert_eq!(logged_channel(" @Quest ", &channels), Some(&channels[1]));
        assert_eq!(logged_channel("QuestOfficial", &channels), Some(&channels[0]));
        assert_eq!(logged_channel("Map Tales", &channels), Some(&channels[1]));
        assert_eq!(logged_channel("Someone Else", &channels), None);
    }

    #[test]
    fn channel_matches_name_or_handle() {
        let ch = channel("Tiny Trailblazers", "TinyTrailblazers");
        assert!(ch.matches("Tiny Trailblazers"));
        assert!(ch.matches("TinyTrailblazers"));
        assert!(ch.matches("@TinyTrailblazers"));
        assert!(!ch.matches("MagicMap Tales"));
    }

    #[test]
    fn token_file_sits_next_to_credentials() {
        let ch = ChannelConfig {
            name: "KidVenture Quest".into(),
            handle: "KidVentureQuestnw".into(),
            credentials_file: PathBuf::from("secrets/channel2_client_secret.json"),
        };
        assert_eq!(
            ch.token_file(),
            PathBuf::from("secrets/youtube-oauth2-channel2_client_secret.json")
        );
    }

    #[test]
    fn status_cells() {
        assert_eq!(UploadStatus::from_cell(None), Some(UploadStatus::Success));
        assert_eq!(UploadStatus::from_cell(Some("")), Some(UploadStatus::Success));
        assert_eq!(
            UploadStatus::from_cell(Some("FAILED")),
            Some(UploadStatus::Failed)
        );
        assert_eq!(UploadStatus::from_cell(Some("pending")), None);
    }

    #[test]
    fn record_from_failed_outcome() {
        let rec = UploadRecord::new(
            &video("f1", "clip1.mp4"),
            &channel("MagicMap Tales", "MagicMapTales"),
            &Err("quota exceeded".to_string()),
        );
        assert_eq!(rec.status, UploadStatus::Failed);
        assert_eq!(rec.url, "");
        assert_eq!(rec.error, "quota exceeded");
        assert_eq!(rec.channel, "MagicMap Tales");
    }
}
