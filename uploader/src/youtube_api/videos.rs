//! YouTube Videos API types.

use crate::model::{PrivacyStatus, VideoMetadata};
use serde::{Deserialize, Serialize};

/// Longest title YouTube accepts, in characters.
const MAX_TITLE_CHARS: usize = 100;

/// Longest description YouTube accepts, in bytes.
const MAX_DESCRIPTION_BYTES: usize = 5000;

/// The request body of `videos.insert`.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/insert>
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoInsert {
    pub snippet: VideoSnippet,
    pub status: VideoStatus,
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#snippet>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSnippet {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category_id: String,
}

/// See: <https://developers.google.com/youtube/v3/docs/videos#status>
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoStatus {
    pub privacy_status: PrivacyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_status: Option<String>,
}

/// A `video` resource as returned by a finished upload.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos#resource>
#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    /// The ID that YouTube uses to uniquely identify the video.
    pub id: String,
    pub snippet: Option<VideoSnippet>,
    pub status: Option<VideoStatus>,
}

/// YouTube rejects angle brackets in titles and descriptions.
fn strip_brackets(s: &str) -> String {
    s.chars().filter(|c| !matches!(c, '<' | '>')).collect()
}

fn truncate_bytes(mut s: String, max: usize) -> String {
    if s.len() > max {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s.truncate(end);
    }
    s
}

impl VideoInsert {
    /// Builds an insert request from metadata, trimmed to what YouTube will accept.
    pub fn from_metadata(meta: &VideoMetadata) -> Self {
        let mut title: String = strip_brackets(meta.title.trim())
            .chars()
            .take(MAX_TITLE_CHARS)
            .collect();
        if title.trim().is_empty() {
            title = "Untitled".to_string();
        }
        Self {
            snippet: VideoSnippet {
                title,
                description: truncate_bytes(
                    strip_brackets(&meta.description),
                    MAX_DESCRIPTION_BYTES,
                ),
                tags: meta.tags.clone(),
                category_id: meta.category_id.clone(),
            },
            status: VideoStatus {
                privacy_status: meta.privacy_status,
                upload_status: None,
            },
        }
    }
}
