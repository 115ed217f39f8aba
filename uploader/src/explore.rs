//! Looking around a Drive before the first upload run.
//!
//! These lookups help pick the folder to set as `DRIVE_FOLDER_ID`, and show which videos still
//! lack sidecar files. Nothing here writes to Drive.

use crate::drive::{DriveClient, DriveFile, FOLDER_MIME_TYPE, SIDECAR_FILES, join_path, quote};
use eyre::Context;
use std::collections::HashMap;
use tracing::instrument;

/// Folder names containing one of these are more likely to hold the videos.
const FOLDER_KEYWORDS: [&str; 5] = ["story", "stories", "video", "upload", "content"];

/// Parent chains longer than this are cut short when building a path.
const MAX_PATH_DEPTH: usize = 32;

pub fn file_icon(mime_type: &str) -> &'static str {
    match mime_type {
        FOLDER_MIME_TYPE => "📁",
        m if m.starts_with("image/") => "🖼️",
        m if m.starts_with("video/") => "🎬",
        m if m.starts_with("audio/") => "🔊",
        m if m.starts_with("text/") => "📄",
        "application/pdf" => "📑",
        m if m.contains("spreadsheet") => "📊",
        m if m.contains("document") => "📝",
        m if m.contains("presentation") => "📽️",
        _ => "📦",
    }
}

pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    for unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.2} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.2} PB")
}

/// One line of a folder tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeLine {
    pub depth: usize,
    pub text: String,
}

impl std::fmt::Display for TreeLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", "  ".repeat(self.depth), self.text)
    }
}

/// A video somewhere in the Drive, with what sits next to it.
#[derive(Debug, Clone)]
pub struct VideoLocation {
    pub video: DriveFile,
    pub folder_id: String,
    pub folder_path: String,
    /// The sidecar files present in the video's folder.
    pub sidecars: Vec<&'static str>,
}

impl VideoLocation {
    pub fn missing(&self) -> Vec<&'static str> {
        SIDECAR_FILES
            .into_iter()
            .filter(|f| !self.sidecars.contains(f))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.missing().is_empty()
    }
}

/// A folder whose name matched a search.
#[derive(Debug, Clone)]
pub struct FolderMatch {
    pub folder: DriveFile,
    pub path: String,
    pub direct_videos: usize,
    /// Subfolders holding videos, with their video counts.
    pub video_subfolders: Vec<(DriveFile, usize)>,
}

/// How well a folder fits as the storage folder.
#[derive(Debug, Clone)]
pub struct FolderScore {
    pub folder: DriveFile,
    pub score: u64,
    pub direct_videos: usize,
    pub video_subfolders: Vec<(String, usize)>,
}

impl FolderScore {
    pub fn total_videos(&self) -> usize {
        self.direct_videos + self.video_subfolders.iter().map(|(_, n)| n).sum::<usize>()
    }
}

/// Rates a folder by the videos in it and one level below.
///
/// Several subfolders with videos is the layout uploads expect, so that weighs most. Subfolders
/// named like stories and folder names with upload-related words add to it.
pub fn score(folder_name: &str, direct_videos: usize, subfolders: &[(String, usize)]) -> u64 {
    let with_videos: Vec<_> = subfolders.iter().filter(|(_, n)| *n > 0).collect();
    let mut score = direct_videos as u64 * 5;
    if with_videos.len() > 1 {
        score += with_videos.len() as u64 * 20;
        score += with_videos.iter().map(|(_, n)| *n as u64).sum::<u64>() * 2;
    }
    let story_subfolders = with_videos
        .iter()
        .filter(|(name, _)| name.to_lowercase().contains("story"))
        .count();
    score += story_subfolders as u64 * 30;

    let name = folder_name.to_lowercase();
    score += FOLDER_KEYWORDS
        .iter()
        .filter(|keyword| name.contains(*keyword))
        .count() as u64
        * 50;
    score
}

fn all_videos_query() -> String {
    "mimeType contains 'video/' and trashed = false".to_string()
}

fn folders_named_query(name: &str) -> String {
    format!(
        "name contains {} and mimeType = '{FOLDER_MIME_TYPE}' and trashed = false",
        quote(name)
    )
}

#[derive(Debug)]
pub struct Explorer {
    drive: DriveClient,
}

impl Explorer {
    pub fn new(drive: DriveClient) -> Self {
        Self { drive }
    }

    /// The folder tree below `folder_id`, files listed under their folder.
    #[instrument(skip(self))]
    pub async fn tree(&self, folder_id: &str, max_depth: usize) -> eyre::Result<Vec<TreeLine>> {
        let root = self
            .drive
            .get(folder_id)
            .await
            .context("look up starting folder")?;
        let mut lines = Vec::new();
        let mut stack = vec![(root.id, root.name, 0usize)];
        while let Some((id, path, depth)) = stack.pop() {
            lines.push(TreeLine {
                depth,
                text: format!("📁 {path} ({id})"),
            });
            let line = |text: String| TreeLine {
                depth: depth + 1,
                text,
            };
            if depth >= max_depth {
                lines.push(line("[max depth reached]".to_string()));
                continue;
            }
            let children = match self.drive.children(&id).await {
                Ok(children) => children,
                Err(e) => {
                    tracing::warn!(folder = %path, error = %format!("{e:#}"), "could not list folder");
                    lines.push(line(format!("[unreadable: {e}]")));
                    continue;
                }
            };
            if children.is_empty() {
                lines.push(line("[empty]".to_string()));
                continue;
            }

            let (folders, files): (Vec<_>, Vec<_>) =
                children.into_iter().partition(DriveFile::is_folder);
            for file in files {
                let size = file
                    .size_bytes()
                    .map(format_size)
                    .unwrap_or_else(|| "N/A".to_string());
                lines.push(line(format!(
                    "{} {} ({size}) ({})",
                    file_icon(&file.mime_type),
                    file.name,
                    file.id
                )));
            }
            for folder in folders.into_iter().rev() {
                stack.push((folder.id, join_path(&path, &folder.name), depth + 1));
            }
        }
        Ok(lines)
    }

    /// A folder's path from the top of its drive, e.g. `My Drive/Stories/Episode 1`.
    pub async fn path_of(&self, folder_id: &str) -> eyre::Result<String> {
        let mut names = Vec::new();
        let mut next = Some(folder_id.to_string());
        while let Some(id) = next.take() {
            let folder = self.drive.get(&id).await?;
            names.push(folder.name);
            if names.len() < MAX_PATH_DEPTH {
                next = folder.parents.into_iter().next();
            }
        }
        names.reverse();
        Ok(names.join("/"))
    }

    /// The sidecar files present in a folder.
    pub async fn sidecars(&self, folder_id: &str) -> eyre::Result<Vec<&'static str>> {
        let names: Vec<String> = self
            .drive
            .children(folder_id)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        Ok(SIDECAR_FILES
            .into_iter()
            .filter(|s| names.iter().any(|n| n == s))
            .collect())
    }

    /// Every video visible to the credentials, wherever it is.
    ///
    /// A folder whose path or contents cannot be read is reported with what could be found.
    #[instrument(skip(self))]
    pub async fn find_videos(&self) -> eyre::Result<Vec<VideoLocation>> {
        let videos = self
            .drive
            .search(&all_videos_query())
            .await
            .context("search for videos")?;

        let mut folders: HashMap<String, (String, Vec<&'static str>)> = HashMap::new();
        let mut found = Vec::with_capacity(videos.len());
        for video in videos {
            let folder_id = video.parents.first().cloned().unwrap_or_default();
            if !folders.contains_key(&folder_id) {
                let path = self.path_of(&folder_id).await.unwrap_or_else(|e| {
                    tracing::warn!(folder = %folder_id, error = %format!("{e:#}"), "could not resolve folder path");
                    format!("unknown ({folder_id})")
                });
                let sidecars = self.sidecars(&folder_id).await.unwrap_or_else(|e| {
                    tracing::warn!(folder = %folder_id, error = %format!("{e:#}"), "could not list sidecar files");
                    Vec::new()
                });
                folders.insert(folder_id.clone(), (path, sidecars));
            }
            let (folder_path, sidecars) = folders[&folder_id].clone();
            found.push(VideoLocation {
                video,
                folder_id,
                folder_path,
                sidecars,
            });
        }
        Ok(found)
    }

    /// Folders whose name contains `name`, with the videos in and right below each.
    #[instrument(skip(self))]
    pub async fn find_folders(&self, name: &str) -> eyre::Result<Vec<FolderMatch>> {
        let folders = self
            .drive
            .search(&folders_named_query(name))
            .await
            .context("search for folders")?;
        let mut matches = Vec::with_capacity(folders.len());
        for folder in folders {
            let path = self
                .path_of(&folder.id)
                .await
                .unwrap_or_else(|_| folder.name.clone());
            let direct_videos = self.drive.videos(&folder.id).await?.len();
            let mut video_subfolders = Vec::new();
            for sub in self.drive.folders(&folder.id).await? {
                let n = self.drive.videos(&sub.id).await?.len();
                if n > 0 {
                    video_subfolders.push((sub, n));
                }
            }
            matches.push(FolderMatch {
                folder,
                path,
                direct_videos,
                video_subfolders,
            });
        }
        Ok(matches)
    }

    /// Ranks the folders directly inside `parent_id` as candidates for `DRIVE_FOLDER_ID`.
    ///
    /// Folders that score nothing are left out; the best candidate comes first.
    #[instrument(skip(self))]
    pub async fn suggest(&self, parent_id: &str) -> eyre::Result<Vec<FolderScore>> {
        let mut scored = Vec::new();
        for folder in self
            .drive
            .folders(parent_id)
            .await
            .context("list top-level folders")?
        {
            let direct_videos = self.drive.videos(&folder.id).await?.len();
            let mut video_subfolders = Vec::new();
            for sub in self.drive.folders(&folder.id).await? {
                let n = self.drive.videos(&sub.id).await?.len();
                if n > 0 {
                    video_subfolders.push((sub.name, n));
                }
            }
            let score = score(&folder.name, direct_videos, &video_subfolders);
            tracing::debug!(folder = %folder.name, score, "scored folder");
            if score > 0 {
                scored.push(FolderScore {
                    folder,
                    score,
                    direct_videos,
                    video_subfolders,
                });
            }
        }
        scored.sort_by(|a, b| b.score.cmp(&a.score));
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::google::GoogleAuth;
    use crate::mock_api::{MockApi, Recorded, Reply};
    use pretty_assertions::assert_eq;
    use serde_json::{Value, json};
    use std::time::Duration;

    #[test]
    fn sizes_are_human_readable() {
        assert_eq!(format_size(512), "512.00 B");
        assert_eq!(format_size(1536), "1.50 KB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn icons_follow_mime_types() {
        assert_eq!(file_icon("video/mp4"), "🎬");
        assert_eq!(file_icon("image/jpeg"), "🖼️");
        assert_eq!(file_icon("text/plain"), "📄");
        assert_eq!(file_icon(FOLDER_MIME_TYPE), "📁");
        assert_eq!(file_icon("application/vnd.google-apps.spreadsheet"), "📊");
    }

    #[test]
    fn collections_of_story_folders_score_highest() {
        let stories = vec![
            ("Story 1".to_string(), 2),
            ("Story 2".to_string(), 1),
            ("Drafts".to_string(), 0),
        ];
        // 2 subfolders * 20 + 3 videos * 2 + 2 story folders * 30 + "stories"
        assert_eq!(score("Kids Stories", 0, &stories), 40 + 6 + 60 + 50);
        assert_eq!(score("Holiday", 4, &[]), 20);
        // a single video subfolder is no collection
        assert_eq!(score("Misc", 0, &[("Clips".to_string(), 3)]), 0);
    }

    #[test]
    fn readiness_needs_every_sidecar() {
        let video: DriveFile =
            serde_json::from_value(json!({"id": "v1", "name": "clip1.mp4"})).unwrap();
        let mut location = VideoLocation {
            video,
            folder_id: "ep1".into(),
            folder_path: "Stories/Episode 1".into(),
            sidecars: vec!["title.txt", "tags.txt"],
        };
        assert!(!location.is_ready());
        assert_eq!(location.missing(), vec!["description.txt", "thumbnail.jpg"]);
        location.sidecars = SIDECAR_FILES.to_vec();
        assert!(location.is_ready());
    }

    fn folder(id: &str, name: &str, parent: &str) -> Value {
        json!({"id": id, "name": name, "mimeType": FOLDER_MIME_TYPE, "parents": [parent]})
    }

    fn file(id: &str, name: &str, mime: &str, parent: &str) -> Value {
        json!({"id": id, "name": name, "mimeType": mime, "size": "2048", "parents": [parent]})
    }

    /// My Drive/
    ///   Kids Stories/ (Story 1: 2 clips, Story 2: 1 clip + sidecars)
    ///   Holiday/ (1 clip)
    ///   Empty/
    fn drive(req: &Recorded) -> Reply {
        let items: HashMap<&str, Value> = HashMap::from([
            ("root", json!({"id": "root", "name": "My Drive", "mimeType": FOLDER_MIME_TYPE})),
            ("ks", folder("ks", "Kids Stories", "root")),
            ("s1", folder("s1", "Story 1", "ks")),
            ("s2", folder("s2", "Story 2", "ks")),
            ("hol", folder("hol", "Holiday", "root")),
            ("empty", folder("empty", "Empty", "root")),
            ("c1", file("c1", "a.mp4", "video/mp4", "s1")),
            ("c2", file("c2", "b.mp4", "video/mp4", "s1")),
            ("c3", file("c3", "c.mp4", "video/mp4", "s2")),
            ("t3", file("t3", "title.txt", "text/plain", "s2")),
            ("d3", file("d3", "description.txt", "text/plain", "s2")),
            ("g3", file("g3", "tags.txt", "text/plain", "s2")),
            ("p3", file("p3", "thumbnail.jpg", "image/jpeg", "s2")),
            ("h1", file("h1", "beach.mov", "video/quicktime", "hol")),
        ]);
        if let Some(id) = req.path.strip_prefix("/drive/v3/files/") {
            return match items.get(id) {
                Some(item) => Reply::json(item.clone()),
                None => Reply::status(404),
            };
        }

        let q = req.param("q");
        let parent = q
            .split(" in parents")
            .next()
            .filter(|_| q.contains(" in parents"))
            .and_then(|p| p.trim_end_matches('\'').rsplit('\'').next());
        let mut files: Vec<Value> = items
            .values()
            .filter(|item| match parent {
                Some(parent) => item["parents"][0] == parent,
                None => true,
            })
            .filter(|item| {
                let mime = item["mimeType"].as_str().unwrap_or("");
                if q.contains("mimeType contains 'video/'") {
                    mime.starts_with("video/")
                } else if q.contains(&format!("mimeType = '{FOLDER_MIME_TYPE}'")) {
                    mime == FOLDER_MIME_TYPE
                        && q.split("name contains '")
                            .nth(1)
                            .and_then(|rest| rest.split('\'').next())
                            .is_none_or(|name| item["name"].as_str().unwrap().contains(name))
                } else {
                    item["id"] != "root"
                }
            })
            .cloned()
            .collect();
        // folders first, then by name
        files.sort_by_key(|f| (f["mimeType"] != FOLDER_MIME_TYPE, f["name"].to_string()));
        Reply::json(json!({ "files": files }))
    }

    fn explorer(api: &MockApi) -> Explorer {
        let drive = DriveClient::new(
            reqwest::Client::new(),
            GoogleAuth::ApiKey("drive-key".into()),
            "root",
            2,
            Duration::from_secs(5),
        )
        .with_base_url(&api.url);
        Explorer::new(drive)
    }

    #[tokio::test]
    async fn suggests_the_story_collection() {
        let api = MockApi::start(drive).await;

        let ranked = explorer(&api).suggest("root").await.unwrap();

        let names: Vec<_> = ranked.iter().map(|s| s.folder.name.as_str()).collect();
        assert_eq!(names, vec!["Kids Stories", "Holiday"]);
        assert_eq!(ranked[0].total_videos(), 3);
        assert_eq!(
            ranked[0].video_subfolders,
            vec![("Story 1".to_string(), 2), ("Story 2".to_string(), 1)]
        );
        assert_eq!(ranked[1].direct_videos, 1);
    }

    #[tokio::test]
    async fn videos_are_located_with_their_sidecars() {
        let api = MockApi::start(drive).await;

        let mut found = explorer(&api).find_videos().await.unwrap();
        found.sort_by(|a, b| a.video.name.cmp(&b.video.name));

        let summary: Vec<_> = found
            .iter()
            .map(|v| (v.video.name.as_str(), v.folder_path.as_str(), v.is_ready()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.mp4", "My Drive/Kids Stories/Story 1", false),
                ("b.mp4", "My Drive/Kids Stories/Story 1", false),
                ("beach.mov", "My Drive/Holiday", false),
                ("c.mp4", "My Drive/Kids Stories/Story 2", true),
            ]
        );
        assert_eq!(found[0].missing(), SIDECAR_FILES.to_vec());
    }

    #[tokio::test]
    async fn folders_are_found_by_name() {
        let api = MockApi::start(drive).await;

        let matches = explorer(&api).find_folders("Stories").await.unwrap();

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].path, "My Drive/Kids Stories");
        assert_eq!(matches[0].direct_videos, 0);
        let subs: Vec<_> = matches[0]
            .video_subfolders
            .iter()
            .map(|(f, n)| (f.name.as_str(), *n))
            .collect();
        assert_eq!(subs, vec![("Story 1", 2), ("Story 2", 1)]);
    }

    #[tokio::test]
    async fn tree_lists_folders_and_files() {
        let api = MockApi::start(drive).await;

        let lines = explorer(&api).tree("root", 2).await.unwrap();

        let rendered: Vec<String> = lines.iter().map(ToString::to_string).collect();
        assert_eq!(
            rendered,
            vec![
                "📁 My Drive (root)",
                "  📁 My Drive/Empty (empty)",
                "    [empty]",
                "  📁 My Drive/Holiday (hol)",
                "    🎬 beach.mov (2.00 KB) (h1)",
                "  📁 My Drive/Kids Stories (ks)",
                "    📁 My Drive/Kids Stories/Story 1 (s1)",
                "      [max depth reached]",
                "    📁 My Drive/Kids Stories/Story 2 (s2)",
                "      [max depth reached]",
            ]
        );
    }
}
