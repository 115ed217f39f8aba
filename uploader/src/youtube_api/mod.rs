//! The slice of the YouTube Data API v3 needed to publish videos.
//!
//! Uploads use the resumable protocol: a session is opened with the video's metadata, the bytes
//! are `PUT` to the session URL, and an interrupted transfer picks up from the last byte YouTube
//! acknowledged.
//!
//! See: <https://developers.google.com/youtube/v3/guides/using_resumable_upload_protocol>

pub mod channels;
pub mod client;
pub mod types;
pub mod videos;

pub use client::{TimeBoundAccessToken, YouTubeClient};
pub use types::PageInfo;

pub use videos::{Video, VideoInsert, VideoSnippet, VideoStatus};

pub use channels::{Channel, ChannelSnippet};
