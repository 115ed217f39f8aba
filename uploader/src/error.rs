//! Failure classes of an upload run.
//!
//! Only [`Error::Configuration`] and [`Error::Discovery`] end a run. The other variants are caught
//! at the boundary of the stage that produced them, logged, and the pipeline moves on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Missing or malformed settings. Raised before any external call is made.
    #[error("configuration error: {0:#}")]
    Configuration(eyre::Report),

    /// The storage folder could not be listed, or holds no videos.
    #[error("discovery error: {0:#}")]
    Discovery(eyre::Report),

    /// The upload log could not be queried; the task is skipped.
    #[error("could not query upload log for {file_id}: {cause:#}")]
    DedupQuery {
        file_id: String,
        cause: eyre::Report,
    },

    /// Uploading to one channel failed. Other channels are unaffected.
    #[error("upload to {channel} failed: {cause:#}")]
    Upload {
        channel: String,
        cause: eyre::Report,
    },

    /// An upload happened but could not be written to the log, so it may be repeated later.
    #[error("could not record upload of {file_id} to {channel}: {cause:#}")]
    RecordAppend {
        file_id: String,
        channel: String,
        cause: eyre::Report,
    },

    #[error("could not send notification: {0:#}")]
    Notify(eyre::Report),
}

impl Error {
    /// Whether this error ends the run with a non-zero exit code.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Discovery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_and_discovery_are_fatal() {
        assert!(Error::Configuration(eyre::eyre!("missing key")).is_fatal());
        assert!(Error::Discovery(eyre::eyre!("empty folder")).is_fatal());
        assert!(!Error::Notify(eyre::eyre!("telegram down")).is_fatal());
        assert!(
            !Error::Upload {
                channel: "Tiny Trailblazers".into(),
                cause: eyre::eyre!("quota"),
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_include_the_cause_chain() {
        let e = Error::Discovery(eyre::eyre!("folder is empty").wrap_err("list videos"));
        assert_eq!(e.to_string(), "discovery error: list videos: folder is empty");
    }
}
