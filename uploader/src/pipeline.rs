//! The upload run: discover, dedup, upload, record, notify.
//!
//! Each external collaborator sits behind a small trait so the run can be driven against the real
//! Google/Telegram clients or against in-memory stand-ins. Every call is awaited in turn; channels
//! of one task are attempted one after another and never affect each other.

use crate::error::Error;
use crate::model::{
    ChannelConfig, UploadRecord, UploadTask, UploadedVideo, VideoFile, logged_channel,
};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::Instrument;

/// Where candidate videos come from.
pub trait VideoSource {
    /// Lists candidate videos. With a `limit`, stops looking once that many were found.
    fn discover(&self, limit: Option<usize>) -> impl Future<Output = eyre::Result<Vec<VideoFile>>>;

    /// Downloads a video and its sidecar metadata into `dir`.
    fn stage(&self, file: &VideoFile, dir: &Path) -> impl Future<Output = eyre::Result<UploadTask>>;
}

/// The append-only record of upload attempts, used for deduplication.
pub trait UploadLog {
    /// Channel column values of every *successful* upload recorded for `file_id`.
    fn uploaded_channels(&self, file_id: &str) -> impl Future<Output = eyre::Result<Vec<String>>>;

    fn append(&self, record: &UploadRecord) -> impl Future<Output = eyre::Result<()>>;
}

/// One upload destination.
pub trait VideoHost {
    fn upload(&self, task: &UploadTask) -> impl Future<Output = eyre::Result<UploadedVideo>>;
}

/// Sends human-readable run notifications.
pub trait Notifier {
    fn notify(&self, text: &str) -> impl Future<Output = eyre::Result<()>>;
}

/// A configured channel together with the client that uploads to it.
#[derive(Debug)]
pub struct Destination<H> {
    pub config: ChannelConfig,
    pub host: H,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Process exactly one discovered video.
    pub test_only: bool,
    /// Pause between two uploads, whether to the next channel or with the next video.
    pub upload_delay: Duration,
    /// Pause before the single retry of a failed log append.
    pub record_retry_delay: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            test_only: false,
            upload_delay: Duration::from_secs(5),
            record_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Where a task is in its lifecycle.
///
/// `Discovered → DedupChecked → Uploading → Recorded → Notified`, or one of the terminal states
/// `Skipped` (nothing to do, or the log could not tell us) and `Failed` (outcomes could not be
/// written to the log).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Discovered,
    DedupChecked,
    Uploading,
    Recorded,
    Notified,
    Skipped,
    Failed,
}

/// The result of one upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelOutcome {
    pub channel: ChannelConfig,
    pub result: Result<UploadedVideo, String>,
}

#[derive(Debug, Clone)]
pub struct TaskReport {
    pub file: VideoFile,
    pub state: TaskState,
    pub outcomes: Vec<ChannelOutcome>,
}

impl TaskReport {
    fn skipped(file: VideoFile) -> Self {
        Self {
            file,
            state: TaskState::Skipped,
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub tasks: Vec<TaskReport>,
}

impl RunSummary {
    pub fn skipped(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| t.state == TaskState::Skipped)
            .count()
    }

    pub fn uploads_succeeded(&self) -> usize {
        self.tasks.iter().map(TaskReport::succeeded).sum()
    }

    pub fn uploads_failed(&self) -> usize {
        self.tasks.iter().map(TaskReport::failed).sum()
    }
}

pub struct Pipeline<S, L, H, N> {
    source: S,
    log: L,
    destinations: Vec<Destination<H>>,
    channels: Vec<ChannelConfig>,
    notifier: N,
    options: RunOptions,
}

impl<S, L, H, N> Pipeline<S, L, H, N>
where
    S: VideoSource,
    L: UploadLog,
    H: VideoHost,
    N: Notifier,
{
    pub fn new(
        source: S,
        log: L,
        destinations: Vec<Destination<H>>,
        notifier: N,
        options: RunOptions,
    ) -> Self {
        let channels = destinations.iter().map(|d| d.config.clone()).collect();
        Self {
            source,
            log,
            destinations,
            channels,
            notifier,
            options,
        }
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Runs one pass over the storage folder.
    ///
    /// Fails only if discovery does; every later problem is confined to the task or channel it
    /// happened in and shows up in the returned summary.
    pub async fn run(&self) -> Result<RunSummary, Error> {
        let limit = self.options.test_only.then_some(1);
        let mut files = self
            .source
            .discover(limit)
            .await
            .map_err(Error::Discovery)?;
        if files.is_empty() {
            return Err(Error::Discovery(eyre::eyre!(
                "no videos found in the storage folder"
            )));
        }
        if let Some(limit) = limit {
            files.truncate(limit);
        }
        tracing::info!(
            videos = files.len(),
            channels = self.destinations.len(),
            test_only = self.options.test_only,
            "starting upload run"
        );

        let mut summary = RunSummary::default();
        let mut uploaded_last = false;
        for file in files {
            if uploaded_last && !self.options.upload_delay.is_zero() {
                tokio::time::sleep(self.options.upload_delay).await;
            }
            let span = tracing::info_span!("task", file = %file.name, id = %file.id);
            let report = self.process(file).instrument(span).await;
            uploaded_last = !report.outcomes.is_empty();
            summary.tasks.push(report);
        }

        tracing::info!(
            succeeded = summary.uploads_succeeded(),
            failed = summary.uploads_failed(),
            skipped = summary.skipped(),
            "upload run complete"
        );
        Ok(summary)
    }

    async fn process(&self, file: VideoFile) -> TaskReport {
        let mut state = TaskState::Discovered;
        tracing::debug!(?state, folder = %file.folder_path, "processing video");

        let logged = match self.log.uploaded_channels(&file.id).await {
            Ok(logged) => logged,
            Err(cause) => {
                let e = Error::DedupQuery {
                    file_id: file.id.clone(),
                    cause,
                };
                tracing::warn!(error = %e, "upload history unknown, skipping video");
                return TaskReport::skipped(file);
            }
        };
        state = TaskState::DedupChecked;

        let done: Vec<&str> = logged
            .iter()
            .filter_map(|l| logged_channel(l, &self.channels))
            .map(|ch| ch.name.as_str())
            .collect();
        let mut pending = Vec::new();
        for dest in &self.destinations {
            if done.contains(&dest.config.name.as_str()) {
                tracing::info!(channel = %dest.config.name, "already uploaded, skipping channel");
            } else {
                pending.push(dest);
            }
        }
        if pending.is_empty() {
            tracing::info!("already uploaded to every channel, skipping video");
            return TaskReport::skipped(file);
        }
        tracing::debug!(?state, pending = pending.len(), "dedup check done");

        let staged = match tempfile::Builder::new().prefix("upload-").tempdir() {
            Ok(dir) => self
                .source
                .stage(&file, dir.path())
                .await
                .map(|task| (dir, task)),
            Err(e) => Err(eyre::Report::new(e).wrap_err("create staging directory")),
        };
        let staged = staged.map_err(|e| {
            tracing::error!(error = %format!("{e:#}"), "could not stage video");
            format!("could not stage video: {e:#}")
        });

        state = TaskState::Uploading;
        tracing::debug!(?state);
        let mut outcomes = Vec::with_capacity(pending.len());
        for (i, dest) in pending.into_iter().enumerate() {
            let result = match &staged {
                Ok((_, task)) => {
                    if i > 0 && !self.options.upload_delay.is_zero() {
                        tokio::time::sleep(self.options.upload_delay).await;
                    }
                    self.upload_one(dest, task).await
                }
                Err(reason) => Err(reason.clone()),
            };
            outcomes.push(ChannelOutcome {
                channel: dest.config.clone(),
                result,
            });
        }
        // Removes the staged bytes.
        drop(staged);

        let mut all_recorded = true;
        for outcome in &outcomes {
            let record = UploadRecord::new(&file, &outcome.channel, &outcome.result);
            if let Err(e) = self.record(&record).await {
                tracing::warn!(error = %e, "upload outcome not recorded, it may be repeated");
                all_recorded = false;
            }
        }
        if all_recorded {
            state = TaskState::Recorded;
            tracing::debug!(?state);
        }

        let message = notification_text(&file, &outcomes, self.options.test_only);
        if let Err(e) = self.notifier.notify(&message).await {
            let e = Error::Notify(e);
            tracing::warn!(error = %e, "notification not sent");
        }
        state = if all_recorded {
            TaskState::Notified
        } else {
            TaskState::Failed
        };

        let report = TaskReport {
            file,
            state,
            outcomes,
        };
        tracing::info!(
            ?state,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "video processed"
        );
        report
    }

    async fn upload_one(
        &self,
        dest: &Destination<H>,
        task: &UploadTask,
    ) -> Result<UploadedVideo, String> {
        let channel = &dest.config.name;
        tracing::info!(%channel, title = %task.metadata.title, "uploading");
        match dest.host.upload(task).await {
            Ok(video) => {
                tracing::info!(%channel, url = %video.url, "upload succeeded");
                Ok(video)
            }
            Err(cause) => {
                let reason = format!("{cause:#}");
                let e = Error::Upload {
                    channel: channel.clone(),
                    cause,
                };
                tracing::error!(error = %e, "upload failed");
                Err(reason)
            }
        }
    }

    /// Appends a record, retrying once.
    async fn record(&self, record: &UploadRecord) -> Result<(), Error> {
        let Err(first) = self.log.append(record).await else {
            return Ok(());
        };
        tracing::warn!(
            error = %format!("{first:#}"),
            channel = %record.channel,
            "could not append to upload log, retrying once"
        );
        if !self.options.record_retry_delay.is_zero() {
            tokio::time::sleep(self.options.record_retry_delay).await;
        }
        self.log
            .append(record)
            .await
            .map_err(|cause| Error::RecordAppend {
                file_id: record.file_id.clone(),
                channel: record.channel.clone(),
                cause,
            })
    }
}

/// The chat message summarizing one task.
pub fn notification_text(file: &VideoFile, outcomes: &[ChannelOutcome], test_only: bool) -> String {
    let succeeded = outcomes.iter().filter(|o| o.result.is_ok()).count();
    let failed = outcomes.len() - succeeded;
    let icon = match (succeeded, failed) {
        (_, 0) => "✅",
        (0, _) => "❌",
        _ => "⚠️",
    };
    let prefix = if test_only { "🧪 Test upload" } else { "Upload" };

    let mut text = format!(
        "{icon} {prefix}: {name}\n📁 {folder}\n{succeeded} succeeded, {failed} failed",
        name = file.name,
        folder = file.folder_path,
    );
    for outcome in outcomes {
        let line = match &outcome.result {
            Ok(video) => format!("\n🎬 {}: {}", outcome.channel.name, video.url),
            Err(reason) => format!("\n❌ {}: {}", outcome.channel.name, reason),
        };
        text.push_str(&line);
    }
    text
}
