//! Background download jobs
//!
//! At most one job runs per video id. A job owns its downloader process
//! and a cancellation token; the HTTP layer only ever reads the job's
//! status. Terminal jobs stay visible for a short retention window so a
//! client polling once more still sees how it ended.

use super::progress::{ProgressParser, truncate_message};
use crate::{Error, Result, config::Settings, types::watch_url};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const ERROR_MESSAGE_LIMIT: usize = 100;

/// Lifecycle of a download as seen by a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    Starting,
    Downloading,
    Finished,
    Error,
    Cancelled,
    /// Finished file on disk with no tracked job
    Ready,
    NotFound,
}

impl DownloadState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Finished | DownloadState::Error | DownloadState::Cancelled
        )
    }
}

/// Poll result for one video id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadStatus {
    pub status: DownloadState,
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl DownloadStatus {
    fn new(status: DownloadState, progress: f64, message: impl Into<String>) -> Self {
        Self {
            status,
            progress,
            message: message.into(),
            url: None,
        }
    }

    fn with_url(mut self, video_id: &str) -> Self {
        self.url = Some(stream_url(video_id));
        self
    }
}

/// Where a finished download is served from
pub fn stream_url(video_id: &str) -> String {
    format!("/api/stream/{}", video_id)
}

/// Downloader format selector for a height ceiling; 0 means best available
pub fn format_selector(max_height: u32) -> String {
    if max_height > 0 {
        format!(
            "bestvideo[height<={h}][ext=mp4]+bestaudio[ext=m4a]/bestvideo[height<={h}]+bestaudio/best[height<={h}]",
            h = max_height
        )
    } else {
        "bestvideo[ext=mp4]+bestaudio[ext=m4a]/bestvideo+bestaudio/best".to_string()
    }
}

/// Tracker configuration
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub dir: PathBuf,
    pub binary: String,
    pub proxy: Option<String>,
    pub cancel_grace: Duration,
    pub retention: Duration,
    pub start_delay: Duration,
}

impl DownloadConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let download = &settings.download;
        Self {
            dir: settings.download_dir(),
            binary: download.binary.clone(),
            proxy: settings.get_proxy_url(),
            cancel_grace: Duration::from_secs(download.cancel_grace_secs),
            retention: Duration::from_secs(download.retention_secs),
            start_delay: Duration::from_millis(download.start_delay_ms),
        }
    }
}

struct Job {
    generation: u64,
    status: DownloadStatus,
    cancel: CancellationToken,
    /// Flips to true once the process has exited and files are settled
    settled: watch::Receiver<bool>,
}

#[derive(Default)]
struct Jobs {
    next_generation: u64,
    by_id: HashMap<String, Job>,
}

type SharedJobs = Arc<Mutex<Jobs>>;

fn update(jobs: &SharedJobs, video_id: &str, generation: u64, apply: impl FnOnce(&mut DownloadStatus)) {
    if let Some(job) = jobs.lock().by_id.get_mut(video_id)
        && job.generation == generation
    {
        apply(&mut job.status);
    }
}

/// Registry of download jobs keyed by video id
pub struct DownloadTracker {
    config: DownloadConfig,
    jobs: SharedJobs,
}

impl DownloadTracker {
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            jobs: Arc::new(Mutex::new(Jobs::default())),
        }
    }

    pub fn file_path(&self, video_id: &str) -> PathBuf {
        self.config.dir.join(format!("{}.mp4", video_id))
    }

    /// Empty the download directory; files from a previous run are stale
    pub async fn reset_dir(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.dir).await?;
        let mut entries = tokio::fs::read_dir(&self.config.dir).await?;
        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not delete {:?}: {}", path, e),
            }
        }
        info!("Cleared downloads cache ({} entries)", removed);
        Ok(())
    }

    fn build_command(&self, video_id: &str, quality: u32) -> Command {
        let mut command = Command::new(&self.config.binary);
        command
            .arg("-f")
            .arg(format_selector(quality))
            .args(["--merge-output-format", "mp4"])
            .arg("-o")
            .arg(self.file_path(video_id))
            .args(["--no-warnings", "--progress", "--newline"]);
        if let Some(proxy) = &self.config.proxy {
            command.arg("--proxy").arg(proxy);
        }
        command
            .arg(watch_url(video_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// Start a download for `video_id` unless one is tracked or finished
    pub async fn start_or_attach(&self, video_id: &str, quality: u32) -> DownloadStatus {
        let path = self.file_path(video_id);
        let generation = {
            let mut jobs = self.jobs.lock();
            if let Some(job) = jobs.by_id.get(video_id) {
                return job.status.clone().with_url(video_id);
            }
            if path.exists() {
                return DownloadStatus::new(DownloadState::Ready, 100.0, "Ready").with_url(video_id);
            }

            jobs.next_generation += 1;
            let generation = jobs.next_generation;
            let cancel = CancellationToken::new();
            let (settled_tx, settled_rx) = watch::channel(false);
            jobs.by_id.insert(
                video_id.to_string(),
                Job {
                    generation,
                    status: DownloadStatus::new(DownloadState::Starting, 0.0, "Starting..."),
                    cancel: cancel.clone(),
                    settled: settled_rx,
                },
            );

            let run = JobRun {
                jobs: self.jobs.clone(),
                video_id: video_id.to_string(),
                generation,
                path,
                dir: self.config.dir.clone(),
                cancel,
                grace: self.config.cancel_grace,
                retention: self.config.retention,
            };
            info!(
                "Starting download for {} (quality={})",
                video_id,
                if quality > 0 { quality.to_string() } else { "best".to_string() }
            );
            let command = self.build_command(video_id, quality);
            tokio::spawn(run.drive(command, settled_tx));
            generation
        };

        // Long enough for a quick failure to surface in the answer
        tokio::time::sleep(self.config.start_delay).await;
        let jobs = self.jobs.lock();
        match jobs.by_id.get(video_id) {
            Some(job) if job.generation == generation => job.status.clone().with_url(video_id),
            _ => DownloadStatus::new(DownloadState::Downloading, 0.0, "Starting...").with_url(video_id),
        }
    }

    pub fn progress(&self, video_id: &str) -> DownloadStatus {
        if let Some(job) = self.jobs.lock().by_id.get(video_id) {
            return job.status.clone();
        }
        if self.file_path(video_id).exists() {
            DownloadStatus::new(DownloadState::Ready, 100.0, "Ready")
        } else {
            DownloadStatus::new(DownloadState::NotFound, 0.0, "Not found")
        }
    }

    /// Stop the job for `video_id` and delete its files
    pub async fn cancel(&self, video_id: &str) -> DownloadStatus {
        let settled = {
            let mut jobs = self.jobs.lock();
            jobs.by_id.get_mut(video_id).map(|job| {
                job.cancel.cancel();
                if !job.status.status.is_terminal() {
                    job.status = DownloadStatus::new(DownloadState::Cancelled, job.status.progress, "Cancelled");
                }
                job.settled.clone()
            })
        };

        if let Some(mut settled) = settled {
            let wait = self.config.cancel_grace + Duration::from_secs(1);
            if tokio::time::timeout(wait, settled.wait_for(|done| *done))
                .await
                .is_err()
            {
                warn!("Download {} did not settle after cancel", video_id);
            }
            info!("Cancelled download for {}", video_id);
        }

        remove_files_for(&self.config.dir, video_id).await;
        DownloadStatus::new(DownloadState::Cancelled, 0.0, "Cancelled")
    }

    pub fn active_count(&self) -> usize {
        self.jobs.lock().by_id.len()
    }
}

/// Delete `{video_id}.*` from `dir`
async fn remove_files_for(dir: &Path, video_id: &str) {
    let prefix = format!("{}.", video_id);
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry.file_name().to_string_lossy().starts_with(&prefix)
            && let Err(e) = tokio::fs::remove_file(entry.path()).await
        {
            warn!("Could not delete {:?}: {}", entry.path(), e);
        }
    }
}

/// Ask the process to stop, then kill it after `grace`
async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;
        if let Some(pid) = child.id().and_then(|id| i32::try_from(id).ok()) {
            let _ = kill(Pid::from_raw(pid), Signal::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("Downloader ignored terminate, killing");
            child.kill().await?;
            child.wait().await
        }
    }
}

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

struct JobRun {
    jobs: SharedJobs,
    video_id: String,
    generation: u64,
    path: PathBuf,
    dir: PathBuf,
    cancel: CancellationToken,
    grace: Duration,
    retention: Duration,
}

impl JobRun {
    async fn drive(self, mut command: Command, settled: watch::Sender<bool>) {
        if let Err(e) = self.run(&mut command).await {
            error!("Download error for {}: {}", self.video_id, e);
            update(&self.jobs, &self.video_id, self.generation, |s| {
                if s.status != DownloadState::Cancelled {
                    *s = DownloadStatus::new(
                        DownloadState::Error,
                        s.progress,
                        truncate_message(&e.to_string(), ERROR_MESSAGE_LIMIT),
                    );
                }
            });
        }
        let _ = settled.send(true);

        tokio::time::sleep(self.retention).await;
        let mut jobs = self.jobs.lock();
        if jobs
            .by_id
            .get(&self.video_id)
            .is_some_and(|j| j.generation == self.generation)
        {
            jobs.by_id.remove(&self.video_id);
        }
    }

    async fn run(&self, command: &mut Command) -> Result<()> {
        update(&self.jobs, &self.video_id, self.generation, |s| {
            if s.status == DownloadState::Starting {
                *s = DownloadStatus::new(DownloadState::Downloading, 0.0, "Downloading...");
            }
        });

        let mut child = command
            .spawn()
            .map_err(|e| Error::subprocess("downloader", format!("spawn failed: {}", e)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::internal("downloader stdout not captured"))?;
        let stderr = child.stderr.take();

        // Keep the last stderr line for the error message
        let last_error = Arc::new(Mutex::new(String::new()));
        let stderr_task = stderr.map(|stderr| {
            let last_error = last_error.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        *last_error.lock() = line.trim().to_string();
                    }
                }
            })
        });

        let mut lines = BufReader::new(stdout).lines();
        let mut parser = ProgressParser::new();
        let ending = loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break Ending::Cancelled,
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if let Some(progress) = parser.feed(&line) {
                            update(&self.jobs, &self.video_id, self.generation, |s| {
                                if s.status == DownloadState::Downloading {
                                    if let Some(pct) = progress.progress {
                                        s.progress = pct;
                                    }
                                    s.message = progress.message;
                                }
                            });
                        }
                    }
                    Ok(None) | Err(_) => {
                        break tokio::select! {
                            _ = self.cancel.cancelled() => Ending::Cancelled,
                            status = child.wait() => Ending::Exited(status),
                        };
                    }
                },
            }
        };

        let status = match ending {
            Ending::Cancelled => {
                if let Err(e) = terminate(&mut child, self.grace).await {
                    warn!("Could not stop downloader for {}: {}", self.video_id, e);
                }
                remove_files_for(&self.dir, &self.video_id).await;
                return Ok(());
            }
            Ending::Exited(status) => status?,
        };
        if let Some(task) = stderr_task {
            let _ = task.await;
        }

        if status.success() && tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let size = tokio::fs::metadata(&self.path).await.map(|m| m.len()).unwrap_or(0);
            info!("Complete: {} ({} bytes)", self.video_id, size);
            update(&self.jobs, &self.video_id, self.generation, |s| {
                *s = DownloadStatus::new(DownloadState::Finished, 100.0, "Complete");
            });
            return Ok(());
        }

        let detail = last_error.lock().clone();
        let message = if detail.is_empty() {
            "Download failed".to_string()
        } else {
            detail
        };
        Err(Error::subprocess("downloader", message))
    }
}
