//! Metadata resolver seam and its yt-dlp implementation
//!
//! The relay never scrapes anything itself. All metadata, format lists,
//! search listings and subtitle files come from a [`Resolver`], which in
//! production shells out to `yt-dlp` once per call.

use crate::{
    Error, Result,
    config::Settings,
    types::{ListingEntry, VideoInfo, watch_url},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Which identity an extraction runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Credentials {
    Anonymous,
    /// Signed-in browser cookies
    Cookies,
}

/// Channel listing result
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelListing {
    pub channel: String,
    pub entries: Vec<ListingEntry>,
}

#[async_trait]
pub trait Resolver: Send + Sync {
    /// Full metadata and format list for one video
    async fn resolve(&self, video_id: &str, credentials: Credentials) -> Result<VideoInfo>;

    /// Whether a cookie source is configured at all
    fn has_authenticated(&self) -> bool;

    async fn search(&self, query: &str, count: usize) -> Result<Vec<ListingEntry>>;

    async fn channel_videos(&self, channel_id: &str, count: usize) -> Result<ChannelListing>;

    /// Write `{video_id}*.{lang}.vtt` into `out_dir`
    async fn download_subtitle(&self, video_id: &str, lang: &str, out_dir: &Path) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct FlatPlaylist {
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    entries: Vec<Option<ListingEntry>>,
}

/// Cookie source handed to yt-dlp
#[derive(Debug, Clone, PartialEq)]
pub enum CookieSource {
    Browser(String),
    File(PathBuf),
}

/// Resolver backed by the `yt-dlp` command line
#[derive(Debug, Clone)]
pub struct YtDlpResolver {
    binary: String,
    cookies: Option<CookieSource>,
    proxy: Option<String>,
    timeout: Duration,
}

impl YtDlpResolver {
    pub fn new(binary: impl Into<String>, cookies: Option<CookieSource>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            cookies,
            proxy: None,
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let extraction = &settings.extraction;
        let cookies = extraction
            .cookies_browser
            .clone()
            .filter(|b| !b.is_empty())
            .map(CookieSource::Browser)
            .or_else(|| extraction.cookies_file.clone().map(CookieSource::File));
        Self {
            binary: extraction.binary.clone(),
            cookies,
            proxy: settings.get_proxy_url(),
            timeout: Duration::from_secs(extraction.timeout_secs),
        }
    }

    fn base_args(&self, credentials: Credentials) -> Vec<String> {
        let mut args = vec!["--quiet".to_string(), "--no-warnings".to_string()];
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        if credentials == Credentials::Cookies {
            match &self.cookies {
                Some(CookieSource::Browser(browser)) => {
                    args.push("--cookies-from-browser".to_string());
                    args.push(browser.clone());
                }
                Some(CookieSource::File(path)) => {
                    args.push("--cookies".to_string());
                    args.push(path.display().to_string());
                }
                None => {}
            }
        }
        args
    }

    /// Run the binary and return stdout; non-zero exit carries the last stderr line
    async fn run(&self, args: Vec<String>) -> Result<Vec<u8>> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::subprocess(&self.binary, format!("spawn failed: {}", e)))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::timeout(format!("{} run", self.binary), self.timeout.as_secs()))??;

        if output.status.success() {
            return Ok(output.stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr
            .lines()
            .rev()
            .find(|l| l.contains("ERROR"))
            .or_else(|| stderr.lines().rev().find(|l| !l.trim().is_empty()))
            .unwrap_or("exited with an error")
            .trim()
            .to_string();
        Err(Error::subprocess(&self.binary, message))
    }

    async fn flat_playlist(&self, target: String, count: usize) -> Result<FlatPlaylist> {
        let mut args = self.base_args(Credentials::Anonymous);
        args.extend([
            "-J".to_string(),
            "--flat-playlist".to_string(),
            "--playlist-end".to_string(),
            count.to_string(),
            target,
        ]);
        let stdout = self.run(args).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

#[async_trait]
impl Resolver for YtDlpResolver {
    async fn resolve(&self, video_id: &str, credentials: Credentials) -> Result<VideoInfo> {
        let mut args = self.base_args(credentials);
        args.extend(["-J".to_string(), "--no-playlist".to_string(), watch_url(video_id)]);

        match self.run(args).await {
            Ok(stdout) => Ok(serde_json::from_slice(&stdout)?),
            Err(Error::Subprocess { message, .. }) => {
                let kind = super::classify(&message);
                Err(Error::extraction(message, kind))
            }
            Err(e) => Err(e),
        }
    }

    fn has_authenticated(&self) -> bool {
        self.cookies.is_some()
    }

    async fn search(&self, query: &str, count: usize) -> Result<Vec<ListingEntry>> {
        let target = format!("ytsearch{}:{}", count, query);
        let playlist = self.flat_playlist(target, count).await?;
        Ok(playlist.entries.into_iter().flatten().collect())
    }

    async fn channel_videos(&self, channel_id: &str, count: usize) -> Result<ChannelListing> {
        let target = format!("https://www.youtube.com/channel/{}/videos", channel_id);
        let playlist = self.flat_playlist(target, count).await?;
        Ok(ChannelListing {
            channel: playlist
                .channel
                .or(playlist.uploader)
                .unwrap_or_else(|| "Unknown".to_string()),
            entries: playlist.entries.into_iter().flatten().collect(),
        })
    }

    async fn download_subtitle(&self, video_id: &str, lang: &str, out_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(out_dir).await?;
        let template = out_dir.join(video_id);
        // Cookies help when anonymous subtitle fetches get rate limited
        let credentials = if self.has_authenticated() {
            Credentials::Cookies
        } else {
            Credentials::Anonymous
        };
        let mut args = self.base_args(credentials);
        args.extend([
            "--skip-download".to_string(),
            "--write-subs".to_string(),
            "--write-auto-subs".to_string(),
            "--sub-langs".to_string(),
            lang.to_string(),
            "--sub-format".to_string(),
            "vtt".to_string(),
            "--convert-subs".to_string(),
            "vtt".to_string(),
            "-o".to_string(),
            template.display().to_string(),
            watch_url(video_id),
        ]);
        if let Err(e) = self.run(args).await {
            warn!("Subtitle download for {} [{}] failed: {}", video_id, lang, e);
            return Err(e);
        }
        Ok(())
    }
}
