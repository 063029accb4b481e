//! Resolver output: format descriptors and video metadata
//!
//! Field names follow the resolver's JSON so these types deserialize
//! straight from `yt-dlp -J`. Absent codecs arrive as `"none"`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One downloadable rendition of a video
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub format_id: String,
    #[serde(default)]
    pub url: Option<String>,
    /// Container extension (`mp4`, `m4a`, `webm`)
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub vcodec: Option<String>,
    #[serde(default)]
    pub acodec: Option<String>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub fps: Option<f64>,
    /// Total bitrate in kbit/s
    #[serde(default)]
    pub tbr: Option<f64>,
    #[serde(default)]
    pub filesize: Option<u64>,
    #[serde(default)]
    pub filesize_approx: Option<u64>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub format_note: Option<String>,
}

/// Codec family used to rank video renditions of equal height
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodecFamily {
    Other,
    Av1,
    H264,
}

fn codec_present(codec: &Option<String>) -> bool {
    codec.as_deref().is_some_and(|c| !c.is_empty() && c != "none")
}

impl Format {
    pub fn has_video(&self) -> bool {
        codec_present(&self.vcodec)
    }

    pub fn has_audio(&self) -> bool {
        codec_present(&self.acodec)
    }

    pub fn is_video_only(&self) -> bool {
        self.has_video() && !self.has_audio()
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio() && !self.has_video()
    }

    /// Plain HTTP(S) delivery with a usable URL
    pub fn is_direct_http(&self) -> bool {
        self.url.is_some() && matches!(self.protocol.as_deref(), Some("https") | Some("http"))
    }

    /// HLS-manifest delivery
    pub fn is_hls(&self) -> bool {
        self.url.is_some()
            && matches!(self.protocol.as_deref(), Some("m3u8") | Some("m3u8_native"))
    }

    pub fn codec_family(&self) -> CodecFamily {
        match self.vcodec.as_deref() {
            Some(c) if c.starts_with("avc1") => CodecFamily::H264,
            Some(c) if c.starts_with("av01") => CodecFamily::Av1,
            _ => CodecFamily::Other,
        }
    }

    pub fn bitrate(&self) -> f64 {
        self.tbr.unwrap_or(0.0)
    }

    /// Exact size when known, else the resolver's estimate
    pub fn size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }
}

/// One downloadable subtitle file for a language
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtitleFile {
    #[serde(default)]
    pub ext: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Resolved video: metadata plus every format and subtitle the resolver saw
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub upload_date: Option<String>,
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub formats: Vec<Format>,
    #[serde(default)]
    pub subtitles: BTreeMap<String, Vec<SubtitleFile>>,
    #[serde(default)]
    pub automatic_captions: BTreeMap<String, Vec<SubtitleFile>>,
}

impl VideoInfo {
    pub fn title_or_unknown(&self) -> String {
        self.title.clone().unwrap_or_else(|| "Unknown".to_string())
    }

    /// Channel name, falling back to the uploader
    pub fn channel_name(&self) -> String {
        self.channel
            .clone()
            .or_else(|| self.uploader.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

/// Flat search or channel listing entry from the resolver
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingEntry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
}

/// Standard medium thumbnail for a video id
pub fn thumbnail_url(video_id: &str) -> String {
    format!("https://i.ytimg.com/vi/{}/mqdefault.jpg", video_id)
}

/// Canonical watch URL for a video id
pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", video_id)
}
