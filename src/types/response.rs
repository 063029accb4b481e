//! Response type definitions
//!
//! JSON bodies produced by the HTTP surface.

use serde::{Deserialize, Serialize};

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server uptime in seconds
    pub server_uptime: u64,
    /// Server version
    pub version: String,
}

impl HealthResponse {
    pub fn new(server_uptime: u64, version: impl Into<String>) -> Self {
        Self {
            server_uptime,
            version: version.into(),
        }
    }
}

/// API error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// `{"ok": true}` acknowledgement
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub const OK: Ack = Ack { ok: true };
}

/// One search or channel listing row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    pub duration: f64,
    pub duration_str: String,
    pub channel: String,
    pub thumbnail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelResponse {
    pub channel: String,
    pub channel_id: String,
    pub results: Vec<SearchResult>,
}

/// Skippable SponsorBlock segment, `segment` is `[start, end]` in seconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipSegment {
    pub segment: [f64; 2],
    pub category: String,
    #[serde(rename = "actionType")]
    pub action_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub timestamp: f64,
}

/// `GET /api/sponsorblock/{video_id}` body
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SponsorBlockResponse {
    pub segments: Vec<SkipSegment>,
    pub highlight: Option<Highlight>,
}

/// Subtitle language offered for a video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub lang: String,
    pub label: String,
    pub auto: bool,
}

/// `GET /api/info/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub title: String,
    pub channel: String,
    pub channel_id: String,
    pub upload_date: String,
    pub duration: f64,
    pub views: Option<String>,
    pub likes: Option<String>,
    pub description: String,
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

/// One selectable quality with its estimated size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityOption {
    pub height: u32,
    pub label: String,
    /// Estimated merged size in bytes, 0 when unknown
    pub size: u64,
    pub size_str: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatsResponse {
    pub options: Vec<QualityOption>,
}

/// `POST /api/pair/request`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequestResponse {
    pub code: String,
    pub qr_svg: String,
    pub expires_in: u64,
}

/// Lockout summary for one IP
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedIp {
    pub failures: u32,
    pub blocked_for: u64,
}
