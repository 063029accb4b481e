//! SponsorBlock skip segments
//!
//! Lookups go through the k-anonymity endpoint: only the first four hex
//! characters of the video id's SHA-256 leave the relay, and the matching
//! video is picked out of the returned batch locally. Every outcome,
//! including upstream failures, is cached for the configured lifetime.

use super::validate_id;
use crate::{
    store::SponsorBlockPrefs,
    types::response::{Highlight, SkipSegment, SponsorBlockResponse},
    utils::TtlMap,
};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// Categories requested upstream; profile preferences narrow them later
const REQUESTED_CATEGORIES: &[&str] = &[
    "sponsor",
    "intro",
    "outro",
    "selfpromo",
    "interaction",
    "preview",
    "filler",
    "music_offtopic",
    "poi_highlight",
];

const HIGHLIGHT_CATEGORY: &str = "poi_highlight";

#[derive(Debug, Deserialize)]
struct VideoSegments {
    #[serde(rename = "videoID")]
    video_id: String,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    segment: [f64; 2],
    category: String,
    #[serde(rename = "actionType", default)]
    action_type: Option<String>,
}

/// Hash prefix sent upstream in place of the video id
pub fn hash_prefix(video_id: &str) -> String {
    hex::encode(Sha256::digest(video_id.as_bytes()))[..4].to_string()
}

/// Split one video's raw segments into skippable ranges and the highlight
fn collect(segments: Vec<RawSegment>) -> SponsorBlockResponse {
    let mut out = SponsorBlockResponse::default();
    for raw in segments {
        let action = raw.action_type.unwrap_or_else(|| "skip".to_string());
        if raw.category == HIGHLIGHT_CATEGORY && action == "poi" {
            out.highlight = Some(Highlight {
                timestamp: raw.segment[0],
            });
        } else if action == "skip" || action == "mute" {
            out.segments.push(SkipSegment {
                segment: raw.segment,
                category: raw.category,
                action_type: action,
            });
        }
    }
    out
}

/// Keep only the segments a profile wants skipped
pub fn apply_prefs(mut response: SponsorBlockResponse, prefs: &SponsorBlockPrefs) -> SponsorBlockResponse {
    if prefs.enabled {
        response
            .segments
            .retain(|s| prefs.categories.contains(&s.category));
    } else {
        response.segments.clear();
    }
    response
}

/// Cached SponsorBlock client
pub struct SponsorBlockService {
    client: Client,
    base_url: String,
    cache: Mutex<TtlMap<String, SponsorBlockResponse>>,
}

impl SponsorBlockService {
    pub fn new(client: Client, base_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache: Mutex::new(TtlMap::new(ttl)),
        }
    }

    /// Segments and highlight for `video_id`; empty when unknown or unreachable
    pub async fn segments(&self, video_id: &str) -> SponsorBlockResponse {
        if validate_id("video_id", video_id).is_err() {
            return SponsorBlockResponse::default();
        }
        if let Some(hit) = self.cache.lock().get(video_id) {
            return hit.clone();
        }

        let response = self.fetch(video_id).await;
        self.cache
            .lock()
            .insert(video_id.to_string(), response.clone());
        response
    }

    async fn fetch(&self, video_id: &str) -> SponsorBlockResponse {
        let url = format!("{}/api/skipSegments/{}", self.base_url, hash_prefix(video_id));
        let categories = match serde_json::to_string(REQUESTED_CATEGORIES) {
            Ok(c) => c,
            Err(_) => return SponsorBlockResponse::default(),
        };

        let response = match self
            .client
            .get(&url)
            .query(&[("categories", categories)])
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("SponsorBlock request failed for {}: {}", video_id, e);
                return SponsorBlockResponse::default();
            }
        };
        if response.status() == StatusCode::NOT_FOUND {
            debug!("No SponsorBlock segments for prefix of {}", video_id);
            return SponsorBlockResponse::default();
        }
        if !response.status().is_success() {
            warn!("SponsorBlock returned {} for {}", response.status(), video_id);
            return SponsorBlockResponse::default();
        }

        match response.json::<Vec<VideoSegments>>().await {
            Ok(batch) => batch
                .into_iter()
                .find(|v| v.video_id == video_id)
                .map(|v| collect(v.segments))
                .unwrap_or_default(),
            Err(e) => {
                warn!("Malformed SponsorBlock response for {}: {}", video_id, e);
                SponsorBlockResponse::default()
            }
        }
    }

    /// Drop expired entries
    pub fn sweep(&self) -> usize {
        self.cache.lock().sweep().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VIDEO: &str = "dQw4w9WgXcQ";

    fn service(server: &MockServer) -> SponsorBlockService {
        SponsorBlockService::new(Client::new(), server.uri(), Duration::from_secs(3600))
    }

    fn batch() -> serde_json::Value {
        json!([
            {
                "videoID": "someOtherId",
                "segments": [{ "segment": [1.0, 2.0], "category": "sponsor", "actionType": "skip" }]
            },
            {
                "videoID": VIDEO,
                "hash": "ignored",
                "segments": [
                    { "segment": [10.0, 25.5], "category": "sponsor", "actionType": "skip", "UUID": "a" },
                    { "segment": [40.0, 42.0], "category": "music_offtopic", "actionType": "mute" },
                    { "segment": [61.5, 61.5], "category": "poi_highlight", "actionType": "poi" },
                    { "segment": [70.0, 90.0], "category": "intro" },
                    { "segment": [0.0, 300.0], "category": "filler", "actionType": "full" }
                ]
            }
        ])
    }

    #[test]
    fn test_hash_prefix() {
        let prefix = hash_prefix(VIDEO);
        assert_eq!(prefix.len(), 4);
        assert_eq!(
            prefix,
            hex::encode(Sha256::digest(VIDEO.as_bytes()))[..4].to_string()
        );
    }

    #[tokio::test]
    async fn test_segments_split_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/api/skipSegments/{}", hash_prefix(VIDEO))))
            .and(query_param(
                "categories",
                serde_json::to_string(REQUESTED_CATEGORIES).unwrap(),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(batch()))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        let response = service.segments(VIDEO).await;
        assert_eq!(
            response,
            SponsorBlockResponse {
                segments: vec![
                    SkipSegment {
                        segment: [10.0, 25.5],
                        category: "sponsor".into(),
                        action_type: "skip".into(),
                    },
                    SkipSegment {
                        segment: [40.0, 42.0],
                        category: "music_offtopic".into(),
                        action_type: "mute".into(),
                    },
                    SkipSegment {
                        segment: [70.0, 90.0],
                        category: "intro".into(),
                        action_type: "skip".into(),
                    },
                ],
                highlight: Some(Highlight { timestamp: 61.5 }),
            }
        );

        assert_eq!(service.segments(VIDEO).await, response);
    }

    #[tokio::test]
    async fn test_unmatched_video_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "videoID": "someOtherId", "segments": [] }
            ])))
            .mount(&server)
            .await;

        assert_eq!(
            service(&server).segments(VIDEO).await,
            SponsorBlockResponse::default()
        );
    }

    #[tokio::test]
    async fn test_not_found_and_failures_are_cached_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let service = service(&server);
        assert_eq!(service.segments(VIDEO).await, SponsorBlockResponse::default());
        assert_eq!(service.segments(VIDEO).await, SponsorBlockResponse::default());

        let unreachable = SponsorBlockService::new(
            Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(3600),
        );
        assert_eq!(
            unreachable.segments(VIDEO).await,
            SponsorBlockResponse::default()
        );
        assert_eq!(unreachable.sweep(), 0);
    }

    #[tokio::test]
    async fn test_invalid_id_skips_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(0)
            .mount(&server)
            .await;

        assert_eq!(
            service(&server).segments("../etc").await,
            SponsorBlockResponse::default()
        );
    }

    #[test]
    fn test_apply_prefs() {
        let response = SponsorBlockResponse {
            segments: vec![
                SkipSegment {
                    segment: [1.0, 2.0],
                    category: "sponsor".into(),
                    action_type: "skip".into(),
                },
                SkipSegment {
                    segment: [3.0, 4.0],
                    category: "intro".into(),
                    action_type: "skip".into(),
                },
            ],
            highlight: Some(Highlight { timestamp: 5.0 }),
        };

        let kept = apply_prefs(response.clone(), &SponsorBlockPrefs::default());
        assert_eq!(kept.segments.len(), 1);
        assert_eq!(kept.segments[0].category, "sponsor");
        assert_eq!(kept.highlight, Some(Highlight { timestamp: 5.0 }));

        let off = apply_prefs(response, &SponsorBlockPrefs::sanitized(false, &[]));
        assert!(off.segments.is_empty());
        assert!(off.highlight.is_some());
    }
}
