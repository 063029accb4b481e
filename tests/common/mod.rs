//! Shared fixtures for the integration tests
//!
//! Builds a router over a [`MemoryStore`] and a scripted resolver so no
//! test ever shells out to yt-dlp.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, Response, header},
};
use parking_lot::Mutex;
use pytr_relay::{
    AppState, Error, Result, Settings, create_app,
    extract::{ChannelListing, Credentials, FailureKind, Resolver},
    store::MemoryStore,
    types::{Format, ListingEntry, VideoInfo},
};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tower::ServiceExt;

/// Resolver that answers from fixtures and counts its calls
#[derive(Default)]
pub struct MockResolver {
    pub videos: Mutex<HashMap<String, VideoInfo>>,
    pub search_results: Mutex<Vec<ListingEntry>>,
    pub resolve_calls: AtomicUsize,
}

impl MockResolver {
    pub fn with_video(info: VideoInfo) -> Self {
        let resolver = Self::default();
        resolver.videos.lock().insert(info.id.clone(), info);
        resolver
    }

    pub fn calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for MockResolver {
    async fn resolve(&self, video_id: &str, _credentials: Credentials) -> Result<VideoInfo> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.videos
            .lock()
            .get(video_id)
            .cloned()
            .ok_or_else(|| Error::extraction("Video unavailable", FailureKind::Other))
    }

    fn has_authenticated(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str, count: usize) -> Result<Vec<ListingEntry>> {
        Ok(self.search_results.lock().iter().take(count).cloned().collect())
    }

    async fn channel_videos(&self, channel_id: &str, count: usize) -> Result<ChannelListing> {
        Ok(ChannelListing {
            channel: format!("Channel {}", channel_id),
            entries: self.search_results.lock().iter().take(count).cloned().collect(),
        })
    }

    async fn download_subtitle(&self, video_id: &str, lang: &str, out_dir: &Path) -> Result<()> {
        let body = "WEBVTT\n\n00:00:00.000 --> 00:00:01.000\nhello\n";
        tokio::fs::create_dir_all(out_dir).await?;
        tokio::fs::write(out_dir.join(format!("{}.{}.vtt", video_id, lang)), body).await?;
        Ok(())
    }
}

/// A video-only or muxed format served from `base`
pub fn format(base: &str, id: &str, height: u32, vcodec: &str, acodec: &str) -> Format {
    Format {
        format_id: id.to_string(),
        url: Some(format!("{}/videoplayback?itag={}", base, id)),
        ext: "mp4".to_string(),
        vcodec: Some(vcodec.to_string()),
        acodec: Some(acodec.to_string()),
        height: (height > 0).then_some(height),
        width: (height > 0).then_some(height * 16 / 9),
        tbr: Some(1000.0),
        filesize: Some(u64::from(height.max(1)) * 10_000),
        protocol: Some("https".to_string()),
        ..Default::default()
    }
}

pub fn sample_video(id: &str) -> VideoInfo {
    let base = "https://rr1.googlevideo.com";
    VideoInfo {
        id: id.to_string(),
        title: Some("Sample clip".to_string()),
        channel: Some("Sample channel".to_string()),
        channel_id: Some("UCsample".to_string()),
        duration: Some(212.0),
        upload_date: Some("20240131".to_string()),
        view_count: Some(1_500_000),
        formats: vec![
            format(base, "137", 1080, "avc1.640028", "none"),
            format(base, "136", 720, "avc1.4d401f", "none"),
            format(base, "134", 360, "avc1.4d401e", "none"),
            format(base, "140", 0, "none", "mp4a.40.2"),
            format(base, "18", 360, "avc1.42001E", "mp4a.40.2"),
        ],
        ..Default::default()
    }
}

/// Router plus the state behind it; the temp dir must outlive both
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub resolver: Arc<MockResolver>,
    _dir: TempDir,
}

pub fn test_settings(dir: &Path) -> Settings {
    let static_dir = dir.join("static");
    std::fs::create_dir_all(&static_dir).unwrap();
    std::fs::write(static_dir.join("index.html"), "<html>app shell</html>").unwrap();
    std::fs::write(static_dir.join("embed.html"), "<html>embed player</html>").unwrap();

    let mut settings = Settings::default();
    settings.server.static_dir = Some(static_dir);
    settings.download.dir = Some(dir.join("downloads"));
    settings.cache.cache_dir = Some(dir.join("cache"));
    settings.store.snapshot_enabled = false;
    settings
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(MockResolver::default(), |_| {})
    }

    pub fn build(resolver: MockResolver, configure: impl FnOnce(&mut Settings)) -> Self {
        let dir = TempDir::new().unwrap();
        let mut settings = test_settings(dir.path());
        configure(&mut settings);

        let resolver = Arc::new(resolver);
        let state = AppState::new(settings, Arc::new(MemoryStore::new()), resolver.clone()).unwrap();
        Self {
            router: create_app(state.clone()),
            state,
            resolver,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> Response<Body> {
        self.send(request("GET", uri, cookie, Body::empty())).await
    }

    pub async fn json(&self, method: &str, uri: &str, cookie: Option<&str>, body: Value) -> Response<Body> {
        let mut request = request(method, uri, cookie, Body::from(body.to_string()));
        request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        self.send(request).await
    }

    pub async fn form(&self, uri: &str, ip: &str, body: &str) -> Response<Body> {
        let mut request = request("POST", uri, None, Body::from(body.to_string()));
        let headers = request.headers_mut();
        headers.insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        headers.insert("x-forwarded-for", ip.parse().unwrap());
        self.send(request).await
    }

    /// Run first-run setup and return the admin's cookie
    pub async fn bootstrap(&self, password: &str) -> String {
        let response = self
            .json(
                "POST",
                "/api/profiles",
                None,
                serde_json::json!({ "name": "Admin", "password": password }),
            )
            .await;
        assert_eq!(response.status(), 200);
        session_cookie(&response).expect("first run sets a cookie")
    }
}

pub fn request(method: &str, uri: &str, cookie: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(body).unwrap()
}

/// `name=value` of the session cookie a response sets
pub fn session_cookie(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .find(|pair| pair.starts_with("pytr_session=") && pair.len() > "pytr_session=".len())
        .map(str::to_string)
}

pub fn location(response: &Response<Body>) -> String {
    response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).unwrap()
}
