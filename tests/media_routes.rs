//! Manifest, proxy and metadata routes against a scripted resolver

mod common;

use axum::body::Body;
use axum::http::{StatusCode, header};
use common::{MockResolver, TestApp, body_json, body_text, format, request, sample_video};
use pretty_assertions::assert_eq;
use pytr_relay::types::{ListingEntry, SubtitleFile, VideoInfo};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// ftyp, moov, sidx: init ends at 123, index spans 124-175
fn mp4_head() -> Vec<u8> {
    let mut data = Vec::new();
    for (kind, size) in [(b"ftyp", 24u32), (b"moov", 100), (b"sidx", 52)] {
        data.extend_from_slice(&size.to_be_bytes());
        data.extend_from_slice(kind);
        data.resize(data.len() + size as usize - 8, 0);
    }
    data
}

fn local_video(id: &str, base: &str) -> VideoInfo {
    VideoInfo {
        id: id.to_string(),
        title: Some("Local clip".to_string()),
        duration: Some(90.0),
        formats: vec![
            format(base, "137", 1080, "avc1.640028", "none"),
            format(base, "136", 720, "avc1.4d401f", "none"),
            format(base, "134", 360, "avc1.4d401e", "none"),
            format(base, "140", 0, "none", "mp4a.40.2"),
        ],
        ..Default::default()
    }
}

fn allow_local(settings: &mut pytr_relay::Settings) {
    settings.media.allowed_hosts.push("127.0.0.1".to_string());
}

#[tokio::test]
async fn test_dash_manifest_caps_height_and_probes_ranges() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videoplayback"))
        .respond_with(ResponseTemplate::new(206).set_body_bytes(mp4_head()))
        .mount(&server)
        .await;

    let app = TestApp::build(
        MockResolver::with_video(local_video("localclip01", &server.uri())),
        allow_local,
    );

    let response = app.get("/api/dash/localclip01?quality=720", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/dash+xml"
    );
    let mpd = body_text(response).await;
    assert!(mpd.contains(r#"mediaPresentationDuration="PT90S""#));
    assert!(mpd.contains(r#"height="720""#));
    assert!(mpd.contains(r#"height="360""#));
    assert!(!mpd.contains(r#"height="1080""#));
    assert!(mpd.contains("<BaseURL>/api/videoplayback?url="));
    assert!(mpd.contains(r#"<SegmentBase indexRange="124-175"><Initialization range="0-123"/></SegmentBase>"#));

    // Served from cache the second time
    app.get("/api/dash/localclip01?quality=720", None).await;
    assert_eq!(app.resolver.calls(), 1);
}

#[tokio::test]
async fn test_dash_manifest_without_formats_is_not_found() {
    let mut video = sample_video("audioonly01");
    video.formats.retain(|f| f.format_id == "140");
    let app = TestApp::build(MockResolver::with_video(video), |_| {});

    let response = app.get("/api/dash/audioonly01", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        body_json(response).await,
        json!({ "detail": "No DASH formats available" })
    );
}

#[tokio::test]
async fn test_videoplayback_relays_ranges() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/videoplayback"))
        .and(wiremock::matchers::header("range", "bytes=0-3"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("content-range", "bytes 0-3/100")
                .set_body_bytes(b"abcd".to_vec()),
        )
        .mount(&server)
        .await;
    let app = TestApp::build(MockResolver::default(), allow_local);

    let upstream = format!("{}/videoplayback?itag=137", server.uri());
    let uri = format!("/api/videoplayback?url={}", urlencoding::encode(&upstream));
    let mut req = request("GET", &uri, None, Body::empty());
    req.headers_mut()
        .insert(header::RANGE, "bytes=0-3".parse().unwrap());
    let response = app.send(req).await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::CONTENT_RANGE], "bytes 0-3/100");
    assert_eq!(headers[header::ACCEPT_RANGES], "bytes");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(body_text(response).await, "abcd");
}

#[tokio::test]
async fn test_videoplayback_upstream_error_passes_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let app = TestApp::build(MockResolver::default(), allow_local);

    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode(&format!("{}/videoplayback", server.uri()))
    );
    let response = app.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(
        body_json(response).await,
        json!({ "detail": "Upstream returned 403" })
    );
}

#[tokio::test]
async fn test_videoplayback_redirects_stay_on_allowed_hosts() {
    let internal = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("INTERNAL-SECRET"))
        .mount(&internal)
        .await;

    let cdn = MockServer::start().await;
    let cdn_port = cdn.address().port();
    Mock::given(method("GET"))
        .and(path("/videoplayback"))
        .respond_with(ResponseTemplate::new(302).insert_header(
            "location",
            format!("http://127.0.0.1:{}/secret", internal.address().port()),
        ))
        .mount(&cdn)
        .await;
    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("location", format!("http://localhost:{}/final", cdn_port)),
        )
        .mount(&cdn)
        .await;
    Mock::given(method("GET"))
        .and(path("/final"))
        .respond_with(ResponseTemplate::new(200).set_body_string("media"))
        .mount(&cdn)
        .await;

    // Only `localhost` is trusted; 127.0.0.1 is the same machine under another name
    let app = TestApp::build(MockResolver::default(), |settings| {
        settings.media.allowed_hosts = vec!["localhost".to_string()];
    });

    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode(&format!("http://localhost:{}/videoplayback", cdn_port))
    );
    let response = app.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_text(response).await;
    assert!(!body.contains("INTERNAL-SECRET"));
    assert_eq!(
        serde_json::from_str::<serde_json::Value>(&body).unwrap(),
        json!({ "detail": "URL not allowed" })
    );
    assert!(internal.received_requests().await.unwrap().is_empty());

    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode(&format!("http://localhost:{}/moved", cdn_port))
    );
    let response = app.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "media");
}

#[tokio::test]
async fn test_videoplayback_rejects_foreign_hosts() {
    let app = TestApp::new();

    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode("https://evil.example/videoplayback")
    );
    let response = app.get(&uri, None).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await, json!({ "detail": "URL not allowed" }));

    // Suffix matches must land on a label boundary
    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode("https://notgooglevideo.com/videoplayback")
    );
    assert_eq!(app.get(&uri, None).await.status(), StatusCode::FORBIDDEN);

    let uri = format!(
        "/api/videoplayback?url={}",
        urlencoding::encode("file:///etc/passwd")
    );
    assert_eq!(app.get(&uri, None).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_videoplayback_preflight() {
    let app = TestApp::new();
    let response = app
        .send(request("OPTIONS", "/api/videoplayback", None, Body::empty()))
        .await;
    assert!(response.status().is_success());
    assert!(
        response
            .headers()
            .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN)
    );
}

#[tokio::test]
async fn test_media_routes_require_session_after_setup() {
    let app = TestApp::build(MockResolver::with_video(sample_video("dQw4w9WgXcQ")), |_| {});
    app.bootstrap("hunter22").await;

    for uri in [
        "/api/dash/dQw4w9WgXcQ",
        "/api/formats/dQw4w9WgXcQ",
        "/api/info/dQw4w9WgXcQ",
        "/api/search?q=cats",
    ] {
        let response = app.get(uri, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
    }
    assert_eq!(app.resolver.calls(), 0);
}

#[tokio::test]
async fn test_formats_lists_download_qualities() {
    let app = TestApp::build(MockResolver::with_video(sample_video("dQw4w9WgXcQ")), |_| {});

    let body = body_json(app.get("/api/formats/dQw4w9WgXcQ", None).await).await;
    let heights: Vec<u64> = body["options"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["height"].as_u64().unwrap())
        .collect();
    assert_eq!(heights, vec![360, 720, 1080]);
    assert_eq!(body["options"][0]["label"], "360p");
    assert_eq!(body["options"][0]["size"], 4_140_000);
}

#[tokio::test]
async fn test_info_formats_metadata_and_caches() {
    let mut video = sample_video("dQw4w9WgXcQ");
    video.subtitles.insert(
        "en".to_string(),
        vec![SubtitleFile {
            ext: "vtt".to_string(),
            url: Some("https://www.youtube.com/api/timedtext?lang=en".to_string()),
            name: Some("English".to_string()),
        }],
    );
    let app = TestApp::build(MockResolver::with_video(video), |_| {});

    let info = body_json(app.get("/api/info/dQw4w9WgXcQ", None).await).await;
    assert_eq!(info["title"], "Sample clip");
    assert_eq!(info["channel"], "Sample channel");
    assert_eq!(info["upload_date"], "31/01/2024");
    assert_eq!(info["views"], "1.5M");
    assert_eq!(
        info["subtitle_tracks"],
        json!([{ "lang": "en", "label": "English", "auto": false }])
    );

    app.get("/api/info/dQw4w9WgXcQ", None).await;
    app.get("/api/formats/dQw4w9WgXcQ", None).await;
    assert_eq!(app.resolver.calls(), 1);
}

#[tokio::test]
async fn test_info_failures_hide_resolver_output() {
    let app = TestApp::new();

    let response = app.get("/api/info/missing0001", None).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({ "detail": "Could not extract video information" })
    );

    let response = app.get("/api/info/bad%20id", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_search_and_channel_listing() {
    let resolver = MockResolver::default();
    *resolver.search_results.lock() = vec![
        ListingEntry {
            id: "dQw4w9WgXcQ".to_string(),
            title: Some("Sample clip".to_string()),
            duration: Some(212.0),
            uploader: Some("Uploader".to_string()),
            ..Default::default()
        },
        ListingEntry::default(),
    ];
    let app = TestApp::build(resolver, |_| {});

    let body = body_json(app.get("/api/search?q=sample", None).await).await;
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "dQw4w9WgXcQ");
    assert_eq!(results[0]["duration_str"], "3:32");
    assert_eq!(results[0]["channel"], "Uploader");

    let response = app.get("/api/search?q=%20%20", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(app.get("/api/channel/UCsample?count=5", None).await).await;
    assert_eq!(body["channel"], "Channel UCsample");
    assert_eq!(body["channel_id"], "UCsample");
    assert_eq!(body["results"][0]["channel"], "Channel UCsample");
}

#[tokio::test]
async fn test_subtitle_fetched_once_then_served_from_disk() {
    let app = TestApp::new();

    let response = app.get("/api/subtitle/dQw4w9WgXcQ?lang=en", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/vtt; charset=utf-8"
    );
    assert!(body_text(response).await.starts_with("WEBVTT"));

    let response = app.get("/api/subtitle/dQw4w9WgXcQ?lang=../x", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health() {
    let app = TestApp::new();
    let body = body_json(app.get("/api/health", None).await).await;
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}
