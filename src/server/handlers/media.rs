//! Manifest, proxy and progressive-stream endpoints

use crate::{
    Error, Result,
    extract::validate_id,
    media::proxy::preflight,
    server::{
        app::AppState,
        extract::{Authenticated, EmbedAuthenticated},
    },
    types::{
        Format,
        request::{QualityQuery, UrlQuery},
        response::{FormatsResponse, QualityOption},
    },
    utils::format_bytes,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use std::collections::BTreeMap;
use tracing::info;
use url::Url;

const DEFAULT_MAX_HEIGHT: u32 = 1080;
/// Progressive formats tried in order before any combined stream
const PROGRESSIVE_IDS: [&str; 2] = ["22", "18"];
const MIN_OPTION_HEIGHT: u32 = 360;

/// DASH manifest capped at `quality`
///
/// GET /api/dash/{video_id}?quality=
pub async fn dash_manifest(
    State(state): State<AppState>,
    EmbedAuthenticated(ctx): EmbedAuthenticated,
    Path(video_id): Path<String>,
    Query(query): Query<QualityQuery>,
) -> Result<Response> {
    validate_id("video_id", &video_id)?;
    let max_height = query.quality.filter(|q| *q > 0).unwrap_or(DEFAULT_MAX_HEIGHT);
    let mode = state.cookie_mode_for(ctx.session.as_ref());

    let mpd = state
        .dash
        .manifest(&video_id, max_height, || state.arbiter.resolve(&video_id, mode))
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "application/dash+xml")],
        mpd.to_string(),
    )
        .into_response())
}

/// Rewritten HLS playlist
///
/// GET /api/hls/{video_id}
pub async fn hls_playlist(
    State(state): State<AppState>,
    EmbedAuthenticated(ctx): EmbedAuthenticated,
    Path(video_id): Path<String>,
) -> Result<Response> {
    validate_id("video_id", &video_id)?;
    let mode = state.cookie_mode_for(ctx.session.as_ref());
    let info = state.arbiter.resolve(&video_id, mode).await?;
    let playlist = state.hls.playlist(&info.formats).await?;
    Ok((
        [
            (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        playlist,
    )
        .into_response())
}

/// GET /api/hls-segment?url=
pub async fn hls_segment(
    State(state): State<AppState>,
    EmbedAuthenticated(_): EmbedAuthenticated,
    Query(query): Query<UrlQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let url = state.allow.check(&query.url)?;
    state.proxy.relay(&url, headers.get(header::RANGE), None).await
}

/// Range proxy for DASH representations
///
/// GET /api/videoplayback?url=
pub async fn videoplayback(
    State(state): State<AppState>,
    EmbedAuthenticated(_): EmbedAuthenticated,
    Query(query): Query<UrlQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let url = state.allow.check(&query.url)?;
    state.proxy.relay(&url, headers.get(header::RANGE), None).await
}

/// OPTIONS /api/videoplayback
pub async fn videoplayback_options() -> Response {
    preflight()
}

/// Progressive stream to pick when DASH playback is unavailable
pub fn progressive_format(formats: &[Format]) -> Option<&Format> {
    PROGRESSIVE_IDS
        .iter()
        .find_map(|id| {
            formats
                .iter()
                .find(|f| f.format_id == *id && f.url.is_some())
        })
        .or_else(|| {
            formats
                .iter()
                .find(|f| f.has_video() && f.has_audio() && f.is_direct_http())
        })
}

/// GET /api/stream-live/{video_id}
pub async fn stream_live(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(video_id): Path<String>,
    headers: HeaderMap,
) -> Result<Response> {
    validate_id("video_id", &video_id)?;
    let mode = state.cookie_mode_for(ctx.session.as_ref());
    let info = state.arbiter.resolve(&video_id, mode).await?;

    let format = progressive_format(&info.formats)
        .ok_or_else(|| Error::no_formats("No suitable format found"))?;
    let url = Url::parse(format.url.as_deref().unwrap_or_default())?;
    info!(
        "stream-live {}: progressive proxy format {}",
        video_id, format.format_id
    );
    state
        .proxy
        .relay(&url, headers.get(header::RANGE), format.size())
        .await
}

/// Download qualities, lowest first, with merged-size estimates
pub fn quality_options(formats: &[Format]) -> Vec<QualityOption> {
    let mut best: BTreeMap<u32, u64> = BTreeMap::new();
    for format in formats.iter().filter(|f| f.is_video_only()) {
        let height = format.height.unwrap_or(0);
        if height < MIN_OPTION_HEIGHT {
            continue;
        }
        let size = format.size().unwrap_or(0);
        let entry = best.entry(height).or_insert(0);
        *entry = (*entry).max(size);
    }

    best.into_iter()
        .map(|(height, size)| {
            // Audio adds roughly 15%
            let size = size * 115 / 100;
            QualityOption {
                height,
                label: format!("{}p", height),
                size,
                size_str: (size > 0).then(|| format_bytes(size)),
            }
        })
        .collect()
}

/// GET /api/formats/{video_id}
pub async fn formats(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(video_id): Path<String>,
) -> Result<Json<FormatsResponse>> {
    validate_id("video_id", &video_id)?;
    let mode = state.cookie_mode_for(ctx.session.as_ref());
    let info = state.arbiter.resolve(&video_id, mode).await?;
    Ok(Json(FormatsResponse {
        options: quality_options(&info.formats),
    }))
}
