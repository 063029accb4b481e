//! Search, channel listings, metadata and subtitles

use crate::{
    Error, Result,
    extract::{sponsorblock::apply_prefs, validate_id},
    server::{app::AppState, extract::Authenticated},
    types::{
        ListingEntry, VideoInfo,
        request::{ChannelQuery, SearchQuery, SubtitleQuery},
        response::{
            ChannelResponse, InfoResponse, SearchResponse, SearchResult, SponsorBlockResponse,
        },
        thumbnail_url,
    },
    utils::{format_duration, format_number, format_upload_date},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
};

const MAX_SEARCH_COUNT: usize = 100;
const MAX_CHANNEL_COUNT: usize = 50;

fn search_result(entry: ListingEntry, channel: Option<&str>) -> SearchResult {
    let duration = entry.duration.unwrap_or(0.0);
    SearchResult {
        thumbnail: thumbnail_url(&entry.id),
        title: entry.title.unwrap_or_else(|| "Unknown".to_string()),
        duration,
        duration_str: format_duration(Some(duration)),
        channel: channel
            .map(str::to_string)
            .or(entry.channel)
            .or(entry.uploader)
            .unwrap_or_else(|| "Unknown".to_string()),
        id: entry.id,
    }
}

/// GET /api/search?q=&count=
pub async fn search(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>> {
    let q = query.q.trim();
    if q.is_empty() {
        return Err(Error::validation("q", "Search query is required"));
    }
    let count = query.count.clamp(1, MAX_SEARCH_COUNT);
    let entries = state.arbiter.resolver().search(q, count).await?;
    Ok(Json(SearchResponse {
        results: entries
            .into_iter()
            .filter(|e| !e.id.is_empty())
            .map(|e| search_result(e, None))
            .collect(),
    }))
}

/// GET /api/channel/{channel_id}?count=
pub async fn channel(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(channel_id): Path<String>,
    Query(query): Query<ChannelQuery>,
) -> Result<Json<ChannelResponse>> {
    validate_id("channel_id", &channel_id)?;
    let count = query.count.clamp(1, MAX_CHANNEL_COUNT);
    let listing = state
        .arbiter
        .resolver()
        .channel_videos(&channel_id, count)
        .await?;
    let name = listing.channel;
    Ok(Json(ChannelResponse {
        results: listing
            .entries
            .into_iter()
            .filter(|e| !e.id.is_empty())
            .map(|e| search_result(e, Some(name.as_str())))
            .collect(),
        channel: name,
        channel_id,
    }))
}

fn info_response(info: &VideoInfo, tracks: Vec<crate::types::SubtitleTrack>) -> InfoResponse {
    InfoResponse {
        title: info.title_or_unknown(),
        channel: info.channel_name(),
        channel_id: info.channel_id.clone().unwrap_or_default(),
        upload_date: format_upload_date(info.upload_date.as_deref().unwrap_or_default()),
        duration: info.duration.unwrap_or(0.0),
        views: info.view_count.map(format_number),
        likes: info.like_count.map(format_number),
        description: info.description.clone().unwrap_or_default(),
        subtitle_tracks: tracks,
    }
}

/// Metadata plus subtitle tracks
///
/// GET /api/info/{video_id}
pub async fn info(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(video_id): Path<String>,
) -> Result<Json<InfoResponse>> {
    validate_id("video_id", &video_id)?;
    let mode = state.cookie_mode_for(ctx.session.as_ref());
    let info = state.arbiter.resolve(&video_id, mode).await?;
    let tracks = state.subtitles.tracks(&info);
    Ok(Json(info_response(&info, tracks)))
}

/// GET /api/subtitle/{video_id}?lang=
pub async fn subtitle(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(video_id): Path<String>,
    Query(query): Query<SubtitleQuery>,
) -> Result<Response> {
    validate_id("video_id", &video_id)?;
    let body = state.subtitles.subtitle(&video_id, &query.lang).await?;
    Ok(([(header::CONTENT_TYPE, "text/vtt; charset=utf-8")], body).into_response())
}

/// Skip segments, narrowed to the active profile's categories
///
/// GET /api/sponsorblock/{video_id}
pub async fn sponsorblock(
    State(state): State<AppState>,
    Authenticated(ctx): Authenticated,
    Path(video_id): Path<String>,
) -> Json<SponsorBlockResponse> {
    let response = state.sponsorblock.segments(&video_id).await;
    let profile = ctx
        .session
        .as_ref()
        .and_then(|s| s.profile_id)
        .and_then(|id| state.store.get_profile(id));
    match profile {
        Some(profile) => Json(apply_prefs(response, &profile.sponsorblock)),
        None => Json(response),
    }
}
