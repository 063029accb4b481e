//! Background download endpoints and finished-file serving

use crate::{
    Error, Result,
    download::DownloadStatus,
    extract::validate_id,
    server::{app::AppState, extract::Authenticated},
    types::request::QualityQuery,
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, Request, State},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeFile;

/// Start or attach to the download for `video_id`
///
/// GET /api/play/{video_id}?quality=
pub async fn play(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(video_id): Path<String>,
    Query(query): Query<QualityQuery>,
) -> Result<Json<DownloadStatus>> {
    validate_id("video_id", &video_id)?;
    let quality = query.quality.unwrap_or(0);
    Ok(Json(state.downloads.start_or_attach(&video_id, quality).await))
}

/// GET /api/progress/{video_id}
pub async fn progress(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(video_id): Path<String>,
) -> Result<Json<DownloadStatus>> {
    validate_id("video_id", &video_id)?;
    Ok(Json(state.downloads.progress(&video_id)))
}

/// POST /api/cancel/{video_id}
pub async fn cancel(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(video_id): Path<String>,
) -> Result<Json<DownloadStatus>> {
    validate_id("video_id", &video_id)?;
    Ok(Json(state.downloads.cancel(&video_id).await))
}

/// Finished file with range support
///
/// GET /api/stream/{video_id}
pub async fn stream(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Path(video_id): Path<String>,
    request: Request,
) -> Result<Response> {
    validate_id("video_id", &video_id)?;
    let path = state.downloads.file_path(&video_id);
    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
        return Err(Error::not_found("Video not found"));
    }

    // Content type follows the `.mp4` extension
    match ServeFile::new(&path).oneshot(request).await {
        Ok(response) => Ok(response.map(Body::new).into_response()),
        Err(never) => match never {},
    }
}
