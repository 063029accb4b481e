//! HTTP request handlers, one module per area

pub mod auth;
pub mod browse;
pub mod downloads;
pub mod media;
pub mod profiles;
pub mod remote;

use crate::{
    auth::session_cookie, server::app::AppState, types::HealthResponse, utils::version,
};
use axum::{Json, extract::State, http::header, response::Response};

/// Health endpoint
///
/// GET /api/health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse::new(uptime, version::VERSION))
}

/// Attach a `Set-Cookie` delivering `token`
pub(crate) fn with_session_cookie(state: &AppState, token: &str, mut response: Response) -> Response {
    if let Some(cookie) = session_cookie(&state.settings.server.cookie_name, token) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}
