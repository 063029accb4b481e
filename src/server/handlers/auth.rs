//! Password login, logout and device pairing

use super::with_session_cookie;
use crate::{
    Error, Result,
    auth::{PairStatus, clear_cookie, format_remaining, qr_svg, safe_redirect},
    server::{
        app::AppState,
        extract::{Authenticated, RequestContext},
        pages::{escape_html, found, link_html, login_html},
    },
    types::{
        request::{LinkQuery, LoginForm, LoginPageQuery, PairCodeBody},
        response::PairRequestResponse,
    },
};
use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::{info, warn};

fn login_error_redirect(error: &str, next: &str) -> Response {
    found(&format!(
        "/login?error={}&next={}",
        error,
        urlencoding::encode(next)
    ))
}

/// `scheme://host` the request came in on, for the pairing QR link
fn base_url(headers: &HeaderMap, trust_forwarded: bool) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let scheme = trust_forwarded
        .then(|| headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()))
        .flatten()
        .filter(|s| *s == "https" || *s == "http")
        .unwrap_or("http");
    format!("{}://{}", scheme, host)
}

/// GET /login?error=&next=
pub async fn login_page(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<LoginPageQuery>,
) -> Response {
    if !state.store.has_app_password() {
        return found("/");
    }
    let next = safe_redirect(query.next.as_deref().unwrap_or("/"));
    if ctx.session.is_some() {
        return found(&next);
    }

    let error_html = match state.login_guard.blocked_for(&ctx.ip) {
        Some(remaining) => format!(
            r#"<p class="error">Too many attempts. Try again in {}</p>"#,
            format_remaining(remaining)
        ),
        None if !query.error.is_empty() => {
            format!(r#"<p class="error">{}</p>"#, escape_html(&query.error))
        }
        None => String::new(),
    };
    login_html(&error_html, &next).into_response()
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<LoginForm>,
) -> Response {
    if !state.store.has_app_password() {
        return found("/");
    }
    let next = safe_redirect(&form.next);

    if state.login_guard.blocked_for(&ctx.ip).is_some() {
        return found(&format!("/login?next={}", urlencoding::encode(&next)));
    }
    if form.password.is_empty() {
        return login_error_redirect("Password+required", &next);
    }

    if !state.store.verify_app_password(&form.password) {
        let failures = state.login_guard.record_failure(&ctx.ip);
        warn!("Failed login attempt from {} ({} so far)", ctx.ip, failures);
        return login_error_redirect("Invalid+password", &next);
    }

    state.login_guard.clear(&ctx.ip);
    let session = state.store.create_session();
    state.store.update_session_ip(&session.token, &ctx.ip);
    info!("Login successful from {}", ctx.ip);
    with_session_cookie(&state, &session.token, found(&next))
}

/// GET /logout
pub async fn logout(State(state): State<AppState>, ctx: RequestContext) -> Response {
    if let Some(token) = &ctx.token {
        state.store.delete_session(token);
    }
    let mut response = found("/login");
    if let Some(cookie) = clear_cookie(&state.settings.server.cookie_name) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

/// Issue a pairing code for a device without a keyboard
///
/// POST /api/pair/request
pub async fn pair_request(
    State(state): State<AppState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> Result<Json<PairRequestResponse>> {
    if !state.store.has_app_password() {
        return Err(Error::validation("password", "No password set"));
    }
    let ticket = state.pairing.request(state.store.as_ref(), &ctx.ip)?;
    let link = format!(
        "{}/link?code={}",
        base_url(&headers, state.settings.server.trust_forwarded_for),
        ticket.code
    );
    Ok(Json(PairRequestResponse {
        qr_svg: qr_svg(&link)?,
        code: ticket.code,
        expires_in: ticket.expires_in,
    }))
}

/// Poll a code; approval delivers the session cookie exactly once
///
/// GET /api/pair/status/{code}
pub async fn pair_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(code): Path<String>,
) -> Response {
    let signed_in = ctx.session.is_some() || !state.store.has_app_password();
    let status = state.pairing.status(state.store.as_ref(), &code, signed_in);
    let approved = match &status {
        PairStatus::Approved { token } => Some(token.clone()),
        _ => None,
    };
    let response = Json(status).into_response();
    match approved {
        Some(token) => {
            state.store.update_session_ip(&token, &ctx.ip);
            with_session_cookie(&state, &token, response)
        }
        None => response,
    }
}

/// POST /api/pair/approve
pub async fn pair_approve(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Json(body): Json<PairCodeBody>,
) -> Result<Json<Value>> {
    state.pairing.approve(&body.code)?;
    Ok(Json(json!({ "status": "approved" })))
}

/// POST /api/pair/deny
pub async fn pair_deny(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
    Json(body): Json<PairCodeBody>,
) -> Result<Json<Value>> {
    state.pairing.deny(state.store.as_ref(), &body.code)?;
    Ok(Json(json!({ "status": "denied" })))
}

/// Approval page for signed-in users
///
/// GET /link?code=
pub async fn link_page(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(query): Query<LinkQuery>,
) -> Response {
    if !state.store.has_app_password() {
        return found("/");
    }
    if ctx.session.is_none() {
        let mut next = "/link".to_string();
        if !query.code.is_empty() {
            next.push_str(&format!("?code={}", urlencoding::encode(&query.code)));
        }
        return found(&format!("/login?next={}", urlencoding::encode(&next)));
    }
    link_html().into_response()
}

/// Current failure table
///
/// GET /auth/status
pub async fn auth_status(
    State(state): State<AppState>,
    Authenticated(_): Authenticated,
) -> Json<Value> {
    Json(json!({ "blocked_ips": state.login_guard.status() }))
}
