//! HTML surface: SPA entry points, embed pages, login and link pages,
//! and the themed error pages for everything outside `/api`

use super::{
    app::AppState,
    extract::{RequestContext, embed_allowed},
};
use crate::{Error, Result};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{HeaderValue, StatusCode, Uri, header},
    middleware::Next,
    response::{Html, IntoResponse, Response},
};
use std::path::Path as FsPath;
use tower::ServiceExt;
use tower_http::services::ServeFile;

/// Escape text for HTML bodies and attribute values
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Plain `302 Found` redirect
pub fn found(location: &str) -> Response {
    let mut response = StatusCode::FOUND.into_response();
    if let Ok(value) = HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

/// `/login?next=...` for the given return path
pub fn login_redirect(next: &str) -> Response {
    found(&format!("/login?next={}", urlencoding::encode(next)))
}

async fn serve_file(path: &FsPath, request: Request) -> Response {
    match ServeFile::new(path).oneshot(request).await {
        Ok(response) => response.map(Body::new).into_response(),
        Err(never) => match never {},
    }
}

/// Single-page app shell, behind the password when one is set
pub async fn spa(State(state): State<AppState>, ctx: RequestContext, request: Request) -> Response {
    if ctx.session.is_none() && state.store.has_app_password() {
        let uri = request.uri();
        let next = uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path());
        return login_redirect(next);
    }
    serve_file(&state.static_dir().join("index.html"), request).await
}

/// `/@handle` and `/@handle/playlists`; other single segments are 404
pub async fn handle_page(
    state: State<AppState>,
    ctx: RequestContext,
    Path(params): Path<Vec<(String, String)>>,
    request: Request,
) -> Response {
    let is_handle = params
        .iter()
        .find(|(key, _)| key == "handle")
        .is_some_and(|(_, value)| value.len() > 1 && value.starts_with('@'));
    if !is_handle {
        return not_found().await;
    }
    spa(state, ctx, request).await
}

/// Embeddable player, only when the admin has switched it on
pub async fn embed(State(state): State<AppState>, request: Request) -> Result<Response> {
    if !embed_allowed(&state) {
        return Err(Error::forbidden("Embed access is disabled"));
    }
    Ok(serve_file(&state.static_dir().join("embed.html"), request).await)
}

pub async fn not_found() -> Response {
    Error::not_found("Not Found").into_response()
}

pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        axum::Json(crate::types::ErrorResponse::new("Method Not Allowed")),
    )
        .into_response()
}

fn error_copy(status: StatusCode) -> Option<(&'static str, &'static str)> {
    match status {
        StatusCode::FORBIDDEN => Some((
            "Access denied",
            "You don't have permission to open this page.",
        )),
        StatusCode::NOT_FOUND => Some((
            "Page not found",
            "This page doesn't exist or has been moved.",
        )),
        StatusCode::METHOD_NOT_ALLOWED => Some((
            "Not allowed",
            "That request method isn't supported here.",
        )),
        StatusCode::INTERNAL_SERVER_ERROR => Some((
            "Something went wrong",
            "The server hit an unexpected error. Try again in a moment.",
        )),
        _ => None,
    }
}

/// Themed error page for a status code with distinct copy
pub fn error_page(status: StatusCode) -> Option<Response> {
    let (title, message) = error_copy(status)?;
    let html = ERROR_PAGE
        .replace("{{CODE}}", status.as_str())
        .replace("{{TITLE}}", title)
        .replace("{{MESSAGE}}", message);
    Some((status, Html(html)).into_response())
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
}

fn is_api(uri: &Uri) -> bool {
    uri.path() == "/api" || uri.path().starts_with("/api/")
}

/// Swap JSON and empty error bodies for themed pages outside `/api`
pub async fn html_errors(request: Request, next: Next) -> Response {
    if is_api(request.uri()) {
        return next.run(request).await;
    }
    let response = next.run(request).await;
    let status = response.status();
    let empty = response
        .headers()
        .get(header::CONTENT_LENGTH)
        .is_some_and(|v| v == "0");
    if !(is_json(&response) || empty || status == StatusCode::NOT_FOUND) {
        return response;
    }
    error_page(status).unwrap_or(response)
}

/// Login page with the error line and sanitized return path filled in
pub fn login_html(error_html: &str, next: &str) -> Html<String> {
    Html(
        LOGIN_PAGE
            .replace("{{ERROR}}", error_html)
            .replace("{{NEXT}}", &escape_html(next)),
    )
}

pub fn link_html() -> Html<&'static str> {
    Html(LINK_PAGE)
}

const ERROR_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>{{CODE}} · {{TITLE}}</title>
<style>
body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
  background: #0f0f0f; color: #f1f1f1; font-family: system-ui, sans-serif; text-align: center; }
.code { font-size: 72px; font-weight: 700; color: #cc0000; margin: 0; }
h1 { font-size: 22px; margin: 8px 0 12px; }
p { color: #aaa; margin: 0 0 24px; }
a { color: #fff; background: #cc0000; padding: 10px 22px; border-radius: 18px; text-decoration: none; }
</style>
</head>
<body>
<main>
<p class="code">{{CODE}}</p>
<h1>{{TITLE}}</h1>
<p>{{MESSAGE}}</p>
<a href="/">Back to home</a>
</main>
</body>
</html>"##;

const LOGIN_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Sign in</title>
<style>
body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
  background: #0f0f0f; color: #f1f1f1; font-family: system-ui, sans-serif; }
.card { width: 320px; padding: 32px; background: #1a1a1a; border-radius: 14px; text-align: center; }
input { width: 100%; box-sizing: border-box; padding: 12px; margin: 16px 0; border-radius: 10px;
  border: 1px solid #333; background: #121212; color: #f1f1f1; font-size: 16px; }
button, .alt { display: block; width: 100%; box-sizing: border-box; padding: 12px; border: 0;
  border-radius: 10px; font-size: 15px; cursor: pointer; text-decoration: none; }
button { background: #cc0000; color: #fff; }
.alt { margin-top: 12px; background: #272727; color: #ddd; }
.error { color: #ff5252; font-size: 14px; }
#pair { display: none; }
.pair-code { font: 700 36px monospace; letter-spacing: 6px; margin: 16px 0; }
.pair-qr svg { width: 180px; height: 180px; }
.hint { color: #999; font-size: 13px; }
</style>
</head>
<body>
<div class="card">
<div id="password">
<h2>PYTR</h2>
{{ERROR}}
<form method="post" action="/login">
<input type="hidden" name="next" value="{{NEXT}}">
<input type="password" name="password" placeholder="Password" autofocus>
<button type="submit">Sign in</button>
</form>
<a href="#" class="alt" id="pair-start">Sign in with another device</a>
</div>
<div id="pair">
<p class="hint">Approve this code on a signed-in device</p>
<div class="pair-code" id="pair-code"></div>
<div class="pair-qr" id="pair-qr"></div>
<p class="hint">or open <strong id="pair-url"></strong></p>
<p class="hint" id="pair-status">Waiting for approval</p>
<a href="#" class="alt" id="pair-back">Use the password instead</a>
</div>
</div>
<script>
(function () {
  var timer = null;
  var next = document.querySelector('input[name=next]').value || '/';
  function show(pairing) {
    document.getElementById('password').style.display = pairing ? 'none' : 'block';
    document.getElementById('pair').style.display = pairing ? 'block' : 'none';
    if (!pairing && timer) { clearInterval(timer); timer = null; }
  }
  function finish(text) {
    clearInterval(timer); timer = null;
    document.getElementById('pair-status').textContent = text;
  }
  document.getElementById('pair-start').onclick = async function (e) {
    e.preventDefault();
    var res = await fetch('/api/pair/request', { method: 'POST' });
    var data = await res.json();
    if (!res.ok) { alert(data.detail || 'Pairing failed'); return; }
    document.getElementById('pair-code').textContent = data.code;
    document.getElementById('pair-qr').innerHTML = data.qr_svg;
    document.getElementById('pair-url').textContent = location.origin + '/link';
    show(true);
    timer = setInterval(async function () {
      var poll = await (await fetch('/api/pair/status/' + data.code)).json();
      if (poll.status === 'approved') { finish('Approved'); location.href = next; }
      else if (poll.status === 'denied') { finish('Request denied'); }
      else if (poll.status === 'expired') { finish('Code expired'); }
    }, 2000);
  };
  document.getElementById('pair-back').onclick = function (e) { e.preventDefault(); show(false); };
})();
</script>
</body>
</html>"##;

const LINK_PAGE: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Link a device</title>
<style>
body { margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center;
  background: #0f0f0f; color: #f1f1f1; font-family: system-ui, sans-serif; }
.card { width: 340px; padding: 32px; background: #1a1a1a; border-radius: 14px; text-align: center; }
input { width: 100%; box-sizing: border-box; padding: 14px; margin: 16px 0 8px; border-radius: 10px;
  border: 1px solid #333; background: #121212; color: #f1f1f1; text-align: center;
  font: 700 26px monospace; letter-spacing: 6px; text-transform: uppercase; }
.row { display: flex; gap: 10px; margin-top: 12px; }
button { flex: 1; padding: 12px; border: 0; border-radius: 10px; color: #fff; font-size: 15px; cursor: pointer; }
button:disabled { opacity: 0.4; cursor: default; }
#approve { background: #2e7d32; }
#deny { background: #c62828; }
.hint { color: #999; font-size: 13px; min-height: 18px; }
</style>
</head>
<body>
<div class="card">
<h2>Link a device</h2>
<p class="hint">Type the code shown on the other screen</p>
<input id="code" maxlength="6" placeholder="XXXXXX" autofocus>
<p class="hint" id="requester"></p>
<div class="row">
<button id="deny" disabled>Deny</button>
<button id="approve" disabled>Approve</button>
</div>
<p class="hint" id="message"></p>
</div>
<script>
(function () {
  var input = document.getElementById('code');
  var approve = document.getElementById('approve');
  var deny = document.getElementById('deny');
  var message = document.getElementById('message');
  var current = null;
  function enable(on) { approve.disabled = !on; deny.disabled = !on; }
  async function check() {
    var res = await fetch('/api/pair/status/' + input.value);
    var data = await res.json();
    if (data.status === 'pending') {
      document.getElementById('requester').textContent = 'Requested from ' + data.requester_ip;
      current = input.value;
      enable(true);
    } else {
      message.textContent = data.status === 'expired' ? 'Unknown or expired code' : 'Code already ' + data.status;
    }
  }
  async function decide(action) {
    enable(false);
    var res = await fetch('/api/pair/' + action, {
      method: 'POST',
      headers: { 'Content-Type': 'application/json' },
      body: JSON.stringify({ code: current })
    });
    var data = await res.json();
    if (!res.ok) { message.textContent = data.detail || 'Failed'; enable(true); return; }
    message.textContent = action === 'approve' ? 'Device linked' : 'Request denied';
    if (action === 'approve') setTimeout(function () { location.href = '/'; }, 1500);
  }
  input.addEventListener('input', function () {
    input.value = input.value.toUpperCase().replace(/[^A-HJ-NP-Z2-9]/g, '');
    message.textContent = '';
    document.getElementById('requester').textContent = '';
    current = null;
    enable(false);
    if (input.value.length === 6) check();
  });
  approve.onclick = function () { decide('approve'); };
  deny.onclick = function () { decide('deny'); };
  var preset = new URLSearchParams(location.search).get('code');
  if (preset) { input.value = preset.toUpperCase(); check(); }
})();
</script>
</body>
</html>"##;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }

    #[test]
    fn test_login_redirect_encodes_next() {
        let response = login_redirect("/watch?v=abc&t=1");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "/login?next=%2Fwatch%3Fv%3Dabc%26t%3D1"
        );
    }

    #[test]
    fn test_error_pages_have_distinct_copy() {
        for status in [
            StatusCode::FORBIDDEN,
            StatusCode::NOT_FOUND,
            StatusCode::METHOD_NOT_ALLOWED,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            let response = error_page(status).unwrap();
            assert_eq!(response.status(), status);
        }
        assert!(error_page(StatusCode::BAD_REQUEST).is_none());
    }

    #[test]
    fn test_login_html_escapes_next() {
        let Html(body) = login_html("", "/results?q=\"x\"");
        assert!(body.contains("value=\"/results?q=&quot;x&quot;\""));
    }

    #[test]
    fn test_login_html_keeps_pairing_panel() {
        let Html(body) = login_html("<p>Invalid password</p>", "/");
        assert!(body.contains(r##"<a href="#" class="alt" id="pair-start">"##));
        assert!(body.contains(r##"<a href="#" class="alt" id="pair-back">"##));
        assert!(body.contains("<p>Invalid password</p>"));
        assert!(body.trim_end().ends_with("</html>"));
    }
}
