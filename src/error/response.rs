//! HTTP mapping for [`Error`]
//!
//! Errors always render as JSON `{"detail": ...}` here. HTML routes get
//! their themed page from the page middleware in `server::pages`, which
//! rewrites error responses outside `/api`.

use super::{Error, format_error_for_api, format_error_for_logging};
use axum::{
    Json,
    http::{HeaderValue, header},
    response::{IntoResponse, Response},
};

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %format_error_for_logging(&self), "Request failed");
        } else {
            tracing::debug!(category = self.category(), "Request rejected: {}", self);
        }

        let retry_after = self.retry_after();
        let mut response = (status, Json(format_error_for_api(&self))).into_response();
        if let Some(secs) = retry_after
            && let Ok(value) = HeaderValue::from_str(&secs.to_string())
        {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        response
    }
}
