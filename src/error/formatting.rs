//! Error formatting utilities
//!
//! Renders errors for logs and for API bodies. API bodies never carry
//! internal detail for server-side failures.

use crate::Error;
use std::error::Error as StdError;

/// Format error for display, appending each distinct nested cause
pub fn format_error(error: &Error) -> String {
    let formatted = match error {
        Error::Extraction { message, kind } => {
            format!("Extraction failed ({}): {}", kind, message)
        }

        Error::Subprocess { program, message } => {
            format!("{} failed: {}", program, message)
        }

        Error::Timeout {
            operation,
            duration_secs,
        } => {
            format!(
                "Operation '{}' timed out after {} seconds",
                operation, duration_secs
            )
        }

        // For standard errors, use their Display implementation
        _ => error.to_string(),
    };

    let mut result = formatted;
    let mut source = error.source();

    while let Some(cause) = source {
        if !result.contains(&cause.to_string()) {
            result = format!("{} (caused by {})", result, cause);
        }
        source = cause.source();
    }

    result
}

/// Client-facing detail string
///
/// Server-side failures collapse to a fixed message so resolver output,
/// file paths and upstream URLs never reach the client.
pub fn client_detail(error: &Error) -> String {
    match error {
        Error::Extraction { .. } => "Could not extract video information".to_string(),
        Error::NoFormats { reason } => reason.clone(),
        Error::NotFound { what } => what.clone(),
        Error::Upstream { status } => format!("Upstream returned {}", status),
        Error::UpstreamConnect { .. } | Error::Http(..) => "Upstream unavailable".to_string(),
        Error::HostNotAllowed { .. } => "URL not allowed".to_string(),
        Error::Unauthorized => "Unauthorized".to_string(),
        Error::Forbidden { reason } => reason.clone(),
        Error::NoProfile => "No profile selected".to_string(),
        Error::RateLimit { message, .. } => message.clone(),
        Error::Conflict { .. } => error.to_string(),
        Error::Validation { message, .. } => message.clone(),
        Error::Json(..) | Error::Url(..) => "Malformed request".to_string(),
        Error::Timeout { .. } => "Request timed out".to_string(),
        Error::Toml(..)
        | Error::Io(..)
        | Error::Config { .. }
        | Error::Subprocess { .. }
        | Error::Internal { .. } => "Internal server error".to_string(),
    }
}

/// Format error for JSON API responses
pub fn format_error_for_api(error: &Error) -> serde_json::Value {
    let mut body = serde_json::json!({ "detail": client_detail(error) });
    if let Some(after) = error.retry_after() {
        body["retry_after"] = serde_json::Value::Number(after.into());
    }
    body
}

/// Format error for logging with structured data
pub fn format_error_for_logging(error: &Error) -> serde_json::Value {
    let mut log_data = serde_json::json!({
        "message": format_error(error),
        "category": error.category(),
        "retryable": error.is_retryable(),
    });

    match error {
        Error::Extraction { kind, .. } => {
            log_data["failure_kind"] = serde_json::Value::String(kind.to_string());
        }
        Error::Upstream { status } => {
            log_data["upstream_status"] = serde_json::Value::Number((*status).into());
        }
        Error::Timeout { duration_secs, .. } => {
            log_data["timeout_duration"] = serde_json::Value::Number((*duration_secs).into());
        }
        Error::RateLimit {
            retry_after: Some(after),
            ..
        } => {
            log_data["retry_after"] = serde_json::Value::Number((*after).into());
        }
        _ => {}
    }

    log_data
}
