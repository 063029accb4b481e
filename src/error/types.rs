//! Error types for the relay
//!
//! One crate-wide error enum. Expected, frequent conditions (pending
//! pairing, in-progress downloads, cache misses) are modelled as result
//! variants elsewhere and never reach this type.

use crate::extract::FailureKind;
use axum::http::StatusCode;
use thiserror::Error;

/// Main error type for the application
#[derive(Debug, Error)]
pub enum Error {
    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing errors
    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The resolver gave up on a video after every applicable strategy
    #[error("Extraction failed ({kind}): {message}")]
    Extraction {
        /// Resolver error text
        message: String,
        /// Classification of the final failure
        kind: FailureKind,
    },

    /// The video exists but nothing survives the compatibility filters
    #[error("No suitable formats: {reason}")]
    NoFormats {
        /// Which selection came up empty
        reason: String,
    },

    /// A local resource (file, profile, code) does not exist
    #[error("Not found: {what}")]
    NotFound {
        /// Description of the missing resource
        what: String,
    },

    /// Upstream media server answered with an error status
    #[error("Upstream returned status {status}")]
    Upstream {
        /// Upstream HTTP status
        status: u16,
    },

    /// Upstream media server could not be reached
    #[error("Upstream connection failed: {message}")]
    UpstreamConnect {
        /// Connection error text
        message: String,
    },

    /// A proxied URL points outside the media allow-list
    #[error("Host not allowed: {host}")]
    HostNotAllowed {
        /// Offending host
        host: String,
    },

    /// Missing or invalid session
    #[error("Unauthorized")]
    Unauthorized,

    /// Valid session without the required scope
    #[error("{reason}")]
    Forbidden {
        /// Why access was refused
        reason: String,
    },

    /// Valid session that has no profile bound yet
    #[error("No profile selected")]
    NoProfile,

    /// Rate limiting errors
    #[error("Rate limited: {message}")]
    RateLimit {
        /// Message describing the rate limit
        message: String,
        /// Seconds to wait before retrying
        retry_after: Option<u64>,
    },

    /// Unique constraint violations and already-consumed resources
    #[error("{message}")]
    Conflict {
        /// Conflict description
        message: String,
    },

    /// Validation errors
    #[error("Validation failed for {field}: {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Error message describing the validation failure
        message: String,
    },

    /// Configuration errors
    #[error("Configuration error in {field}: {message}")]
    Config {
        /// The configuration field that has an error
        field: String,
        /// Error message describing the issue
        message: String,
    },

    /// External program failures
    #[error("Subprocess '{program}' failed: {message}")]
    Subprocess {
        /// Program name
        program: String,
        /// Failure description (stderr excerpt or exit status)
        message: String,
    },

    /// Timeout errors
    #[error("Operation timed out after {duration_secs} seconds: {operation}")]
    Timeout {
        /// The operation that timed out
        operation: String,
        /// Duration in seconds before timing out
        duration_secs: u64,
    },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an extraction error
    pub fn extraction<S: Into<String>>(message: S, kind: FailureKind) -> Self {
        Self::Extraction {
            message: message.into(),
            kind,
        }
    }

    /// Create a "no formats" error
    pub fn no_formats<S: Into<String>>(reason: S) -> Self {
        Self::NoFormats {
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(what: S) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(reason: S) -> Self {
        Self::Forbidden {
            reason: reason.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a subprocess error
    pub fn subprocess(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Subprocess {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(operation: S, duration_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_secs,
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this is a retryable error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::UpstreamConnect { .. } => true,
            Error::Http(e) => e.is_timeout() || e.is_connect(),
            Error::RateLimit { .. } => true,
            Error::Extraction { kind, .. } => *kind == FailureKind::Throttled,
            _ => false,
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Error::Http(..) => "http",
            Error::Json(..) => "json",
            Error::Toml(..) => "toml",
            Error::Url(..) => "url",
            Error::Io(..) => "io",
            Error::Extraction { .. } => "extraction",
            Error::NoFormats { .. } => "no_formats",
            Error::NotFound { .. } => "not_found",
            Error::Upstream { .. } | Error::UpstreamConnect { .. } => "upstream",
            Error::HostNotAllowed { .. } => "host_not_allowed",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden { .. } | Error::NoProfile => "forbidden",
            Error::RateLimit { .. } => "rate_limit",
            Error::Conflict { .. } => "conflict",
            Error::Validation { .. } => "validation",
            Error::Config { .. } => "config",
            Error::Subprocess { .. } => "subprocess",
            Error::Timeout { .. } => "timeout",
            Error::Internal { .. } => "internal",
        }
    }

    /// HTTP status this error is surfaced with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Extraction { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NoFormats { .. } | Error::NotFound { .. } => StatusCode::NOT_FOUND,
            Error::Upstream { status } => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Error::UpstreamConnect { .. } | Error::Http(..) => StatusCode::BAD_GATEWAY,
            Error::HostNotAllowed { .. } => StatusCode::FORBIDDEN,
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden { .. } | Error::NoProfile => StatusCode::FORBIDDEN,
            Error::RateLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Conflict { .. } => StatusCode::CONFLICT,
            Error::Validation { .. } | Error::Json(..) | Error::Url(..) => {
                StatusCode::BAD_REQUEST
            }
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Error::Toml(..)
            | Error::Io(..)
            | Error::Config { .. }
            | Error::Subprocess { .. }
            | Error::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Seconds a client should wait before retrying, when known
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            Error::RateLimit { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
