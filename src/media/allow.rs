//! Upstream host allow-list for proxied URLs
//!
//! Every URL the relay fetches on a client's behalf must point at one of
//! the configured media domains, or a subdomain of one.

use crate::{Error, Result};
use reqwest::redirect::{Attempt, Policy};
use std::error::Error as StdError;
use std::fmt;
use url::Url;

const MAX_REDIRECTS: usize = 10;

/// A redirect hop that left the allow-list
#[derive(Debug)]
pub struct RedirectBlocked {
    pub host: String,
}

impl fmt::Display for RedirectBlocked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "redirect to {} not allowed", self.host)
    }
}

impl StdError for RedirectBlocked {}

#[derive(Debug, Clone)]
pub struct HostAllowList {
    suffixes: Vec<String>,
}

impl HostAllowList {
    pub fn new<I, S>(suffixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            suffixes: suffixes
                .into_iter()
                .map(|s| s.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn allows_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.suffixes.iter().any(|suffix| {
            host == *suffix
                || (host.len() > suffix.len()
                    && host.ends_with(suffix.as_str())
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.')
        })
    }

    fn rejection(&self, url: &Url) -> Option<String> {
        if !matches!(url.scheme(), "http" | "https") {
            return Some(url.scheme().to_string());
        }
        let host = url.host_str().unwrap_or_default();
        (!self.allows_host(host)).then(|| host.to_string())
    }

    /// Parse `raw` and check scheme and host, returning the URL on success
    pub fn check(&self, raw: &str) -> Result<Url> {
        let url = Url::parse(raw)?;
        match self.rejection(&url) {
            Some(host) => Err(Error::HostNotAllowed { host }),
            None => Ok(url),
        }
    }

    /// Redirect policy that re-checks every hop against this list
    pub fn redirect_policy(&self) -> Policy {
        let allow = self.clone();
        Policy::custom(move |attempt: Attempt<'_>| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            match allow.rejection(attempt.url()) {
                Some(host) => attempt.error(RedirectBlocked { host }),
                None => attempt.follow(),
            }
        })
    }
}

/// Upstream send failure, surfacing a blocked redirect as `HostNotAllowed`
pub fn send_error(error: reqwest::Error) -> Error {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(blocked) = cause.downcast_ref::<RedirectBlocked>() {
            tracing::warn!("Blocked upstream redirect to {}", blocked.host);
            return Error::HostNotAllowed {
                host: blocked.host.clone(),
            };
        }
        source = cause.source();
    }
    tracing::warn!("Upstream connection error: {}", error);
    Error::UpstreamConnect {
        message: error.to_string(),
    }
}
