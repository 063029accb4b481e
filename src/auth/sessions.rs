//! Session cookie plumbing, client IP discovery and redirect sanitizing

use crate::store::Store;
use axum::http::{HeaderMap, HeaderValue, header};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use tracing::debug;

/// Ten years: household devices should never have to log in again
pub const COOKIE_MAX_AGE_SECS: u64 = 10 * 365 * 86400;

/// `Set-Cookie` value delivering a session token
pub fn session_cookie(name: &str, token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}={}; Max-Age={}; Path=/; HttpOnly; SameSite=Lax",
        name, token, COOKIE_MAX_AGE_SECS
    ))
    .ok()
}

/// `Set-Cookie` value that removes the session cookie
pub fn clear_cookie(name: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{}=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax",
        name
    ))
    .ok()
}

/// Value of cookie `name` from the request headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Client IP: first `X-Forwarded-For` hop when trusted, else the peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> String {
    if trust_forwarded
        && let Some(first) = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Relative path to redirect to after login; anything else becomes `/`
pub fn safe_redirect(next: &str) -> String {
    if next.starts_with('/') && !next.starts_with("//") && !next.starts_with("/\\") {
        next.to_string()
    } else {
        "/".to_string()
    }
}

/// Deferred session IP writes, flushed by the maintenance sweep
#[derive(Debug, Default)]
pub struct IpBuffer {
    pending: Mutex<HashMap<String, String>>,
}

impl IpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, token: &str, ip: &str) {
        self.pending.lock().insert(token.to_string(), ip.to_string());
    }

    /// Write buffered IPs to the store; returns how many were written
    pub fn flush(&self, store: &dyn Store) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        for (token, ip) in &pending {
            store.update_session_ip(token, ip);
        }
        if !pending.is_empty() {
            debug!("Flushed {} session IP updates", pending.len());
        }
        pending.len()
    }
}
