//! Byte-range relay to upstream media servers
//!
//! The upstream status is inspected before any byte is committed to the
//! client, so an upstream failure is always a clean error response. The
//! body is re-chunked to a fixed size and streamed lazily; dropping the
//! response body (client gone) drops the upstream connection with it.

use super::allow::send_error;
use crate::{Error, Result};
use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use reqwest::Client;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, warn};
use url::Url;

/// Headers copied from the upstream response when present
const MIRRORED_HEADERS: [header::HeaderName; 3] = [
    header::CONTENT_RANGE,
    header::CONTENT_LENGTH,
    header::CONTENT_TYPE,
];

#[derive(Debug, Clone)]
pub struct RangeProxy {
    client: Client,
    chunk_size: usize,
}

impl RangeProxy {
    pub fn new(client: Client, chunk_size: usize) -> Self {
        Self { client, chunk_size }
    }

    /// Relay `url`, forwarding the client's `Range` header
    ///
    /// With no client range but a known file size, `bytes=0-` is still sent
    /// so the upstream serves the request on its ranged path.
    pub async fn relay(
        &self,
        url: &Url,
        range: Option<&HeaderValue>,
        known_size: Option<u64>,
    ) -> Result<Response> {
        let mut request = self.client.get(url.clone());
        if let Some(range) = range {
            request = request.header(header::RANGE, range.clone());
        } else if known_size.is_some() {
            request = request.header(header::RANGE, "bytes=0-");
        }

        let upstream = request.send().await.map_err(send_error)?;

        let upstream_status = upstream.status();
        if upstream_status.as_u16() >= 400 {
            warn!("Upstream error {}", upstream_status);
            return Err(Error::Upstream {
                status: upstream_status.as_u16(),
            });
        }

        let status = if upstream_status == StatusCode::PARTIAL_CONTENT {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        };

        let mut headers = HeaderMap::new();
        for name in MIRRORED_HEADERS {
            if let Some(value) = upstream.headers().get(&name) {
                headers.insert(name, value.clone());
            }
        }
        headers
            .entry(header::CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("video/mp4"));
        headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        insert_cors(&mut headers);
        headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Range, Content-Length, Accept-Ranges"),
        );

        debug!(
            status = status.as_u16(),
            range = ?headers.get(header::CONTENT_RANGE),
            "Relaying upstream body"
        );

        let reader = StreamReader::new(upstream.bytes_stream().map_err(std::io::Error::other));
        let body = Body::from_stream(ReaderStream::with_capacity(reader, self.chunk_size));

        Ok((status, headers, body).into_response())
    }
}

fn insert_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
}

/// CORS preflight answer for in-page players doing range requests
pub fn preflight() -> Response {
    let mut headers = HeaderMap::new();
    insert_cors(&mut headers);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Range"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
    (StatusCode::NO_CONTENT, headers).into_response()
}
