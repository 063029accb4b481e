//! ISO-BMFF box scanning for DASH `SegmentBase` ranges
//!
//! Only the first few kilobytes of a file are fetched. Boxes are walked
//! header by header; anything past the window is simply not reported.

use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Byte ranges located in the head of a fragmented MP4
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BoxRanges {
    /// Last byte of the `moov` box; the init segment is `0..=init_end`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub init_end: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_start: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_end: Option<u64>,
}

impl BoxRanges {
    /// `(init_end, index_start, index_end)` when both ranges were found
    pub fn segment_base(&self) -> Option<(u64, u64, u64)> {
        Some((self.init_end?, self.index_start?, self.index_end?))
    }

    pub fn is_empty(&self) -> bool {
        self.init_end.is_none() && self.index_start.is_none()
    }
}

fn read_u32(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 4] = data.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_be_bytes(bytes) as u64)
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Walk top-level box headers in `data`
pub fn parse_boxes(data: &[u8]) -> BoxRanges {
    let mut ranges = BoxRanges::default();
    let mut offset: usize = 0;

    while offset + 8 < data.len() {
        let Some(mut size) = read_u32(data, offset) else {
            break;
        };
        let kind = &data[offset + 4..offset + 8];

        if size == 1 {
            // 64-bit size follows the type
            match read_u64(data, offset + 8) {
                Some(large) => size = large,
                None => break,
            }
        } else if size == 0 {
            size = (data.len() - offset) as u64;
        }
        if size < 8 {
            break;
        }

        let start = offset as u64;
        let end = start + size - 1;
        match kind {
            b"moov" => ranges.init_end = Some(end),
            b"sidx" => {
                ranges.index_start = Some(start);
                ranges.index_end = Some(end);
            }
            _ => {}
        }

        match usize::try_from(size).ok().and_then(|s| offset.checked_add(s)) {
            Some(next) => offset = next,
            None => break,
        }
    }

    ranges
}

/// Fetches the head of media URLs and parses their boxes
#[derive(Debug, Clone)]
pub struct BoxProber {
    client: Client,
    window: usize,
    timeout: Duration,
}

impl BoxProber {
    pub fn new(client: Client, window: usize, timeout: Duration) -> Self {
        Self {
            client,
            window: window.max(16),
            timeout,
        }
    }

    /// Probe `url`; any network or status failure yields `None`
    pub async fn probe(&self, url: &str) -> Option<BoxRanges> {
        let range = format!("bytes=0-{}", self.window - 1);
        let response = match self
            .client
            .get(url)
            .header(header::RANGE, range)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                debug!("Probe request failed: {}", e);
                return None;
            }
        };

        if !matches!(response.status(), StatusCode::OK | StatusCode::PARTIAL_CONTENT) {
            debug!("Probe got status {}", response.status());
            return None;
        }

        let body = response.bytes().await.ok()?;
        let head = &body[..body.len().min(self.window)];
        Some(parse_boxes(head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{header as match_header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn boxed(kind: &[u8; 4], size: u32) -> Vec<u8> {
        let mut out = size.to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.resize(size as usize, 0);
        out
    }

    /// ftyp(24) + moov(600) + sidx(100) + mdat header
    fn sample_head() -> Vec<u8> {
        let mut data = boxed(b"ftyp", 24);
        data.extend(boxed(b"moov", 600));
        data.extend(boxed(b"sidx", 100));
        data.extend_from_slice(&100_000u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[0u8; 32]);
        data
    }

    #[test]
    fn test_locates_moov_and_sidx() {
        let ranges = parse_boxes(&sample_head());
        assert_eq!(
            ranges,
            BoxRanges {
                init_end: Some(623),
                index_start: Some(624),
                index_end: Some(723),
            }
        );
        assert_eq!(ranges.segment_base(), Some((623, 624, 723)));
    }

    #[test]
    fn test_extended_size() {
        let mut data = boxed(b"ftyp", 16);
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&40u64.to_be_bytes());
        data.resize(16 + 40, 0);
        data.extend(boxed(b"free", 8));
        let ranges = parse_boxes(&data);
        assert_eq!(ranges.init_end, Some(55));
    }

    #[test]
    fn test_size_zero_runs_to_end_of_window() {
        let mut data = boxed(b"ftyp", 16);
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"sidx");
        data.extend_from_slice(&[0u8; 24]);
        let ranges = parse_boxes(&data);
        assert_eq!(ranges.index_start, Some(16));
        assert_eq!(ranges.index_end, Some(data.len() as u64 - 1));
        assert_eq!(ranges.segment_base(), None);
    }

    #[test]
    fn test_malformed_size_stops_scan() {
        let mut data = boxed(b"ftyp", 16);
        data.extend_from_slice(&4u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 16]);
        assert!(parse_boxes(&data).is_empty());
    }

    #[test]
    fn test_truncated_window_keeps_partial_result() {
        let head = sample_head();
        // Cut inside the sidx box: moov is known, sidx header still present
        let ranges = parse_boxes(&head[..650]);
        assert_eq!(ranges.init_end, Some(623));
        assert_eq!(ranges.index_start, Some(624));
    }

    #[test]
    fn test_empty_input() {
        assert!(parse_boxes(&[]).is_empty());
        assert!(parse_boxes(&[0, 0, 0]).is_empty());
    }

    #[tokio::test]
    async fn test_probe_fetches_bounded_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(match_header("range", "bytes=0-4095"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(sample_head()))
            .expect(1)
            .mount(&server)
            .await;

        let prober = BoxProber::new(Client::new(), 4096, Duration::from_secs(5));
        let ranges = prober.probe(&server.uri()).await.unwrap();
        assert_eq!(ranges.init_end, Some(623));
    }

    #[tokio::test]
    async fn test_probe_failure_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let prober = BoxProber::new(Client::new(), 4096, Duration::from_secs(5));
        assert!(prober.probe(&server.uri()).await.is_none());
    }
}
