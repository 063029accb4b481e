//! HLS playlist passthrough
//!
//! The relay exposes a single upstream rendition and rewrites its segment
//! and init-map URIs so every byte goes through the segment proxy. Tags
//! other than `EXT-X-MAP` are left untouched.

use super::allow::send_error;
use crate::{Error, Result, types::Format};
use regex::Regex;
use reqwest::Client;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

const SEGMENT_PROXY_PATH: &str = "/api/hls-segment";

static MAP_URI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"URI="([^"]*)""#).expect("valid URI pattern"));

/// Highest-resolution combined HLS rendition
pub fn select_rendition(formats: &[Format]) -> Result<&Format> {
    formats
        .iter()
        .filter(|f| f.is_hls() && f.has_video() && f.has_audio())
        .max_by(|a, b| {
            a.height
                .unwrap_or(0)
                .cmp(&b.height.unwrap_or(0))
                .then(a.bitrate().total_cmp(&b.bitrate()))
                .then_with(|| b.format_id.cmp(&a.format_id))
        })
        .ok_or_else(|| Error::no_formats("No HLS formats available"))
}

fn proxied(base: &Url, reference: &str) -> String {
    let absolute = base
        .join(reference)
        .map(String::from)
        .unwrap_or_else(|_| reference.to_string());
    format!(
        "{}?url={}",
        SEGMENT_PROXY_PATH,
        urlencoding::encode(&absolute)
    )
}

/// Route every URI line and `EXT-X-MAP` URI of `playlist` through the segment proxy
pub fn rewrite_playlist(playlist: &str, base: &Url) -> String {
    let mut out = String::with_capacity(playlist.len() * 2);
    for line in playlist.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("#EXT-X-MAP") {
            let rewritten = MAP_URI.replace(line, |caps: &regex::Captures<'_>| {
                format!("URI=\"{}\"", proxied(base, &caps[1]))
            });
            out.push_str(&rewritten);
        } else if !trimmed.is_empty() && !trimmed.starts_with('#') {
            out.push_str(&proxied(base, trimmed));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Fetches and rewrites upstream playlists
#[derive(Debug, Clone)]
pub struct HlsRewriter {
    client: Client,
}

impl HlsRewriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Rewritten playlist for the best combined rendition of `formats`
    pub async fn playlist(&self, formats: &[Format]) -> Result<String> {
        let rendition = select_rendition(formats)?;
        let raw_url = rendition
            .url
            .as_deref()
            .ok_or_else(|| Error::no_formats("No HLS formats available"))?;
        let response = self
            .client
            .get(Url::parse(raw_url)?)
            .send()
            .await
            .map_err(send_error)?;
        if response.status().as_u16() >= 400 {
            return Err(Error::Upstream {
                status: response.status().as_u16(),
            });
        }
        // Relative URIs resolve against where the playlist was finally served
        let base = response.url().clone();
        let text = response.text().await?;
        debug!(
            "HLS rendition {} ({}p), {} bytes",
            rendition.format_id,
            rendition.height.unwrap_or(0),
            text.len()
        );
        Ok(rewrite_playlist(&text, &base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn hls(id: &str, height: u32, url: &str) -> Format {
        Format {
            format_id: id.to_string(),
            url: Some(url.to_string()),
            ext: "mp4".to_string(),
            vcodec: Some("avc1.4d401f".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            height: Some(height),
            protocol: Some("m3u8_native".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_select_highest_combined() {
        let formats = vec![
            hls("93", 360, "https://manifest.googlevideo.com/a.m3u8"),
            hls("95", 720, "https://manifest.googlevideo.com/b.m3u8"),
            Format {
                acodec: Some("none".to_string()),
                ..hls("270", 1080, "https://manifest.googlevideo.com/c.m3u8")
            },
        ];
        assert_eq!(select_rendition(&formats).unwrap().format_id, "95");
        assert!(matches!(
            select_rendition(&formats[2..]),
            Err(Error::NoFormats { .. })
        ));
    }

    #[test]
    fn test_rewrite_segments_and_map() {
        let base = Url::parse("https://manifest.googlevideo.com/api/index.m3u8").unwrap();
        let playlist = "#EXTM3U\n#EXT-X-TARGETDURATION:5\n#EXT-X-MAP:URI=\"init.mp4\"\n#EXTINF:5.0,\nhttps://rr1.googlevideo.com/seg/1?a=1&b=2\n#EXTINF:5.0,\nseg/2.ts\n#EXT-X-ENDLIST\n";
        let out = rewrite_playlist(playlist, &base);
        let lines: Vec<&str> = out.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#EXT-X-TARGETDURATION:5");
        assert_eq!(
            lines[2],
            "#EXT-X-MAP:URI=\"/api/hls-segment?url=https%3A%2F%2Fmanifest.googlevideo.com%2Fapi%2Finit.mp4\""
        );
        assert_eq!(
            lines[4],
            "/api/hls-segment?url=https%3A%2F%2Frr1.googlevideo.com%2Fseg%2F1%3Fa%3D1%26b%3D2"
        );
        assert_eq!(
            lines[6],
            "/api/hls-segment?url=https%3A%2F%2Fmanifest.googlevideo.com%2Fapi%2Fseg%2F2.ts"
        );
        assert_eq!(lines[7], "#EXT-X-ENDLIST");
    }

    #[tokio::test]
    async fn test_playlist_fetch_and_rewrite() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:4,\nsegment0.ts\n"))
            .mount(&server)
            .await;

        let formats = vec![hls("95", 720, &format!("{}/index.m3u8", server.uri()))];
        let text = HlsRewriter::new(Client::new())
            .playlist(&formats)
            .await
            .unwrap();
        assert!(text.contains("/api/hls-segment?url=http%3A%2F%2F127.0.0.1"));
        assert!(text.contains("segment0.ts"));
    }

    #[tokio::test]
    async fn test_playlist_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(410))
            .mount(&server)
            .await;

        let formats = vec![hls("95", 720, &format!("{}/index.m3u8", server.uri()))];
        let err = HlsRewriter::new(Client::new())
            .playlist(&formats)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { status: 410 }));
    }
}
