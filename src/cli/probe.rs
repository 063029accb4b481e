//! Probe mode: print the DASH byte ranges of one media URL
//!
//! Script counterpart of the manifest synthesizer's box probing, for
//! checking a stream by hand.

use crate::{
    Settings,
    config::ConfigLoader,
    media::{BoxProber, BoxRanges, build_http_client},
};
use anyhow::{Context, Result};
use std::time::Duration;

/// Arguments for probe mode
#[derive(Debug)]
pub struct ProbeArgs {
    pub url: String,
    pub config: Option<String>,
}

/// Fetch the head of `args.url` and locate its init and index ranges
pub async fn probe_ranges(args: &ProbeArgs) -> Result<BoxRanges> {
    let config_path = match &args.config {
        Some(config) => Some(std::path::PathBuf::from(config)),
        None => ConfigLoader::get_config_path(),
    };
    let settings = ConfigLoader::new()
        .load(config_path.as_deref())
        .unwrap_or_else(|_| Settings::default());

    url::Url::parse(&args.url).with_context(|| format!("Invalid URL: {}", args.url))?;
    let client = build_http_client(&settings)?;
    let prober = BoxProber::new(
        client,
        settings.media.probe_bytes,
        Duration::from_secs(settings.media.probe_timeout_secs),
    );

    let ranges = prober
        .probe(&args.url)
        .await
        .context("Could not fetch the media head")?;
    if ranges.is_empty() {
        anyhow::bail!("No moov or sidx box found in the first {} bytes", settings.media.probe_bytes);
    }
    Ok(ranges)
}

/// Run probe mode, printing the ranges as JSON
pub async fn run_probe_mode(args: ProbeArgs) -> Result<()> {
    let ranges = probe_ranges(&args).await?;
    println!("{}", serde_json::to_string(&ranges)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mp4_head() -> Vec<u8> {
        let mut data = Vec::new();
        data.extend_from_slice(&24u32.to_be_bytes());
        data.extend_from_slice(b"ftyp");
        data.extend_from_slice(&[0u8; 16]);
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"moov");
        data.extend_from_slice(&[0u8; 92]);
        data.extend_from_slice(&52u32.to_be_bytes());
        data.extend_from_slice(b"sidx");
        data.extend_from_slice(&[0u8; 44]);
        data
    }

    #[tokio::test]
    async fn test_probe_reports_ranges() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/videoplayback"))
            .and(header("range", "bytes=0-4095"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(mp4_head()))
            .mount(&server)
            .await;

        let ranges = probe_ranges(&ProbeArgs {
            url: format!("{}/videoplayback", server.uri()),
            config: None,
        })
        .await
        .unwrap();
        assert_eq!(ranges.segment_base(), Some((123, 124, 175)));
    }

    #[tokio::test]
    async fn test_probe_without_boxes_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64]))
            .mount(&server)
            .await;

        let result = probe_ranges(&ProbeArgs {
            url: server.uri(),
            config: None,
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_probe_rejects_invalid_url() {
        let result = probe_ranges(&ProbeArgs {
            url: "not a url".to_string(),
            config: None,
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("Invalid URL"));
    }
}
