//! Media plumbing: range proxy, MP4 probing, DASH and HLS manifests
//!
//! Everything here talks to upstream CDNs through one shared
//! `reqwest::Client` built from the network settings.

pub mod allow;
pub mod dash;
pub mod hls;
pub mod mp4;
pub mod proxy;

pub use allow::HostAllowList;
pub use dash::DashSynthesizer;
pub use hls::HlsRewriter;
pub use mp4::{BoxProber, BoxRanges};
pub use proxy::RangeProxy;

use crate::{Error, Result, config::Settings};
use reqwest::{Client, ClientBuilder, Proxy};
use std::time::Duration;

fn client_builder(settings: &Settings) -> Result<ClientBuilder> {
    let mut builder = Client::builder()
        .user_agent(settings.network.user_agent.clone())
        .connect_timeout(Duration::from_secs(settings.network.connect_timeout))
        .pool_idle_timeout(Duration::from_secs(90));

    if let Some(proxy_url) = settings.get_proxy_url() {
        let proxy = Proxy::all(&proxy_url)
            .map_err(|e| Error::config("network.proxy", format!("Invalid proxy URL: {}", e)))?;
        builder = builder.proxy(proxy);
    }
    Ok(builder)
}

fn finish(builder: ClientBuilder) -> Result<Client> {
    builder
        .build()
        .map_err(|e| Error::config("network", format!("Failed to build HTTP client: {}", e)))
}

/// Upstream HTTP client honoring proxy, timeout and user-agent settings
///
/// Redirects are followed only while every hop stays on the media host
/// allow-list.
///
/// Only a connect timeout applies: media bodies stream for as long as the
/// client keeps reading. Bounded fetches set their own per-request timeout.
pub fn build_http_client(settings: &Settings) -> Result<Client> {
    let allow = HostAllowList::new(&settings.media.allowed_hosts);
    finish(client_builder(settings)?.redirect(allow.redirect_policy()))
}

/// Client for fixed third-party JSON APIs, with a whole-request timeout
pub fn build_api_client(settings: &Settings) -> Result<Client> {
    finish(
        client_builder(settings)?
            .timeout(Duration::from_secs(settings.network.request_timeout)),
    )
}
