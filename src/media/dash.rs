//! DASH manifest synthesis
//!
//! Turns a resolved format list into a static on-demand MPD: one video
//! adaptation set (one representation per height) and one audio
//! adaptation set with a single track. Every `BaseURL` points back at the
//! range proxy, and `SegmentBase` ranges come from probing each file head.

use super::mp4::{BoxProber, BoxRanges};
use crate::{
    Error, Result,
    types::{Format, VideoInfo},
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Lowest height exposed in a manifest
pub const MIN_HEIGHT: u32 = 360;

const RANGE_PROXY_PATH: &str = "/api/videoplayback";

/// Renditions chosen for one manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Selection<'a> {
    /// Video-only formats, ascending height, one per height
    pub video: Vec<&'a Format>,
    pub audio: &'a Format,
}

fn is_mp4_video(format: &Format) -> bool {
    matches!(format.ext.as_str(), "mp4" | "mp4a")
}

fn is_mp4_audio(format: &Format) -> bool {
    matches!(format.ext.as_str(), "m4a" | "mp4")
}

/// Ranking among video formats of equal height
fn video_rank(a: &Format, b: &Format) -> Ordering {
    a.codec_family()
        .cmp(&b.codec_family())
        .then(a.bitrate().total_cmp(&b.bitrate()))
        .then_with(|| b.format_id.cmp(&a.format_id))
}

/// Ranking among audio formats: m4a first, then bitrate
fn audio_rank(a: &Format, b: &Format) -> Ordering {
    (a.ext == "m4a")
        .cmp(&(b.ext == "m4a"))
        .then(a.bitrate().total_cmp(&b.bitrate()))
        .then_with(|| b.format_id.cmp(&a.format_id))
}

/// Pick the renditions for a manifest capped at `max_height`
///
/// The result depends only on the set of formats, not their order.
pub fn select_formats(formats: &[Format], max_height: u32) -> Result<Selection<'_>> {
    let mut by_height: BTreeMap<u32, &Format> = BTreeMap::new();
    let mut audio: Option<&Format> = None;

    for format in formats.iter().filter(|f| f.is_direct_http()) {
        if format.is_video_only() {
            let height = format.height.unwrap_or(0);
            if !(MIN_HEIGHT..=max_height).contains(&height) || !is_mp4_video(format) {
                continue;
            }
            by_height
                .entry(height)
                .and_modify(|best| {
                    if video_rank(format, *best) == Ordering::Greater {
                        *best = format;
                    }
                })
                .or_insert(format);
        } else if format.is_audio_only() && is_mp4_audio(format) {
            audio = match audio {
                Some(best) if audio_rank(format, best) != Ordering::Greater => Some(best),
                _ => Some(format),
            };
        }
    }

    match audio {
        Some(audio) if !by_height.is_empty() => Ok(Selection {
            video: by_height.into_values().collect(),
            audio,
        }),
        _ => Err(Error::no_formats("No DASH formats available")),
    }
}

/// Escape text for an XML attribute or element body
pub fn xml_escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

/// Number without a trailing `.0` for whole values
fn plain_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn proxied(url: &str) -> String {
    format!("{}?url={}", RANGE_PROXY_PATH, urlencoding::encode(url))
}

fn bandwidth(format: &Format, fallback: u64) -> u64 {
    let bps = (format.bitrate() * 1000.0) as u64;
    if bps == 0 { fallback } else { bps }
}

fn push_segment_base(mpd: &mut String, probe: Option<&BoxRanges>) {
    if let Some((init_end, index_start, index_end)) = probe.and_then(BoxRanges::segment_base) {
        let _ = writeln!(
            mpd,
            r#"<SegmentBase indexRange="{}-{}"><Initialization range="0-{}"/></SegmentBase>"#,
            index_start, index_end, init_end
        );
    }
}

/// Render the MPD for a selection; `probes` follows video order, then audio
pub fn render_mpd(selection: &Selection<'_>, probes: &[Option<BoxRanges>], duration: f64) -> String {
    let mut mpd = String::new();
    mpd.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n");
    let _ = writeln!(
        mpd,
        r#"<MPD xmlns="urn:mpeg:dash:schema:mpd:2011" profiles="urn:mpeg:dash:profile:isoff-on-demand:2011" minBufferTime="PT1.5S" type="static" mediaPresentationDuration="PT{}S">"#,
        plain_number(duration.max(0.0))
    );
    mpd.push_str("<Period>\n");

    mpd.push_str(
        "<AdaptationSet id=\"0\" mimeType=\"video/mp4\" startWithSAP=\"1\" subsegmentAlignment=\"true\" scanType=\"progressive\">\n",
    );
    for (i, format) in selection.video.iter().enumerate() {
        let url = format.url.as_deref().unwrap_or_default();
        let _ = writeln!(
            mpd,
            r#"<Representation id="{}" codecs="{}" width="{}" height="{}" bandwidth="{}" frameRate="{}">"#,
            xml_escape(&format.format_id),
            xml_escape(format.vcodec.as_deref().unwrap_or("avc1.4d401e")),
            format.width.unwrap_or(0),
            format.height.unwrap_or(0),
            bandwidth(format, 1_000_000),
            plain_number(format.fps.unwrap_or(30.0)),
        );
        let _ = writeln!(mpd, "<BaseURL>{}</BaseURL>", xml_escape(&proxied(url)));
        push_segment_base(&mut mpd, probes.get(i).and_then(Option::as_ref));
        mpd.push_str("</Representation>\n");
    }
    mpd.push_str("</AdaptationSet>\n");

    let audio = selection.audio;
    mpd.push_str(
        "<AdaptationSet id=\"1\" mimeType=\"audio/mp4\" startWithSAP=\"1\" subsegmentAlignment=\"true\">\n",
    );
    let _ = writeln!(
        mpd,
        r#"<Representation id="{}" codecs="{}" bandwidth="{}">"#,
        xml_escape(&audio.format_id),
        xml_escape(audio.acodec.as_deref().unwrap_or("mp4a.40.2")),
        bandwidth(audio, 128_000),
    );
    mpd.push_str(
        "<AudioChannelConfiguration schemeIdUri=\"urn:mpeg:dash:23003:3:audio_channel_configuration:2011\" value=\"2\"/>\n",
    );
    let _ = writeln!(
        mpd,
        "<BaseURL>{}</BaseURL>",
        xml_escape(&proxied(audio.url.as_deref().unwrap_or_default()))
    );
    push_segment_base(
        &mut mpd,
        probes.get(selection.video.len()).and_then(Option::as_ref),
    );
    mpd.push_str("</Representation>\n</AdaptationSet>\n</Period>\n</MPD>");
    mpd
}

type CacheKey = (String, u32);

/// Builds manifests and keeps them for the manifest TTL
pub struct DashSynthesizer {
    prober: BoxProber,
    cache: Mutex<crate::utils::TtlMap<CacheKey, Arc<str>>>,
}

impl DashSynthesizer {
    pub fn new(prober: BoxProber, ttl: Duration) -> Self {
        Self {
            prober,
            cache: Mutex::new(crate::utils::TtlMap::new(ttl)),
        }
    }

    /// Build an MPD from resolved info, probing every representation concurrently
    pub async fn build(&self, info: &VideoInfo, max_height: u32) -> Result<String> {
        let selection = select_formats(&info.formats, max_height)?;

        let urls = selection
            .video
            .iter()
            .chain(std::iter::once(&selection.audio))
            .map(|f| f.url.as_deref().unwrap_or_default());
        let probes = join_all(urls.map(|url| self.prober.probe(url))).await;

        let mpd = render_mpd(&selection, &probes, info.duration.unwrap_or(0.0));
        info!(
            "DASH {}: {} video + 1 audio tracks, max {}p",
            info.id,
            selection.video.len(),
            selection.video.last().and_then(|f| f.height).unwrap_or(0)
        );
        Ok(mpd)
    }

    /// Cached manifest for `(video_id, max_height)`, resolving and building on a miss
    pub async fn manifest<F, Fut>(
        &self,
        video_id: &str,
        max_height: u32,
        resolve: F,
    ) -> Result<Arc<str>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<VideoInfo>>>,
    {
        let key = (video_id.to_string(), max_height);
        if let Some(mpd) = self.cache.lock().get(&key) {
            debug!("DASH cache hit for {} at {}p", video_id, max_height);
            return Ok(mpd.clone());
        }

        let info = resolve().await?;
        let mpd: Arc<str> = self.build(&info, max_height).await?.into();
        self.cache.lock().insert(key, mpd.clone());
        Ok(mpd)
    }

    /// Drop expired manifests
    pub fn sweep(&self) -> usize {
        self.cache.lock().sweep().len()
    }
}
