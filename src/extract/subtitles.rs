//! Subtitle tracks and VTT retrieval
//!
//! Track lists come from resolved info, which also records the direct VTT
//! URL of every track. A subtitle request is served from the local cache
//! directory, then from the recorded URL, then by asking the resolver to
//! download it. Failed lookups are remembered briefly so a rate-limited
//! upstream is not hammered.

use super::resolver::Resolver;
use crate::{
    Error, Result,
    types::{SubtitleFile, SubtitleTrack, VideoInfo},
    utils::TtlMap,
};
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Chat replays are listed as subtitles but are not captions
const SKIPPED_LANGS: [&str; 2] = ["live_chat", "rechat"];

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq)]
struct TrackSource {
    url: String,
    auto: bool,
}

/// Subtitle cache and retrieval
pub struct SubtitleService {
    resolver: Arc<dyn Resolver>,
    client: Client,
    cache_dir: PathBuf,
    urls: Mutex<TtlMap<String, HashMap<String, TrackSource>>>,
    failures: Mutex<TtlMap<(String, String), ()>>,
}

fn pick_vtt(files: &[SubtitleFile]) -> Option<(&str, &str)> {
    let vtt = files.iter().find(|f| f.ext == "vtt")?;
    let url = vtt.url.as_deref()?;
    let name = files
        .iter()
        .find_map(|f| f.name.as_deref().filter(|n| !n.is_empty()))
        .unwrap_or_default();
    Some((url, name))
}

/// Language codes end up in file names; keep them to a safe alphabet
pub fn validate_lang(lang: &str) -> Result<()> {
    let ok = !lang.is_empty()
        && lang.len() <= 32
        && lang
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(Error::validation("lang", "Invalid subtitle language"))
    }
}

impl SubtitleService {
    pub fn new(
        resolver: Arc<dyn Resolver>,
        client: Client,
        cache_dir: PathBuf,
        url_ttl: Duration,
        failure_ttl: Duration,
    ) -> Self {
        Self {
            resolver,
            client,
            cache_dir,
            urls: Mutex::new(TtlMap::new(url_ttl)),
            failures: Mutex::new(TtlMap::new(failure_ttl)),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Track list for `info`, recording each track's VTT URL
    ///
    /// Manual subtitles come first; automatic captions are added only for
    /// languages without a manual track and are labelled "(auto)".
    pub fn tracks(&self, info: &VideoInfo) -> Vec<SubtitleTrack> {
        let mut sources = HashMap::new();
        let mut tracks = Vec::new();

        let groups: [(&BTreeMap<String, Vec<SubtitleFile>>, bool); 2] =
            [(&info.subtitles, false), (&info.automatic_captions, true)];
        for (group, auto) in groups {
            for (lang, files) in group {
                if SKIPPED_LANGS.contains(&lang.as_str()) || sources.contains_key(lang) {
                    continue;
                }
                let Some((url, name)) = pick_vtt(files) else {
                    continue;
                };
                let name = if name.is_empty() { lang.as_str() } else { name };
                let label = if auto {
                    format!("{} (auto)", name)
                } else {
                    name.to_string()
                };
                sources.insert(
                    lang.clone(),
                    TrackSource {
                        url: url.to_string(),
                        auto,
                    },
                );
                tracks.push(SubtitleTrack {
                    lang: lang.clone(),
                    label,
                    auto,
                });
            }
        }

        self.urls.lock().insert(info.id.clone(), sources);
        tracks
    }

    async fn find_local(&self, video_id: &str, lang: &str) -> Option<PathBuf> {
        let suffix = format!(".{}.vtt", lang);
        let mut entries = tokio::fs::read_dir(&self.cache_dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(video_id) && name.ends_with(&suffix) {
                return Some(entry.path());
            }
        }
        None
    }

    fn recorded_url(&self, video_id: &str, lang: &str) -> Option<String> {
        let urls = self.urls.lock();
        let sources = urls.get(video_id)?;
        let base = lang.split('-').next().unwrap_or(lang);
        sources
            .get(lang)
            .or_else(|| sources.get(base))
            .map(|s| s.url.clone())
    }

    async fn fetch_direct(&self, video_id: &str, lang: &str, url: &str) -> Option<Vec<u8>> {
        let response = match self.client.get(url).timeout(FETCH_TIMEOUT).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Direct subtitle fetch failed: {}", e);
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            debug!("Direct subtitle fetch got {}", response.status());
            return None;
        }
        let body = response.bytes().await.ok()?.to_vec();

        let path = self.cache_dir.join(format!("{}.{}.vtt", video_id, lang));
        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            warn!("Cannot create subtitle cache dir: {}", e);
        } else if let Err(e) = tokio::fs::write(&path, &body).await {
            warn!("Cannot write subtitle cache {:?}: {}", path, e);
        }
        Some(body)
    }

    fn remember_failure(&self, video_id: &str, lang: &str) {
        self.failures
            .lock()
            .insert((video_id.to_string(), lang.to_string()), ());
    }

    /// VTT bytes for `(video_id, lang)`
    pub async fn subtitle(&self, video_id: &str, lang: &str) -> Result<Vec<u8>> {
        validate_lang(lang)?;

        if let Some(path) = self.find_local(video_id, lang).await {
            return Ok(tokio::fs::read(path).await?);
        }

        let key = (video_id.to_string(), lang.to_string());
        if self.failures.lock().get(&key).is_some() {
            return Err(Error::not_found("Subtitle unavailable (rate-limited)"));
        }

        if let Some(url) = self.recorded_url(video_id, lang)
            && let Some(body) = self.fetch_direct(video_id, lang, &url).await
        {
            return Ok(body);
        }

        if let Err(e) = self
            .resolver
            .download_subtitle(video_id, lang, &self.cache_dir)
            .await
        {
            self.remember_failure(video_id, lang);
            return Err(e);
        }

        match self.find_local(video_id, lang).await {
            Some(path) => Ok(tokio::fs::read(path).await?),
            None => {
                self.remember_failure(video_id, lang);
                Err(Error::not_found("Subtitle not found"))
            }
        }
    }

    /// Drop expired URL records and failure markers
    pub fn sweep(&self) -> usize {
        self.urls.lock().sweep().len() + self.failures.lock().sweep().len()
    }
}
