//! Extraction arbitration between anonymous and signed-in resolution
//!
//! Anonymous extraction is the default. A failure is classified and may be
//! retried with cookies: an age gate flags the video so later requests go
//! straight to cookies, a bot check arms a global cooldown during which
//! every video prefers cookies. Outcomes are cached (long for successes,
//! short for failures) and at most one extraction per video runs at a time.

use super::{
    FailureKind, classify,
    resolver::{Credentials, Resolver},
};
use crate::{Error, Result, types::VideoInfo, utils::TtlMap};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Caller-selected cookie policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CookieMode {
    /// Never use cookies
    Off,
    /// Anonymous first, cookies on age gate or throttling
    #[default]
    Auto,
    /// Always use cookies when available
    On,
}

impl FromStr for CookieMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(CookieMode::Off),
            "auto" | "" => Ok(CookieMode::Auto),
            "on" => Ok(CookieMode::On),
            other => Err(Error::validation(
                "cookie_mode",
                format!("Unknown cookie mode '{}'", other),
            )),
        }
    }
}

impl CookieMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CookieMode::Off => "off",
            CookieMode::Auto => "auto",
            CookieMode::On => "on",
        }
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Ready(Arc<VideoInfo>),
    Failed { message: String, kind: FailureKind },
}

impl Outcome {
    fn into_result(self) -> Result<Arc<VideoInfo>> {
        match self {
            Outcome::Ready(info) => Ok(info),
            Outcome::Failed { message, kind } => Err(Error::extraction(message, kind)),
        }
    }
}

/// TTLs for the arbiter's caches
#[derive(Debug, Clone, Copy)]
pub struct ArbiterTtls {
    pub positive: Duration,
    pub negative: Duration,
    pub cooldown: Duration,
}

impl Default for ArbiterTtls {
    fn default() -> Self {
        Self {
            positive: Duration::from_secs(5 * 3600),
            negative: Duration::from_secs(300),
            cooldown: Duration::from_secs(600),
        }
    }
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// A caller's claim on a video's extraction gate
///
/// The last claim to go away removes the gate, whether its caller finished
/// or its future was dropped mid-extraction.
struct InflightClaim<'a> {
    map: &'a Mutex<HashMap<String, Gate>>,
    video_id: &'a str,
    gate: Gate,
}

impl<'a> InflightClaim<'a> {
    fn join(map: &'a Mutex<HashMap<String, Gate>>, video_id: &'a str) -> Self {
        let gate = map.lock().entry(video_id.to_string()).or_default().clone();
        Self { map, video_id, gate }
    }
}

impl Drop for InflightClaim<'_> {
    fn drop(&mut self) {
        let mut map = self.map.lock();
        // Counts only change under the map lock, so two means map plus us
        let gate = std::mem::take(&mut self.gate);
        if Arc::strong_count(&gate) == 2
            && map.get(self.video_id).is_some_and(|g| Arc::ptr_eq(g, &gate))
        {
            map.remove(self.video_id);
        }
    }
}

pub struct ExtractionArbiter {
    resolver: Arc<dyn Resolver>,
    ttls: ArbiterTtls,
    cache: Mutex<TtlMap<String, Outcome>>,
    age_restricted: Mutex<TtlMap<String, ()>>,
    throttled_until: Mutex<Option<Instant>>,
    inflight: Mutex<HashMap<String, Gate>>,
}

fn failure_of(error: &Error) -> (String, FailureKind) {
    match error {
        Error::Extraction { message, kind } => (message.clone(), *kind),
        other => {
            let message = other.to_string();
            let kind = classify(&message);
            (message, kind)
        }
    }
}

impl ExtractionArbiter {
    pub fn new(resolver: Arc<dyn Resolver>, ttls: ArbiterTtls) -> Self {
        Self {
            resolver,
            ttls,
            cache: Mutex::new(TtlMap::new(ttls.positive)),
            age_restricted: Mutex::new(TtlMap::new(ttls.positive)),
            throttled_until: Mutex::new(None),
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    fn cached(&self, video_id: &str) -> Option<Outcome> {
        self.cache.lock().get(video_id).cloned()
    }

    /// Whether the global cooldown is currently armed
    pub fn cooldown_active(&self) -> bool {
        self.throttled_until
            .lock()
            .is_some_and(|until| until > Instant::now())
    }

    pub fn is_age_restricted(&self, video_id: &str) -> bool {
        self.age_restricted.lock().get(video_id).is_some()
    }

    fn arm_cooldown(&self) {
        let until = Instant::now() + self.ttls.cooldown;
        *self.throttled_until.lock() = Some(until);
        warn!(
            "Anonymous extraction throttled, preferring cookies for {}s",
            self.ttls.cooldown.as_secs()
        );
    }

    /// Resolve `video_id` under `mode`, from cache when possible
    pub async fn resolve(&self, video_id: &str, mode: CookieMode) -> Result<Arc<VideoInfo>> {
        if let Some(outcome) = self.cached(video_id) {
            debug!("Info cache hit for {}", video_id);
            return outcome.into_result();
        }

        let claim = InflightClaim::join(&self.inflight, video_id);
        let _turn = claim.gate.lock().await;

        // Another caller may have filled the cache while we waited
        if let Some(outcome) = self.cached(video_id) {
            return outcome.into_result();
        }

        let outcome = match self.run_strategy(video_id, mode).await {
            Ok(info) => {
                let info = Arc::new(info);
                let outcome = Outcome::Ready(info);
                self.cache.lock().insert_for(
                    video_id.to_string(),
                    outcome.clone(),
                    self.ttls.positive,
                );
                outcome
            }
            Err(e) => {
                let (message, kind) = failure_of(&e);
                let outcome = Outcome::Failed { message, kind };
                self.cache
                    .lock()
                    .insert_for(video_id.to_string(), outcome.clone(), self.ttls.negative);
                outcome
            }
        };

        outcome.into_result()
    }

    async fn attempt(&self, video_id: &str, credentials: Credentials) -> Result<VideoInfo> {
        debug!("Extracting {} ({:?})", video_id, credentials);
        self.resolver.resolve(video_id, credentials).await
    }

    async fn run_strategy(&self, video_id: &str, mode: CookieMode) -> Result<VideoInfo> {
        let can_auth = self.resolver.has_authenticated();
        match mode {
            CookieMode::Off => self.attempt(video_id, Credentials::Anonymous).await,
            CookieMode::On if can_auth => self.attempt(video_id, Credentials::Cookies).await,
            CookieMode::On => self.attempt(video_id, Credentials::Anonymous).await,
            CookieMode::Auto if !can_auth => self.attempt(video_id, Credentials::Anonymous).await,
            CookieMode::Auto => self.run_auto(video_id).await,
        }
    }

    async fn run_auto(&self, video_id: &str) -> Result<VideoInfo> {
        let age_flagged = self.is_age_restricted(video_id);
        let cooldown = self.cooldown_active();
        if age_flagged || cooldown {
            info!(
                "Using cookies first for {} (age_restricted={}, cooldown={})",
                video_id, age_flagged, cooldown
            );
            let first = self.attempt(video_id, Credentials::Cookies).await;
            // An age-gated video cannot succeed anonymously
            if first.is_ok() || age_flagged {
                return first;
            }
            return self.attempt(video_id, Credentials::Anonymous).await;
        }

        let error = match self.attempt(video_id, Credentials::Anonymous).await {
            Ok(info) => return Ok(info),
            Err(e) => e,
        };

        let (message, kind) = failure_of(&error);
        match kind {
            FailureKind::AgeRestricted => {
                info!("{} is age restricted, retrying with cookies", video_id);
                self.age_restricted
                    .lock()
                    .insert(video_id.to_string(), ());
                self.attempt(video_id, Credentials::Cookies).await
            }
            FailureKind::Throttled => {
                self.arm_cooldown();
                self.attempt(video_id, Credentials::Cookies).await
            }
            FailureKind::Other => {
                debug!("Extraction of {} failed: {}", video_id, message);
                Err(error)
            }
        }
    }

    /// Drop expired cache entries and a lapsed cooldown
    pub fn sweep(&self) -> usize {
        let mut removed = self.cache.lock().sweep().len();
        removed += self.age_restricted.lock().sweep().len();
        let mut until = self.throttled_until.lock();
        if until.is_some_and(|t| t <= Instant::now()) {
            *until = None;
        }
        removed
    }
}
