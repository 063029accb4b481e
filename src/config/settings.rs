//! Configuration settings
//!
//! Every table and field has a default, so an empty or partial TOML file
//! is always a valid configuration. Environment variables override the
//! file; command-line flags override both.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// Helper functions for serde defaults
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "::".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cookie_name() -> String {
    "pytr_session".to_string()
}

fn default_failures_short() -> u32 {
    5
}

fn default_failures_long() -> u32 {
    10
}

fn default_lockout_short() -> u64 {
    3600
}

fn default_lockout_long() -> u64 {
    86400
}

fn default_pairing_ttl() -> u64 {
    300
}

fn default_pairing_rate_limit() -> usize {
    5
}

fn default_pairing_rate_window() -> u64 {
    600
}

fn default_resolver_binary() -> String {
    "yt-dlp".to_string()
}

fn default_cookie_mode() -> String {
    "auto".to_string()
}

fn default_sponsorblock_api() -> String {
    "https://sponsor.ajay.app".to_string()
}

fn default_resolver_timeout() -> u64 {
    120
}

fn default_info_ttl() -> u64 {
    5 * 3600
}

fn default_negative_ttl() -> u64 {
    300
}

fn default_throttle_cooldown() -> u64 {
    600
}

fn default_sponsorblock_ttl() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_long_sweep_interval() -> u64 {
    3600
}

fn default_cancel_grace() -> u64 {
    5
}

fn default_retention() -> u64 {
    60
}

fn default_start_delay_ms() -> u64 {
    300
}

fn default_allowed_hosts() -> Vec<String> {
    ["googlevideo.com", "youtube.com", "ytimg.com", "googleusercontent.com"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_probe_bytes() -> usize {
    4096
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_request_timeout() -> u64 {
    60
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36".to_string()
}

// Duration serialization module
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Main configuration settings for the relay
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerSettings,
    /// Password, lockout and pairing configuration
    #[serde(default)]
    pub auth: AuthSettings,
    /// Resolver invocation configuration
    #[serde(default)]
    pub extraction: ExtractionSettings,
    /// In-memory cache lifetimes
    #[serde(default)]
    pub cache: CacheSettings,
    /// Background download configuration
    #[serde(default)]
    pub download: DownloadSettings,
    /// Range proxy and manifest configuration
    #[serde(default)]
    pub media: MediaSettings,
    /// Outbound network configuration
    #[serde(default)]
    pub network: NetworkSettings,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Persistent store configuration
    #[serde(default)]
    pub store: StoreSettings,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout for non-streaming API calls
    #[serde(with = "duration_secs", default = "default_timeout")]
    pub timeout: Duration,
    /// Directory served under `/static`
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// Session cookie name
    #[serde(default = "default_cookie_name")]
    pub cookie_name: String,
    /// Take the client IP from `X-Forwarded-For` when present
    #[serde(default = "default_true")]
    pub trust_forwarded_for: bool,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

/// Password, lockout and pairing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    /// Bootstrap app password, stored only when none is stored yet
    #[serde(default)]
    pub password: Option<String>,
    /// Failures before the short lockout
    #[serde(default = "default_failures_short")]
    pub max_failures_short: u32,
    /// Failures before the long lockout
    #[serde(default = "default_failures_long")]
    pub max_failures_long: u32,
    /// Short lockout duration in seconds
    #[serde(default = "default_lockout_short")]
    pub lockout_short_secs: u64,
    /// Long lockout duration in seconds
    #[serde(default = "default_lockout_long")]
    pub lockout_long_secs: u64,
    /// Pairing code lifetime in seconds
    #[serde(default = "default_pairing_ttl")]
    pub pairing_ttl_secs: u64,
    /// Maximum pairing requests per IP per window
    #[serde(default = "default_pairing_rate_limit")]
    pub pairing_rate_limit: usize,
    /// Pairing rate window in seconds
    #[serde(default = "default_pairing_rate_window")]
    pub pairing_rate_window_secs: u64,
}

/// Resolver invocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Resolver executable
    #[serde(default = "default_resolver_binary")]
    pub binary: String,
    /// Browser to read cookies from for authenticated extraction
    #[serde(default)]
    pub cookies_browser: Option<String>,
    /// Netscape cookie file for authenticated extraction
    #[serde(default)]
    pub cookies_file: Option<PathBuf>,
    /// Default cookie mode (off, auto, on)
    #[serde(default = "default_cookie_mode")]
    pub cookie_mode: String,
    /// Resolver timeout in seconds
    #[serde(default = "default_resolver_timeout")]
    pub timeout_secs: u64,
    /// SponsorBlock API base URL
    #[serde(default = "default_sponsorblock_api")]
    pub sponsorblock_api: String,
}

/// In-memory cache lifetimes, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Successful extraction lifetime
    #[serde(default = "default_info_ttl")]
    pub info_ttl: u64,
    /// Failed extraction lifetime
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl: u64,
    /// DASH manifest lifetime
    #[serde(default = "default_info_ttl")]
    pub manifest_ttl: u64,
    /// Global throttle cooldown
    #[serde(default = "default_throttle_cooldown")]
    pub throttle_cooldown: u64,
    /// Failed subtitle lookup lifetime
    #[serde(default = "default_negative_ttl")]
    pub subtitle_negative_ttl: u64,
    /// SponsorBlock segment lifetime
    #[serde(default = "default_sponsorblock_ttl")]
    pub sponsorblock_ttl: u64,
    /// Short sweep interval
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,
    /// Long sweep interval
    #[serde(default = "default_long_sweep_interval")]
    pub long_sweep_interval: u64,
    /// Subtitle file cache directory
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

/// Background download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Output directory for finished files
    #[serde(default)]
    pub dir: Option<PathBuf>,
    /// Downloader executable
    #[serde(default = "default_resolver_binary")]
    pub binary: String,
    /// Seconds between terminate and kill on cancel
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    /// Seconds a terminal job stays visible
    #[serde(default = "default_retention")]
    pub retention_secs: u64,
    /// Delay before answering a play request, in milliseconds
    #[serde(default = "default_start_delay_ms")]
    pub start_delay_ms: u64,
}

/// Range proxy and manifest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaSettings {
    /// Host suffixes the proxies may fetch from
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,
    /// Streaming chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Bytes fetched when probing MP4 boxes
    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: usize,
    /// Probe timeout in seconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

/// Outbound network and proxy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSettings {
    /// HTTPS proxy URL
    #[serde(default)]
    pub https_proxy: Option<String>,
    /// HTTP proxy URL
    #[serde(default)]
    pub http_proxy: Option<String>,
    /// All protocols proxy URL
    #[serde(default)]
    pub all_proxy: Option<String>,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Per-read timeout in seconds for upstream bodies
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    /// User agent string
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable verbose logging
    #[serde(default)]
    pub verbose: bool,
    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
    /// Enable request/response logging
    #[serde(default = "default_true")]
    pub log_requests: bool,
}

/// Persistent store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSettings {
    /// JSON snapshot file
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
    /// Load and flush the snapshot
    #[serde(default = "default_true")]
    pub snapshot_enabled: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout: default_timeout(),
            static_dir: None,
            cookie_name: default_cookie_name(),
            trust_forwarded_for: default_true(),
            enable_cors: default_true(),
        }
    }
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            password: None,
            max_failures_short: default_failures_short(),
            max_failures_long: default_failures_long(),
            lockout_short_secs: default_lockout_short(),
            lockout_long_secs: default_lockout_long(),
            pairing_ttl_secs: default_pairing_ttl(),
            pairing_rate_limit: default_pairing_rate_limit(),
            pairing_rate_window_secs: default_pairing_rate_window(),
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            binary: default_resolver_binary(),
            cookies_browser: None,
            cookies_file: None,
            cookie_mode: default_cookie_mode(),
            timeout_secs: default_resolver_timeout(),
            sponsorblock_api: default_sponsorblock_api(),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            info_ttl: default_info_ttl(),
            negative_ttl: default_negative_ttl(),
            manifest_ttl: default_info_ttl(),
            throttle_cooldown: default_throttle_cooldown(),
            subtitle_negative_ttl: default_negative_ttl(),
            sponsorblock_ttl: default_sponsorblock_ttl(),
            sweep_interval: default_sweep_interval(),
            long_sweep_interval: default_long_sweep_interval(),
            cache_dir: None,
        }
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            dir: None,
            binary: default_resolver_binary(),
            cancel_grace_secs: default_cancel_grace(),
            retention_secs: default_retention(),
            start_delay_ms: default_start_delay_ms(),
        }
    }
}

impl Default for MediaSettings {
    fn default() -> Self {
        Self {
            allowed_hosts: default_allowed_hosts(),
            chunk_size: default_chunk_size(),
            probe_bytes: default_probe_bytes(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            https_proxy: None,
            http_proxy: None,
            all_proxy: None,
            connect_timeout: default_connect_timeout(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            verbose: false,
            format: default_log_format(),
            log_requests: default_true(),
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            snapshot_enabled: default_true(),
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("pytr")
}

impl Settings {
    /// Create new settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut settings = Self::default();

        if let Ok(host) = std::env::var("PYTR_HOST") {
            settings.server.host = host;
        }

        if let Ok(port) = std::env::var("PYTR_PORT") {
            settings.server.port = port
                .parse()
                .map_err(|e| crate::Error::config("port", format!("Invalid port: {}", e)))?;
        }

        if let Ok(dir) = std::env::var("PYTR_STATIC_DIR") {
            settings.server.static_dir = Some(PathBuf::from(dir));
        }

        settings.auth.password = std::env::var("PYTR_PASSWORD").ok().filter(|p| !p.is_empty());

        settings.extraction.cookies_browser = std::env::var("YOUTUBE_COOKIES_BROWSER")
            .ok()
            .filter(|b| !b.is_empty());
        settings.extraction.cookies_file = std::env::var("YOUTUBE_COOKIES_FILE")
            .ok()
            .filter(|f| !f.is_empty())
            .map(PathBuf::from);

        if let Ok(binary) = std::env::var("PYTR_YTDLP") {
            settings.extraction.binary = binary.clone();
            settings.download.binary = binary;
        }

        settings.download.dir = std::env::var("PYTR_DOWNLOAD_DIR").ok().map(PathBuf::from);
        settings.cache.cache_dir = std::env::var("PYTR_CACHE_DIR").ok().map(PathBuf::from);
        settings.store.snapshot_path = std::env::var("PYTR_STORE").ok().map(PathBuf::from);

        settings.network.https_proxy = std::env::var("HTTPS_PROXY").ok();
        settings.network.http_proxy = std::env::var("HTTP_PROXY").ok();
        settings.network.all_proxy = std::env::var("ALL_PROXY").ok();

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            settings.logging.level = level;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            settings.logging.format = format;
        }

        Ok(settings)
    }

    /// Load settings from configuration file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            crate::Error::config("file", format!("Failed to read config file: {}", e))
        })?;

        let settings: Settings = toml::from_str(&content).map_err(|e| {
            crate::Error::config("file", format!("Failed to parse config file: {}", e))
        })?;

        Ok(settings)
    }

    /// Merge settings with environment variable overrides
    pub fn merge_with_env(mut self) -> crate::Result<Self> {
        let env_settings = Self::from_env()?;
        let defaults = Self::default();

        // Merge only non-default values from environment
        if env_settings.server.host != defaults.server.host {
            self.server.host = env_settings.server.host;
        }
        if env_settings.server.port != defaults.server.port {
            self.server.port = env_settings.server.port;
        }
        if env_settings.logging.level != defaults.logging.level {
            self.logging.level = env_settings.logging.level;
        }
        if env_settings.logging.format != defaults.logging.format {
            self.logging.format = env_settings.logging.format;
        }
        if env_settings.extraction.binary != defaults.extraction.binary {
            self.extraction.binary = env_settings.extraction.binary;
            self.download.binary = env_settings.download.binary;
        }

        // Optional values always override when present
        if env_settings.server.static_dir.is_some() {
            self.server.static_dir = env_settings.server.static_dir;
        }
        if env_settings.auth.password.is_some() {
            self.auth.password = env_settings.auth.password;
        }
        if env_settings.extraction.cookies_browser.is_some() {
            self.extraction.cookies_browser = env_settings.extraction.cookies_browser;
        }
        if env_settings.extraction.cookies_file.is_some() {
            self.extraction.cookies_file = env_settings.extraction.cookies_file;
        }
        if env_settings.download.dir.is_some() {
            self.download.dir = env_settings.download.dir;
        }
        if env_settings.cache.cache_dir.is_some() {
            self.cache.cache_dir = env_settings.cache.cache_dir;
        }
        if env_settings.store.snapshot_path.is_some() {
            self.store.snapshot_path = env_settings.store.snapshot_path;
        }
        if env_settings.network.https_proxy.is_some() {
            self.network.https_proxy = env_settings.network.https_proxy;
        }
        if env_settings.network.http_proxy.is_some() {
            self.network.http_proxy = env_settings.network.http_proxy;
        }
        if env_settings.network.all_proxy.is_some() {
            self.network.all_proxy = env_settings.network.all_proxy;
        }

        Ok(self)
    }

    /// Get effective proxy URL based on priority
    pub fn get_proxy_url(&self) -> Option<String> {
        self.network
            .https_proxy
            .as_ref()
            .or(self.network.http_proxy.as_ref())
            .or(self.network.all_proxy.as_ref())
            .cloned()
    }

    /// Directory holding finished downloads
    pub fn download_dir(&self) -> PathBuf {
        self.download
            .dir
            .clone()
            .unwrap_or_else(|| data_dir().join("downloads"))
    }

    /// Directory holding cached subtitle files
    pub fn subtitle_cache_dir(&self) -> PathBuf {
        self.cache
            .cache_dir
            .clone()
            .unwrap_or_else(|| self.download_dir())
    }

    /// Store snapshot file, when snapshots are enabled
    pub fn snapshot_path(&self) -> Option<PathBuf> {
        if !self.store.snapshot_enabled {
            return None;
        }
        Some(
            self.store
                .snapshot_path
                .clone()
                .unwrap_or_else(|| data_dir().join("store.json")),
        )
    }

    /// Validate configuration settings
    pub fn validate(&self) -> crate::Result<()> {
        if self.server.port == 0 {
            return Err(crate::Error::config(
                "port",
                "Invalid server port: cannot be 0",
            ));
        }

        for (name, value) in [
            ("cache.info_ttl", self.cache.info_ttl),
            ("cache.negative_ttl", self.cache.negative_ttl),
            ("cache.manifest_ttl", self.cache.manifest_ttl),
            ("cache.throttle_cooldown", self.cache.throttle_cooldown),
            ("cache.sweep_interval", self.cache.sweep_interval),
            ("cache.long_sweep_interval", self.cache.long_sweep_interval),
            ("auth.pairing_ttl_secs", self.auth.pairing_ttl_secs),
        ] {
            if value == 0 {
                return Err(crate::Error::config(name, "cannot be 0"));
            }
        }

        if self.auth.max_failures_short == 0
            || self.auth.max_failures_long < self.auth.max_failures_short
        {
            return Err(crate::Error::config(
                "auth.max_failures_long",
                "must be at least max_failures_short, which must be positive",
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(crate::Error::config(
                    "log_level",
                    format!("Invalid log level: {}", self.logging.level),
                ));
            }
        }

        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(crate::Error::config(
                    "log_format",
                    format!("Invalid log format: {}", other),
                ));
            }
        }

        match self.extraction.cookie_mode.as_str() {
            "off" | "auto" | "on" => {}
            other => {
                return Err(crate::Error::config(
                    "extraction.cookie_mode",
                    format!("Invalid cookie mode: {}", other),
                ));
            }
        }

        if self.media.allowed_hosts.iter().all(|h| h.trim().is_empty()) {
            return Err(crate::Error::config(
                "media.allowed_hosts",
                "at least one upstream host suffix is required",
            ));
        }

        if self.media.chunk_size == 0 || self.media.probe_bytes < 8 {
            return Err(crate::Error::config(
                "media",
                "chunk_size must be positive and probe_bytes at least 8",
            ));
        }

        for (name, proxy_url) in [
            ("https_proxy", &self.network.https_proxy),
            ("http_proxy", &self.network.http_proxy),
            ("all_proxy", &self.network.all_proxy),
        ] {
            if let Some(url_str) = proxy_url
                && let Err(e) = url::Url::parse(url_str)
            {
                return Err(crate::Error::config(
                    name,
                    format!("Invalid proxy URL '{}': {}", url_str, e),
                ));
            }
        }

        Ok(())
    }
}
