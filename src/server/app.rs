//! Axum application setup
//!
//! Builds the shared [`AppState`] from settings, a store and a resolver,
//! and wires every route and middleware onto one router.

use super::{handlers, pages};
use crate::{
    Result,
    auth::{IpBuffer, LockoutPolicy, LoginGuard, PairingRegistry},
    config::Settings,
    download::{DownloadConfig, DownloadTracker},
    extract::{
        ArbiterTtls, CookieMode, ExtractionArbiter, Resolver, SponsorBlockService, SubtitleService,
    },
    media::{
        BoxProber, DashSynthesizer, HlsRewriter, HostAllowList, RangeProxy, build_api_client,
        build_http_client,
    },
    remote::RemoteHub,
    store::{Session, Store},
};
use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::debug;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Application settings
    pub settings: Arc<Settings>,
    /// Sessions, profiles and per-profile data
    pub store: Arc<dyn Store>,
    /// Cached, cookie-aware metadata resolution
    pub arbiter: Arc<ExtractionArbiter>,
    pub dash: Arc<DashSynthesizer>,
    pub hls: Arc<HlsRewriter>,
    pub proxy: Arc<RangeProxy>,
    /// Upstream hosts the proxies may reach
    pub allow: Arc<HostAllowList>,
    pub subtitles: Arc<SubtitleService>,
    pub sponsorblock: Arc<SponsorBlockService>,
    pub downloads: Arc<DownloadTracker>,
    pub hub: Arc<RemoteHub>,
    pub pairing: Arc<PairingRegistry>,
    pub login_guard: Arc<LoginGuard>,
    pub ip_buffer: Arc<IpBuffer>,
    /// Server start time for uptime calculation
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Wire every service from settings
    pub fn new(settings: Settings, store: Arc<dyn Store>, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let client = build_http_client(&settings)?;
        let cache = &settings.cache;

        let arbiter = ExtractionArbiter::new(
            resolver.clone(),
            ArbiterTtls {
                positive: Duration::from_secs(cache.info_ttl),
                negative: Duration::from_secs(cache.negative_ttl),
                cooldown: Duration::from_secs(cache.throttle_cooldown),
            },
        );
        let prober = BoxProber::new(
            client.clone(),
            settings.media.probe_bytes,
            Duration::from_secs(settings.media.probe_timeout_secs),
        );
        let dash = DashSynthesizer::new(prober, Duration::from_secs(cache.manifest_ttl));
        let subtitles = SubtitleService::new(
            resolver,
            client.clone(),
            settings.subtitle_cache_dir(),
            Duration::from_secs(cache.info_ttl),
            Duration::from_secs(cache.subtitle_negative_ttl),
        );
        let sponsorblock = SponsorBlockService::new(
            build_api_client(&settings)?,
            settings.extraction.sponsorblock_api.clone(),
            Duration::from_secs(cache.sponsorblock_ttl),
        );

        Ok(Self {
            store: store.clone(),
            arbiter: Arc::new(arbiter),
            dash: Arc::new(dash),
            hls: Arc::new(HlsRewriter::new(client.clone())),
            proxy: Arc::new(RangeProxy::new(client, settings.media.chunk_size)),
            allow: Arc::new(HostAllowList::new(&settings.media.allowed_hosts)),
            subtitles: Arc::new(subtitles),
            sponsorblock: Arc::new(sponsorblock),
            downloads: Arc::new(DownloadTracker::new(DownloadConfig::from_settings(&settings))),
            hub: Arc::new(RemoteHub::new(store)),
            pairing: Arc::new(PairingRegistry::from_settings(&settings.auth)),
            login_guard: Arc::new(LoginGuard::new(LockoutPolicy::from(&settings.auth))),
            ip_buffer: Arc::new(IpBuffer::new()),
            settings: Arc::new(settings),
            start_time: std::time::Instant::now(),
        })
    }

    /// Cookie mode for a request: the profile's preference, else the configured default
    pub fn cookie_mode_for(&self, session: Option<&Session>) -> CookieMode {
        session
            .and_then(|s| s.profile_id)
            .and_then(|id| self.store.get_profile(id))
            .and_then(|p| p.preferences.cookie_mode.parse().ok())
            .or_else(|| self.settings.extraction.cookie_mode.parse().ok())
            .unwrap_or_default()
    }

    /// Directory holding `index.html`, `embed.html` and assets
    pub fn static_dir(&self) -> PathBuf {
        self.settings
            .server
            .static_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("static"))
    }

    /// Expire short-lived caches and flush buffered session IPs
    pub fn sweep(&self) -> usize {
        let removed = self.arbiter.sweep()
            + self.dash.sweep()
            + self.subtitles.sweep()
            + self.sponsorblock.sweep()
            + self.pairing.sweep(self.store.as_ref());
        let flushed = self.ip_buffer.flush(self.store.as_ref());
        debug!("Maintenance sweep: {} expired, {} IPs flushed", removed, flushed);
        removed
    }

    /// Drop stale failure records
    pub fn long_sweep(&self) -> usize {
        self.login_guard.sweep()
    }
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        // Media
        .route("/dash/{video_id}", get(handlers::media::dash_manifest))
        .route("/hls/{video_id}", get(handlers::media::hls_playlist))
        .route("/hls-segment", get(handlers::media::hls_segment))
        .route(
            "/videoplayback",
            get(handlers::media::videoplayback).options(handlers::media::videoplayback_options),
        )
        .route("/stream-live/{video_id}", get(handlers::media::stream_live))
        .route("/formats/{video_id}", get(handlers::media::formats))
        // Browse
        .route("/search", get(handlers::browse::search))
        .route("/info/{video_id}", get(handlers::browse::info))
        .route("/subtitle/{video_id}", get(handlers::browse::subtitle))
        .route("/channel/{channel_id}", get(handlers::browse::channel))
        .route("/sponsorblock/{video_id}", get(handlers::browse::sponsorblock))
        // Downloads
        .route("/play/{video_id}", get(handlers::downloads::play))
        .route("/progress/{video_id}", get(handlers::downloads::progress))
        .route("/cancel/{video_id}", post(handlers::downloads::cancel))
        .route("/stream/{video_id}", get(handlers::downloads::stream))
        // Pairing
        .route("/pair/request", post(handlers::auth::pair_request))
        .route("/pair/status/{code}", get(handlers::auth::pair_status))
        .route("/pair/approve", post(handlers::auth::pair_approve))
        .route("/pair/deny", post(handlers::auth::pair_deny))
        // Remote control
        .route("/ws", get(handlers::remote::websocket))
        .route("/remote/devices", get(handlers::remote::devices))
        .route("/remote/rename", post(handlers::remote::rename))
        .nest("/profiles", profile_routes())
}

fn profile_routes() -> Router<AppState> {
    use handlers::profiles as p;
    Router::new()
        .route("/", get(p::list).post(p::create))
        .route("/boot", get(p::boot))
        .route("/profile/{profile_id}", delete(p::remove))
        .route("/select/{profile_id}", post(p::select))
        .route("/edit", put(p::edit))
        .route("/preferences", put(p::preferences))
        .route("/preferences/sponsorblock", put(p::sponsorblock))
        .route("/history", get(p::history).delete(p::clear_history))
        .route("/history/{video_id}", delete(p::delete_history_entry))
        .route("/position", post(p::save_position))
        .route("/position/{video_id}", get(p::get_position))
        .route("/favorites", get(p::favorites).delete(p::clear_favorites))
        .route(
            "/favorites/{video_id}",
            post(p::add_favorite).delete(p::remove_favorite),
        )
        .route("/favorites/{video_id}/status", get(p::favorite_status))
        .route("/channels", get(p::channels).delete(p::clear_channels))
        .route(
            "/channels/{channel_id}",
            post(p::follow_channel).delete(p::unfollow_channel),
        )
        .route("/channels/{channel_id}/status", get(p::channel_status))
        .route("/settings", get(p::settings))
        .route("/settings/password", put(p::update_password))
        .route("/settings/allow-embed", put(p::update_allow_embed))
        .route("/settings/webos-token", post(p::add_tv_token))
        .route("/settings/registered-tv/{index}", delete(p::delete_tv))
}

fn page_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(pages::spa))
        .route("/watch", get(pages::spa))
        .route("/results", get(pages::spa))
        .route("/history", get(pages::spa))
        .route("/favorites", get(pages::spa))
        .route("/channel/{channel_id}", get(pages::spa))
        .route("/channel/{channel_id}/playlists", get(pages::spa))
        .route("/{handle}", get(pages::handle_page))
        .route("/{handle}/playlists", get(pages::handle_page))
        .route("/embed/{video_id}", get(pages::embed))
        .route("/v/{video_id}", get(pages::embed))
        .route("/shorts/{video_id}", get(pages::embed))
        .route("/live/{video_id}", get(pages::embed))
        .route("/login", get(handlers::auth::login_page).post(handlers::auth::login))
        .route("/logout", get(handlers::auth::logout))
        .route("/link", get(handlers::auth::link_page))
        .route("/auth/status", get(handlers::auth::auth_status))
}

/// Create the main Axum application with routes and middleware
pub fn create_app(state: AppState) -> Router {
    let static_files = ServeDir::new(state.static_dir());
    let cors = state.settings.server.enable_cors;

    let router = Router::new()
        .nest("/api", api_routes())
        .merge(page_routes())
        .nest_service("/static", static_files)
        .fallback(pages::not_found)
        .method_not_allowed_fallback(pages::method_not_allowed)
        .layer(middleware::from_fn(pages::html_errors));

    let router = if cors {
        router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
    } else {
        router.layer(TraceLayer::new_for_http())
    };

    router.with_state(state)
}
