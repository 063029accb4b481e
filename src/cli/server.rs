//! Server mode CLI logic
//!
//! Loads settings, restores the store snapshot, starts the maintenance
//! task and serves the relay until Ctrl-C.

use crate::{
    Settings,
    config::ConfigLoader,
    extract::YtDlpResolver,
    server::{AppState, create_app},
    store::{MemoryStore, SnapshotFile, Store},
    utils::version,
};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Arguments for server mode
#[derive(Debug)]
pub struct ServerArgs {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub config: Option<String>,
    pub verbose: bool,
}

/// Settings with the CLI overrides applied
///
/// Precedence: command line, then environment, then the config file
/// (`--config`, `PYTR_CONFIG` or the default location), then defaults.
pub fn load_settings(args: &ServerArgs) -> Settings {
    let config_path = match &args.config {
        Some(config) => Some(std::path::PathBuf::from(config)),
        None => ConfigLoader::get_config_path(),
    };

    let mut settings = ConfigLoader::new()
        .load(config_path.as_deref())
        .unwrap_or_else(|e| {
            // Logging is not up yet
            eprintln!(
                "Warning: Failed to load configuration: {}. Using defaults.",
                e
            );
            Settings::default()
        });

    if let Some(host) = &args.host {
        settings.server.host = host.clone();
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }
    settings.logging.verbose = args.verbose;
    settings
}

/// Log filter: `--verbose`, then `RUST_LOG`, then the configured level
pub fn log_filter(verbose: bool, level: &str) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(level)
    }
}

fn init_logging(settings: &Settings) {
    let json = settings.logging.format.eq_ignore_ascii_case("json");
    // A second server in the same process keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(log_filter(settings.logging.verbose, &settings.logging.level))
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .try_init();
}

/// Seed the configured bootstrap password when the store has none yet
pub fn seed_password(store: &dyn Store, settings: &Settings) -> bool {
    match settings.auth.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) if !store.has_app_password() => {
            store.set_app_password(password);
            tracing::info!("App password seeded from configuration");
            true
        }
        _ => false,
    }
}

async fn save_snapshot(store: &MemoryStore, snapshot: Option<&SnapshotFile>) {
    if let Some(snapshot) = snapshot
        && let Err(e) = snapshot.save(&store.data()).await
    {
        tracing::error!("Failed to save store snapshot: {}", e);
    }
}

/// Short sweeps every `sweep_interval`; every `long_sweep_interval` also
/// drop stale lockout records and flush the store snapshot
fn spawn_maintenance(
    state: AppState,
    store: Arc<MemoryStore>,
    snapshot: Option<SnapshotFile>,
) -> JoinHandle<()> {
    let every = Duration::from_secs(state.settings.cache.sweep_interval.max(1));
    let long_every = Duration::from_secs(state.settings.cache.long_sweep_interval.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        // The first tick fires immediately
        interval.tick().await;
        let mut last_long = tokio::time::Instant::now();
        loop {
            interval.tick().await;
            state.sweep();
            if last_long.elapsed() >= long_every {
                last_long = tokio::time::Instant::now();
                state.long_sweep();
                save_snapshot(&store, snapshot.as_ref()).await;
                tracing::debug!(
                    sessions = store.session_count(),
                    downloads = state.downloads.active_count(),
                    remotes = state.hub.connection_count(),
                    pairings = state.pairing.pending_count(),
                    "Maintenance pass"
                );
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

/// Run server mode with the given arguments
pub async fn run_server_mode(args: ServerArgs) -> Result<()> {
    let settings = load_settings(&args);
    init_logging(&settings);

    tracing::info!("Starting {}", version::product_token());

    let snapshot = settings.snapshot_path().map(SnapshotFile::new);
    let store = Arc::new(match &snapshot {
        Some(snapshot) => MemoryStore::from_data(snapshot.load().await),
        None => MemoryStore::new(),
    });
    seed_password(store.as_ref(), &settings);

    let resolver = Arc::new(YtDlpResolver::from_settings(&settings));
    let dyn_store: Arc<dyn Store> = store.clone();
    let state = AppState::new(settings, dyn_store, resolver)?;
    state.downloads.reset_dir().await?;

    let maintenance = spawn_maintenance(state.clone(), store.clone(), snapshot.clone());
    let addr = parse_and_bind_address(&state.settings.server.host, state.settings.server.port)
        .await?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("{} listening on {}", version::product_token(), addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    maintenance.abort();
    save_snapshot(&store, snapshot.as_ref()).await;
    Ok(())
}

/// Parse host string and attempt to bind to the address
///
/// `::` is tried as IPv6 first and falls back to IPv4 `0.0.0.0` on hosts
/// without IPv6.
pub async fn parse_and_bind_address(host: &str, port: u16) -> Result<SocketAddr> {
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    if host != "::"
        && let Ok(ip) = host.parse::<IpAddr>()
    {
        let addr = SocketAddr::new(ip, port);
        tracing::debug!("Parsed address: {}", addr);
        return Ok(addr);
    }

    match host {
        "::" => {
            let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port);
            match tokio::net::TcpListener::bind(addr).await {
                Ok(_) => Ok(addr),
                Err(e) => {
                    tracing::warn!(
                        "Could not listen on [::]:{} ({}), falling back to 0.0.0.0",
                        port,
                        e
                    );
                    Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
                }
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid host address: {}. Use '::' for IPv6 or '0.0.0.0' for IPv4",
                host
            );
        }
    }
}
