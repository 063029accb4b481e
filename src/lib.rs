//! PYTR - a self-hosted YouTube relay
//!
//! Resolves videos through yt-dlp and serves them to household devices
//! without the YouTube client: DASH manifests are synthesized from the
//! resolved formats, HLS playlists are rewritten to go through the relay,
//! and media bytes are range-proxied from the CDN with a host allow-list.
//! Around that sit a shared-password login with lockout, device pairing
//! codes, household profiles with history and favorites, background
//! downloads and a WebSocket hub that lets one device remote-control
//! another.
//!
//! # Architecture
//!
//! - [`server`]: the Axum application, its extractors, handlers and pages
//! - [`extract`]: the resolver seam and the cookie-aware arbiter in front of it
//! - [`media`]: range proxy, MP4 box prober, DASH and HLS manifests
//! - [`auth`], [`remote`], [`download`]: the stateful services
//! - [`store`]: the fixed operation set over persistent state
//!
//! # Usage
//!
//! ```bash
//! pytr server --port 8000 --host ::
//! pytr probe "https://rr1.googlevideo.com/videoplayback?..."
//! ```
//!
//! ```rust,no_run
//! use pytr_relay::{AppState, Settings, create_app, extract::YtDlpResolver, store::MemoryStore};
//! use std::sync::Arc;
//!
//! # fn example() -> pytr_relay::Result<()> {
//! let settings = Settings::default();
//! let resolver = Arc::new(YtDlpResolver::from_settings(&settings));
//! let state = AppState::new(settings, Arc::new(MemoryStore::new()), resolver)?;
//! let _app = create_app(state);
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod media;
pub mod remote;
pub mod server;
pub mod store;
pub mod types;
pub mod utils;

pub use config::{ConfigLoader, Settings};
pub use error::{Error, Result};
pub use server::{AppState, create_app};
