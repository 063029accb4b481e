//! Background downloads of finished MP4 files
//!
//! One yt-dlp process per video id; pollers attach to the running job.
//!
//! ```rust
//! use pytr_relay::download::{DownloadConfig, DownloadState, DownloadTracker};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let tracker = DownloadTracker::new(DownloadConfig {
//!     dir: std::env::temp_dir().join("pytr-doc-downloads"),
//!     binary: "yt-dlp".to_string(),
//!     proxy: None,
//!     cancel_grace: Duration::from_secs(5),
//!     retention: Duration::from_secs(60),
//!     start_delay: Duration::from_millis(0),
//! });
//! assert_eq!(tracker.progress("dQw4w9WgXcQ").status, DownloadState::NotFound);
//! assert_eq!(tracker.cancel("dQw4w9WgXcQ").await.status, DownloadState::Cancelled);
//! # });
//! ```

pub mod progress;
pub mod tracker;

pub use progress::{Phase, ProgressParser, ProgressUpdate};
pub use tracker::{DownloadConfig, DownloadState, DownloadStatus, DownloadTracker, stream_url};
