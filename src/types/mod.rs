//! Type definitions for the relay
//!
//! Resolver output types plus the request and response bodies of the
//! HTTP surface.

pub mod media;
pub mod request;
pub mod response;

pub use media::{
    CodecFamily, Format, ListingEntry, SubtitleFile, VideoInfo, thumbnail_url, watch_url,
};
pub use response::{Ack, ErrorResponse, HealthResponse, SearchResult, SubtitleTrack};
