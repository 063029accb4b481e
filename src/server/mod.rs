//! HTTP server implementation
//!
//! The JSON API under `/api`, the HTML pages around it and the auth
//! extractors both share, built on Axum.

pub mod app;
pub mod extract;
pub mod handlers;
pub mod pages;

pub use app::{AppState, create_app};
