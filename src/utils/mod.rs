//! Utility functions and helpers
//!
//! This module contains utility functions used throughout the application.

pub mod format;
pub mod ttl;
pub mod version;

pub use format::{format_bytes, format_duration, format_number, format_upload_date};
pub use ttl::TtlMap;
pub use version::{VERSION, product_token};
