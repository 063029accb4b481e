//! Error handling for the relay
//!
//! This module defines the crate error type, its formatting helpers and
//! its mapping onto HTTP responses.

pub mod formatting;
pub mod response;
pub mod types;

pub use formatting::{client_detail, format_error, format_error_for_api, format_error_for_logging};
pub use types::{Error, Result};
