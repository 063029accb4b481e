//! Configuration management for the relay
//!
//! This module handles loading and validating settings for the server
//! and the probe command.

pub mod loader;
pub mod settings;

pub use loader::ConfigLoader;
pub use settings::Settings;

/// Serializes tests that mutate process environment variables
#[cfg(test)]
pub(crate) static ENV_TEST_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());
