//! Configuration loading utilities
//!
//! Provides helper functions for loading configuration from various sources
//! with proper error handling and validation.

use crate::{Result, config::Settings};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Configuration loader with multiple source support
#[derive(Debug)]
pub struct ConfigLoader {
    /// Default settings
    defaults: Settings,
}

impl ConfigLoader {
    /// Create new configuration loader
    pub fn new() -> Self {
        Self {
            defaults: Settings::default(),
        }
    }

    /// Get the config file path from PYTR_CONFIG or the default location
    ///
    /// Priority:
    /// 1. PYTR_CONFIG environment variable
    /// 2. ~/.config/pytr/config.toml (or platform equivalent)
    pub fn get_config_path() -> Option<PathBuf> {
        if let Ok(config_path) = std::env::var("PYTR_CONFIG") {
            let path = PathBuf::from(config_path);
            if path.exists() {
                debug!("Using config file from PYTR_CONFIG: {:?}", path);
                return Some(path);
            } else {
                warn!("PYTR_CONFIG points to non-existent file: {:?}", path);
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let default_path = config_dir.join("pytr").join("config.toml");
            if default_path.exists() {
                debug!("Using default config file: {:?}", default_path);
                return Some(default_path);
            }
        }

        debug!("No config file found");
        None
    }

    /// Load configuration with precedence order:
    /// 1. Command line arguments (applied by the caller)
    /// 2. Environment variables
    /// 3. Configuration file
    /// 4. Default values
    pub fn load(&self, config_file: Option<&Path>) -> Result<Settings> {
        let mut settings = self.defaults.clone();

        if let Some(path) = config_file {
            if path.exists() {
                info!("Loading configuration from file: {:?}", path);
                settings = Settings::from_file(path)?;
            } else {
                warn!("Configuration file not found: {:?}, using defaults", path);
            }
        }

        debug!("Applying environment variable overrides");
        settings = settings.merge_with_env()?;

        settings.validate()?;

        info!("Configuration loaded successfully");
        // Settings carry the bootstrap password; log only the shape
        debug!(
            port = settings.server.port,
            cookie_mode = %settings.extraction.cookie_mode,
            allowed_hosts = ?settings.media.allowed_hosts,
            "Final configuration"
        );

        Ok(settings)
    }

}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    use crate::config::ENV_TEST_MUTEX;

    #[test]
    fn test_load_defaults() {
        let _lock = ENV_TEST_MUTEX.lock().unwrap();

        let settings = ConfigLoader::new().load(None).unwrap();
        assert_eq!(settings.extraction.cookie_mode, "auto");
        assert_eq!(settings.auth.max_failures_long, 10);
    }

    #[test]
    fn test_load_from_file() {
        let _lock = ENV_TEST_MUTEX.lock().unwrap();

        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "localhost"
port = 8080

[extraction]
cookie_mode = "off"
        "#
        )
        .unwrap();

        let loader = ConfigLoader::new();
        let settings = loader.load(Some(temp_file.path())).unwrap();

        assert_eq!(settings.server.host, "localhost");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.extraction.cookie_mode, "off");
    }

    #[test]
    fn test_invalid_file_rejected_by_validation() {
        let _lock = ENV_TEST_MUTEX.lock().unwrap();

        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "[extraction]\ncookie_mode = \"sometimes\"").unwrap();

        let loader = ConfigLoader::new();
        assert!(loader.load(Some(temp_file.path())).is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let _lock = ENV_TEST_MUTEX.lock().unwrap();

        let loader = ConfigLoader::new();
        let settings = loader
            .load(Some(Path::new("/nonexistent/pytr/config.toml")))
            .unwrap();
        assert_eq!(settings.cache.info_ttl, 18000);
    }

    #[test]
    fn test_env_var_override() {
        let _lock = ENV_TEST_MUTEX.lock().unwrap();

        let original_port = std::env::var("PYTR_PORT").ok();

        unsafe {
            std::env::set_var("PYTR_PORT", "9000");
        }

        let loader = ConfigLoader::new();
        let settings = loader.load(None).unwrap();
        assert_eq!(settings.server.port, 9000);

        unsafe {
            std::env::remove_var("PYTR_PORT");
            if let Some(port) = original_port {
                std::env::set_var("PYTR_PORT", port);
            }
        }
    }
}
