//! Configuration loading integration tests
//!
//! Covers PYTR_CONFIG discovery and the file < environment precedence.

use pytr_relay::config::ConfigLoader;
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;

// Environment variables are process-global
static ENV_TEST_MUTEX: Mutex<()> = Mutex::new(());

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "{}", contents).unwrap();
    file.flush().unwrap();
    file
}

/// Set `vars` for the duration of `f`, restoring previous values afterwards
fn with_env<T>(vars: &[(&str, Option<&str>)], f: impl FnOnce() -> T) -> T {
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(k, _)| (k.to_string(), std::env::var(k).ok()))
        .collect();
    unsafe {
        for (key, value) in vars {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
    let result = f();
    unsafe {
        for (key, value) in saved {
            match value {
                Some(value) => std::env::set_var(&key, value),
                None => std::env::remove_var(&key),
            }
        }
    }
    result
}

#[test]
fn test_pytr_config_env_var_loading() {
    let _lock = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let file = config_file(
        r#"
[server]
host = "127.0.0.1"
port = 9999

[cache]
info_ttl = 60

[media]
allowed_hosts = ["googlevideo.com", "cdn.example"]
"#,
    );
    let path = file.path().to_str().unwrap();

    let settings = with_env(
        &[("PYTR_CONFIG", Some(path)), ("PYTR_HOST", None), ("PYTR_PORT", None)],
        || {
            let config_path = ConfigLoader::get_config_path();
            assert_eq!(config_path.as_deref(), Some(file.path()));
            ConfigLoader::new().load(config_path.as_deref()).unwrap()
        },
    );

    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 9999);
    assert_eq!(settings.cache.info_ttl, 60);
    assert_eq!(settings.media.allowed_hosts, vec!["googlevideo.com", "cdn.example"]);
    // Untouched tables keep their defaults
    assert_eq!(settings.auth.max_failures_short, 5);
    assert_eq!(settings.server.cookie_name, "pytr_session");
}

#[test]
fn test_env_var_overrides_config_file() {
    let _lock = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let file = config_file(
        r#"
[server]
host = "127.0.0.1"
port = 9999

[auth]
password = "from-file"
"#,
    );

    let settings = with_env(
        &[
            ("PYTR_HOST", Some("0.0.0.0")),
            ("PYTR_PORT", Some("8888")),
            ("PYTR_PASSWORD", Some("from-env")),
            ("PYTR_DOWNLOAD_DIR", Some("/srv/pytr/downloads")),
        ],
        || ConfigLoader::new().load(Some(file.path())).unwrap(),
    );

    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 8888);
    assert_eq!(settings.auth.password.as_deref(), Some("from-env"));
    assert_eq!(
        settings.download_dir(),
        std::path::PathBuf::from("/srv/pytr/downloads")
    );
}

#[test]
fn test_missing_pytr_config_falls_back() {
    let _lock = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());

    let path = with_env(
        &[("PYTR_CONFIG", Some("/definitely/not/here/config.toml"))],
        ConfigLoader::get_config_path,
    );

    // Either nothing or the per-user default location
    if let Some(path) = path {
        assert!(path.ends_with("pytr/config.toml"));
    }
}

#[test]
fn test_invalid_values_are_rejected() {
    let _lock = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let file = config_file(
        r#"
[extraction]
cookie_mode = "sometimes"
"#,
    );
    assert!(ConfigLoader::new().load(Some(file.path())).is_err());

    let result = with_env(&[("PYTR_PORT", Some("not-a-port"))], || {
        ConfigLoader::new().load(None)
    });
    assert!(result.is_err());
}

#[test]
fn test_partial_file_keeps_defaults() {
    let _lock = ENV_TEST_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let file = config_file("[logging]\nformat = \"json\"\n");

    let settings = with_env(&[("PYTR_PORT", None), ("LOG_FORMAT", None)], || {
        ConfigLoader::new().load(Some(file.path())).unwrap()
    });
    assert_eq!(settings.logging.format, "json");
    assert_eq!(settings.server.port, 8000);
    assert_eq!(settings.extraction.cookie_mode, "auto");
    assert!(settings.store.snapshot_enabled);
}
