//! Tests for configuration loading.

use std::io::Write;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use pretty_assertions::assert_eq;

use livetxt::config::LiveTxtConfig;
use livetxt::error::LiveTxtError;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 8] = [
    "LIVETXT_GATEWAY_URL",
    "LIVETXT_API_KEY",
    "LIVETXT_RECONNECT_ATTEMPTS",
    "LIVETXT_RECONNECT_DELAY_SECS",
    "LIVETXT_HEARTBEAT_INTERVAL_SECS",
    "LIVETXT_SETTLE_DELAY_MS",
    "LIVETXT_TIMEOUT_MS",
    "LIVETXT_LOG_LEVEL",
];

/// Restores the captured variables on drop.
struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        for key in keys {
            std::env::remove_var(key);
        }
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn file_values_are_loaded() {
    let _lock = env_lock();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    let file = write_config(
        r#"
gateway_url = "https://gw.example.com"
api_key = "from-file"
reconnect_attempts = 3
heartbeat_interval_secs = 15
settle_delay_ms = 50
"#,
    );

    let config = LiveTxtConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.gateway_url.as_deref(), Some("https://gw.example.com"));
    assert_eq!(config.api_key.as_deref(), Some("from-file"));
    assert_eq!(config.reconnect_attempts, 3);
    assert_eq!(config.heartbeat_interval, Duration::from_secs(15));
    assert_eq!(config.executor_config().settle_delay, Duration::from_millis(50));
    assert!(config.validate_for_gateway().is_ok());
}

#[test]
fn environment_overrides_the_file() {
    let _lock = env_lock();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    let file = write_config("api_key = \"from-file\"\nlog_level = \"warn\"\n");
    std::env::set_var("LIVETXT_API_KEY", "from-env");
    std::env::set_var("LIVETXT_TIMEOUT_MS", "1200");

    let config = LiveTxtConfig::load(Some(file.path())).unwrap();
    assert_eq!(config.api_key.as_deref(), Some("from-env"));
    assert_eq!(config.default_timeout_ms, 1200);
    assert_eq!(config.log_level, "warn");
}

#[test]
fn unreadable_or_invalid_files_fail_fast() {
    let _lock = env_lock();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);

    let missing = LiveTxtConfig::load(Some(std::path::Path::new("/no/such/livetxt.toml"))).unwrap_err();
    assert!(matches!(missing, LiveTxtError::Configuration(_)));

    let file = write_config("reconnect_attempts = \"lots\"\n");
    let invalid = LiveTxtConfig::load(Some(file.path())).unwrap_err();
    assert!(invalid.is_fatal_at_startup());
}

#[test]
fn invalid_environment_values_fail_fast() {
    let _lock = env_lock();
    let _env = EnvGuard::capture(&CONFIG_ENV_VARS);
    std::env::set_var("LIVETXT_HEARTBEAT_INTERVAL_SECS", "-1");
    let err = LiveTxtConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("LIVETXT_HEARTBEAT_INTERVAL_SECS"));
}
