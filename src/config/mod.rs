//! Configuration (layered: explicit overrides > env > TOML file > defaults).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LiveTxtError, Result};
use crate::executor::{ExecutorConfig, DEFAULT_SETTLE_DELAY_MS};
use crate::types::DEFAULT_TIMEOUT_MS;

pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Process configuration.
#[derive(Clone, PartialEq)]
pub struct LiveTxtConfig {
    pub gateway_url: Option<String>,
    pub api_key: Option<String>,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub heartbeat_interval: Duration,
    pub settle_delay: Duration,
    pub default_timeout_ms: u64,
    pub log_level: String,
}

impl Default for LiveTxtConfig {
    fn default() -> Self {
        Self {
            gateway_url: None,
            api_key: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            log_level: "info".to_string(),
        }
    }
}

impl fmt::Debug for LiveTxtConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveTxtConfig")
            .field("gateway_url", &self.gateway_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("settle_delay", &self.settle_delay)
            .field("default_timeout_ms", &self.default_timeout_ms)
            .field("log_level", &self.log_level)
            .finish()
    }
}

/// On-disk shape. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    gateway_url: Option<String>,
    api_key: Option<String>,
    reconnect_attempts: Option<u32>,
    reconnect_delay_secs: Option<f64>,
    heartbeat_interval_secs: Option<f64>,
    settle_delay_ms: Option<u64>,
    default_timeout_ms: Option<u64>,
    log_level: Option<String>,
}

impl LiveTxtConfig {
    /// Defaults overlaid with `LIVETXT_*` variables (a `.env` file is read if present).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Defaults overlaid with a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LiveTxtError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: FileConfig =
            toml::from_str(raw).map_err(|e| LiveTxtError::Configuration(e.to_string()))?;
        let mut config = Self::default();
        config.apply_file(file)?;
        Ok(config)
    }

    /// File (when given) then environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) -> Result<()> {
        if file.gateway_url.is_some() {
            self.gateway_url = file.gateway_url;
        }
        if file.api_key.is_some() {
            self.api_key = file.api_key;
        }
        if let Some(attempts) = file.reconnect_attempts {
            self.reconnect_attempts = attempts;
        }
        if let Some(secs) = file.reconnect_delay_secs {
            self.reconnect_delay = seconds("reconnect_delay_secs", secs)?;
        }
        if let Some(secs) = file.heartbeat_interval_secs {
            self.heartbeat_interval = seconds("heartbeat_interval_secs", secs)?;
        }
        if let Some(ms) = file.settle_delay_ms {
            self.settle_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = file.default_timeout_ms {
            self.default_timeout_ms = ms;
        }
        if let Some(level) = file.log_level {
            self.log_level = level;
        }
        Ok(())
    }

    /// Overlay `LIVETXT_*` values read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("LIVETXT_GATEWAY_URL") {
            self.gateway_url = Some(url);
        }
        if let Some(key) = get("LIVETXT_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(raw) = get("LIVETXT_RECONNECT_ATTEMPTS") {
            self.reconnect_attempts = parse("LIVETXT_RECONNECT_ATTEMPTS", &raw)?;
        }
        if let Some(raw) = get("LIVETXT_RECONNECT_DELAY_SECS") {
            self.reconnect_delay = seconds("LIVETXT_RECONNECT_DELAY_SECS", parse("LIVETXT_RECONNECT_DELAY_SECS", &raw)?)?;
        }
        if let Some(raw) = get("LIVETXT_HEARTBEAT_INTERVAL_SECS") {
            self.heartbeat_interval = seconds(
                "LIVETXT_HEARTBEAT_INTERVAL_SECS",
                parse("LIVETXT_HEARTBEAT_INTERVAL_SECS", &raw)?,
            )?;
        }
        if let Some(raw) = get("LIVETXT_SETTLE_DELAY_MS") {
            self.settle_delay = Duration::from_millis(parse("LIVETXT_SETTLE_DELAY_MS", &raw)?);
        }
        if let Some(raw) = get("LIVETXT_TIMEOUT_MS") {
            self.default_timeout_ms = parse("LIVETXT_TIMEOUT_MS", &raw)?;
        }
        if let Some(level) = get("LIVETXT_LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Fail fast when the gateway cannot be reached with this configuration.
    pub fn validate_for_gateway(&self) -> Result<()> {
        let url = self
            .gateway_url
            .as_deref()
            .ok_or_else(|| LiveTxtError::Configuration("gateway url is required (LIVETXT_GATEWAY_URL)".into()))?;
        if !["http://", "https://", "ws://", "wss://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(LiveTxtError::Configuration(format!(
                "gateway url must start with http(s):// or ws(s)://, got {url}"
            )));
        }
        if self.api_key.is_none() {
            return Err(LiveTxtError::Configuration(
                "api key is required (LIVETXT_API_KEY)".into(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(LiveTxtError::Configuration("heartbeat interval must be positive".into()));
        }
        Ok(())
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::builder()
            .settle_delay(self.settle_delay)
            .default_timeout_ms(self.default_timeout_ms)
            .build()
    }
}

fn parse<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| LiveTxtError::Configuration(format!("invalid value for {key}: {raw}")))
}

fn seconds(key: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| LiveTxtError::Configuration(format!("invalid duration for {key}: {secs}")))
}
