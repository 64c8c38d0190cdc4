use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

pub mod defaults;
pub mod duration_serde;

use crate::catalog;
use crate::errors::{AppError, AppResult};
use defaults::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub web: WebConfig,
}

/// Connection settings supplied by the setup wizard
#[derive(Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Hostname or IP, optionally with scheme and port
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Stable key for this configured connection, defaults to `host`.
    /// Channel identities derive from it, so set it explicitly if the
    /// device may change address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<String>,
    #[serde(default = "default_request_timeout", with = "duration_serde::duration")]
    pub request_timeout: Duration,
}

/// Options store surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Meter pipeline interval, minimum 1
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// System pipeline interval
    #[serde(default = "default_system_interval", with = "duration_serde::duration")]
    pub system_interval: Duration,
    #[serde(default = "default_enabled_metrics")]
    pub enabled_metrics: BTreeSet<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

/// Live options pushed to running coordinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOptions {
    pub poll_interval: Duration,
    pub enabled_metrics: BTreeSet<String>,
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS)
}

fn default_poll_interval_seconds() -> u64 {
    DEFAULT_POLL_INTERVAL_SECONDS
}

fn default_system_interval() -> Duration {
    Duration::from_secs(DEFAULT_SYSTEM_INTERVAL_SECS)
}

pub fn default_enabled_metrics() -> BTreeSet<String> {
    DEFAULT_ENABLED_METRICS.iter().map(|k| k.to_string()).collect()
}

fn default_web_enabled() -> bool {
    DEFAULT_WEB_ENABLED
}

fn default_web_host() -> String {
    DEFAULT_WEB_HOST.to_string()
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            username: default_username(),
            password: String::new(),
            connection_id: None,
            request_timeout: default_request_timeout(),
        }
    }
}

impl std::fmt::Debug for DeviceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connection_id", &self.connection_id)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl DeviceConfig {
    /// Key identifying this configured connection for its whole lifetime
    pub fn connection_key(&self) -> String {
        match self.connection_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => self.host.trim().to_string(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            poll_interval_seconds: default_poll_interval_seconds(),
            system_interval: default_system_interval(),
            enabled_metrics: default_enabled_metrics(),
        }
    }
}

impl PollingConfig {
    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            enabled_metrics: self.enabled_metrics.clone(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the TOML file (if present), then
    /// `ENERGYME_` prefixed environment variables (`__` separates sections).
    pub fn load(config_file: &Path) -> AppResult<Self> {
        if !config_file.exists() {
            info!(
                "Config file {} not found, using defaults and environment",
                config_file.display()
            );
        }

        let mut config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| AppError::configuration(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Write a default config template, refusing to overwrite an existing file
    pub fn write_default(config_file: &Path) -> AppResult<()> {
        if config_file.exists() {
            return Err(AppError::configuration(format!(
                "Refusing to overwrite existing config file {}",
                config_file.display()
            )));
        }
        let mut template = Config::default();
        template.device.host = "192.168.1.100".to_string();
        let contents = toml::to_string_pretty(&template)
            .map_err(|e| AppError::internal(format!("Failed to render default config: {e}")))?;
        std::fs::write(config_file, contents)?;
        info!("Created default config file: {}", config_file.display());
        Ok(())
    }

    /// Validate and normalize values the type system cannot enforce
    pub fn validate(&mut self) -> AppResult<()> {
        self.device.host = self.device.host.trim().to_string();
        if self.device.host.is_empty() {
            return Err(AppError::configuration("device.host must be set"));
        }

        if self.polling.poll_interval_seconds < MIN_POLL_INTERVAL_SECONDS {
            return Err(AppError::configuration(format!(
                "polling.poll_interval_seconds must be at least {MIN_POLL_INTERVAL_SECONDS}, got {}",
                self.polling.poll_interval_seconds
            )));
        }

        if self.polling.system_interval < Duration::from_secs(1) {
            return Err(AppError::configuration(
                "polling.system_interval must be at least 1s",
            ));
        }

        if self.device.request_timeout.is_zero() {
            return Err(AppError::configuration(
                "device.request_timeout must be greater than zero",
            ));
        }

        let (known, unknown): (BTreeSet<String>, BTreeSet<String>) = self
            .polling
            .enabled_metrics
            .iter()
            .cloned()
            .partition(|key| catalog::descriptor(key).is_some());
        for key in &unknown {
            warn!("Ignoring unknown metric key '{}' in polling.enabled_metrics", key);
        }
        self.polling.enabled_metrics = known;

        Ok(())
    }
}
