mod file_config;

pub use file_config::{FileConfig, ReconnectConfig};

use anyhow::{bail, Result};
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub api_url: Option<String>,
    pub broker_url: Option<String>,
    pub identity: Option<String>,
    pub request_timeout_sec: u64,
    pub connect_timeout_sec: u64,
    pub heartbeat_interval_sec: u64,
    pub event_channel_capacity: usize,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            broker_url: None,
            identity: None,
            request_timeout_sec: 30,
            connect_timeout_sec: 10,
            heartbeat_interval_sec: 30,
            event_channel_capacity: 16,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub api_url: String,
    pub broker_url: String,
    pub identity: Option<String>,
    pub request_timeout_sec: u64,
    pub connect_timeout_sec: u64,
    /// 0 disables heartbeats.
    pub heartbeat_interval_sec: u64,
    pub event_channel_capacity: usize,

    pub reconnect: ReconnectSettings,
}

/// Resolved reconnect settings, see [`crate::retry_policy::RetryPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectSettings {
    pub max_retries: Option<u32>,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let api_url = file
            .api_url
            .or_else(|| cli.api_url.clone())
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .ok_or_else(|| {
                anyhow::anyhow!("api_url must be specified via --api-url or in config file")
            })?;
        if api_url.is_empty() {
            bail!("api_url must not be empty");
        }
        if !api_url.starts_with("http://") && !api_url.starts_with("https://") {
            bail!("api_url must be an http(s) URL: {}", api_url);
        }

        let broker_url = match file.broker_url.or_else(|| cli.broker_url.clone()) {
            Some(url) if url.trim().is_empty() => bail!("broker_url must not be empty"),
            Some(url) => url.trim().to_string(),
            None => default_broker_url(&api_url),
        };

        let identity = file.identity.or_else(|| cli.identity.clone());

        let request_timeout_sec = file.request_timeout_sec.unwrap_or(cli.request_timeout_sec);
        let connect_timeout_sec = file.connect_timeout_sec.unwrap_or(cli.connect_timeout_sec);
        let heartbeat_interval_sec = file
            .heartbeat_interval_sec
            .unwrap_or(cli.heartbeat_interval_sec);
        let event_channel_capacity = file
            .event_channel_capacity
            .unwrap_or(cli.event_channel_capacity);
        if event_channel_capacity == 0 {
            bail!("event_channel_capacity must be at least 1");
        }
        if request_timeout_sec == 0 {
            bail!("request_timeout_sec must be at least 1");
        }
        if connect_timeout_sec == 0 {
            bail!("connect_timeout_sec must be at least 1");
        }

        // Reconnect settings - merge file config with defaults
        let defaults = ReconnectSettings::default();
        let rc_file = file.reconnect.unwrap_or_default();
        let reconnect = ReconnectSettings {
            max_retries: rc_file.max_retries.or(defaults.max_retries),
            initial_backoff_ms: rc_file
                .initial_backoff_ms
                .unwrap_or(defaults.initial_backoff_ms),
            max_backoff_ms: rc_file.max_backoff_ms.unwrap_or(defaults.max_backoff_ms),
            backoff_multiplier: rc_file
                .backoff_multiplier
                .unwrap_or(defaults.backoff_multiplier),
        };
        if reconnect.backoff_multiplier < 1.0 {
            bail!(
                "reconnect.backoff_multiplier must be >= 1.0, got {}",
                reconnect.backoff_multiplier
            );
        }
        if reconnect.initial_backoff_ms > reconnect.max_backoff_ms {
            bail!(
                "reconnect.initial_backoff_ms ({}) exceeds reconnect.max_backoff_ms ({})",
                reconnect.initial_backoff_ms,
                reconnect.max_backoff_ms
            );
        }

        Ok(Self {
            api_url,
            broker_url,
            identity,
            request_timeout_sec,
            connect_timeout_sec,
            heartbeat_interval_sec,
            event_channel_capacity,
            reconnect,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_sec)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_sec > 0).then(|| Duration::from_secs(self.heartbeat_interval_sec))
    }
}

/// `http://host/api` -> `ws://host/api/v1/ws`
fn default_broker_url(api_url: &str) -> String {
    let ws_base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        api_url.to_string()
    };
    format!("{}/v1/ws", ws_base)
}
