//! Configuration management for the cold chamber gateway
//!
//! Loads configuration from config.toml with environment variable overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Complete gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub instrument_api: InstrumentApiConfig,
    pub gas_api: GasApiConfig,
    #[serde(default)]
    pub setpoints: SetpointConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
    /// Snapshot publishing and setpoint commands are disabled when this section is absent
    #[serde(default)]
    pub mqtt: Option<MqttConfig>,
}

/// Sitrad instrument API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_instrument_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

/// Gas-sensor platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GasApiConfig {
    pub url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default = "default_gas_timeout")]
    pub timeout_secs: u64,
}

/// Setpoint write-back configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetpointConfig {
    /// When false, requests are validated and echoed without touching Sitrad
    #[serde(default)]
    pub live_writes: bool,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Authorize setpoint commands arriving on the MQTT command topic
    #[serde(default)]
    pub allow_remote: bool,
}

impl Default for SetpointConfig {
    fn default() -> Self {
        Self {
            live_writes: false,
            tolerance: default_tolerance(),
            allow_remote: false,
        }
    }
}

/// Retry queue timing. All values are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    #[serde(default = "default_transport_retry")]
    pub transport_retry_secs: u64,
    #[serde(default = "default_unconverged_retry")]
    pub unconverged_retry_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,
    #[serde(default = "default_backoff_cap")]
    pub backoff_cap_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_stale_after")]
    pub stale_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            initial_delay_secs: default_initial_delay(),
            transport_retry_secs: default_transport_retry(),
            unconverged_retry_secs: default_unconverged_retry(),
            backoff_base_secs: default_backoff_base(),
            backoff_cap_secs: default_backoff_cap(),
            max_attempts: default_max_attempts(),
            stale_after_secs: default_stale_after(),
        }
    }
}

impl RetryConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Dashboard refresh configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    /// Upper bound on chambers read in parallel; 1 reads them one at a time
    #[serde(default = "default_max_concurrent_reads")]
    pub max_concurrent_reads: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval(),
            max_concurrent_reads: default_max_concurrent_reads(),
        }
    }
}

/// MQTT broker configuration for snapshot publishing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub broker_url: String,
    pub client_id: String,
    pub topic_prefix: String,
}

fn default_instrument_timeout() -> u64 {
    30
}

fn default_gas_timeout() -> u64 {
    10
}

fn default_tolerance() -> f64 {
    0.1
}

fn default_poll_interval() -> u64 {
    5
}

fn default_initial_delay() -> u64 {
    10
}

fn default_transport_retry() -> u64 {
    30
}

fn default_unconverged_retry() -> u64 {
    15
}

fn default_backoff_base() -> u64 {
    10
}

fn default_backoff_cap() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    10
}

fn default_stale_after() -> u64 {
    300
}

fn default_refresh_interval() -> u64 {
    30
}

fn default_max_concurrent_reads() -> usize {
    4
}

impl Config {
    /// Load configuration from file
    ///
    /// Environment variables override config file values:
    /// - SITRAD_API_URL, SITRAD_API_USERNAME, SITRAD_API_PASSWORD
    /// - GAS_API_APP_KEY, GAS_API_APP_SECRET
    pub fn load(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config = Self::from_toml_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path))?;

        config.apply_env_overrides(|name| std::env::var(name).ok());

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration without touching the environment
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Config = toml::from_str(s)?;
        Ok(config)
    }

    fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("SITRAD_API_URL") {
            tracing::info!("Using SITRAD_API_URL from environment");
            self.instrument_api.base_url = url;
        }
        if let Some(username) = lookup("SITRAD_API_USERNAME") {
            tracing::info!("Using SITRAD_API_USERNAME from environment");
            self.instrument_api.username = username;
        }
        if let Some(password) = lookup("SITRAD_API_PASSWORD") {
            tracing::info!("Using SITRAD_API_PASSWORD from environment");
            self.instrument_api.password = password;
        }
        if let Some(key) = lookup("GAS_API_APP_KEY") {
            tracing::info!("Using GAS_API_APP_KEY from environment");
            self.gas_api.app_key = key;
        }
        if let Some(secret) = lookup("GAS_API_APP_SECRET") {
            tracing::info!("Using GAS_API_APP_SECRET from environment");
            self.gas_api.app_secret = secret;
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !is_http_url(&self.instrument_api.base_url) {
            anyhow::bail!(
                "Invalid Sitrad API URL: {} (must start with http:// or https://)",
                self.instrument_api.base_url
            );
        }

        if !is_http_url(&self.gas_api.url) {
            anyhow::bail!(
                "Invalid gas API URL: {} (must start with http:// or https://)",
                self.gas_api.url
            );
        }

        if let Some(mqtt) = &self.mqtt {
            if !mqtt.broker_url.starts_with("mqtt://") && !mqtt.broker_url.starts_with("mqtts://") {
                anyhow::bail!(
                    "Invalid MQTT broker URL: {} (must start with mqtt:// or mqtts://)",
                    mqtt.broker_url
                );
            }
        }

        if !self.setpoints.tolerance.is_finite() || self.setpoints.tolerance < 0.0 {
            anyhow::bail!("Setpoint tolerance must be a finite, non-negative number");
        }

        if self.retry.max_attempts == 0 {
            anyhow::bail!("Retry max_attempts must be greater than 0");
        }

        if self.retry.poll_interval_secs == 0 {
            anyhow::bail!("Retry poll_interval_secs must be greater than 0");
        }

        if self.dashboard.max_concurrent_reads == 0 {
            anyhow::bail!("Dashboard max_concurrent_reads must be greater than 0");
        }

        Ok(())
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}
