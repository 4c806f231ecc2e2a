//! Sitrad instrument API client
//!
//! This module provides:
//! - Strict serde records for each Sitrad endpoint the gateway consumes
//! - The `InstrumentApi` trait used by the dashboard and setpoint write path
//! - `SitradClient`, the reqwest implementation with HTTP Basic auth

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::InstrumentApiConfig;

/// Instrument as listed by the registry endpoint
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instrument {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// One signal group from `/instruments/{id}/values`
#[derive(Debug, Clone, Deserialize)]
pub struct ValueGroup {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub values: Vec<ReportedValue>,
}

impl ValueGroup {
    /// First reported value as a number, if it parses
    pub fn first_value(&self) -> Option<f64> {
        self.values.first().and_then(ReportedValue::as_f64)
    }
}

/// A single reported reading; `value` is untyped upstream
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportedValue {
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub is_in_error: bool,
}

impl ReportedValue {
    pub fn as_f64(&self) -> Option<f64> {
        parse_numeric(&self.value)
    }
}

/// One control function from `/instruments/{id}/functions`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstrumentFunction {
    #[serde(default, deserialize_with = "null_as_default")]
    pub code: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min_value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ResultsEnvelope<T> {
    #[serde(default, deserialize_with = "null_as_default")]
    results: Vec<T>,
}

/// Body of a function write
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionWrite<'a> {
    instrument_id: String,
    code: &'a str,
    value: f64,
    show_spc: bool,
    sandbox: bool,
}

/// How Sitrad answered a function write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    /// `202 Accepted`: queued on the instrument, not yet confirmed applied
    Accepted,
    /// Any other HTTP status, including `200 OK`
    Other(u16),
}

impl WriteStatus {
    pub fn from_status(status: StatusCode) -> Self {
        if status == StatusCode::ACCEPTED {
            WriteStatus::Accepted
        } else {
            WriteStatus::Other(status.as_u16())
        }
    }
}

/// Operations the gateway needs from the instrument API
///
/// Reads return `Err` on transport failure, non-success status, or an
/// undecodable body. Writes return `Err` only on transport failure.
#[async_trait]
pub trait InstrumentApi: Send + Sync {
    async fn active_instruments(&self) -> Result<Vec<Instrument>>;

    async fn values(&self, instrument_id: i64) -> Result<Vec<ValueGroup>>;

    async fn functions(&self, instrument_id: i64) -> Result<Vec<InstrumentFunction>>;

    async fn write_function(
        &self,
        instrument_id: i64,
        code: &str,
        value: f64,
    ) -> Result<WriteStatus>;
}

/// reqwest-backed Sitrad client
#[derive(Clone)]
pub struct SitradClient {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl SitradClient {
    /// Create a new Sitrad client
    ///
    /// # Arguments
    /// * `config` - Base URL, Basic credentials, request timeout and TLS policy
    pub fn new(config: &InstrumentApiConfig) -> Result<Self> {
        info!(
            url = %config.base_url,
            timeout_secs = config.timeout_secs,
            "Creating Sitrad client"
        );

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()
            .context("Failed to build Sitrad HTTP client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Test connectivity by listing active instruments
    pub async fn health_check(&self) -> Result<()> {
        info!("Testing Sitrad connection...");

        let instruments = self
            .active_instruments()
            .await
            .context("Sitrad health check failed")?;

        info!(instruments = instruments.len(), "Sitrad health check passed");
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_results<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>> {
        let url = self.url(path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .with_context(|| format!("Failed to reach Sitrad: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Sitrad returned status {} for {}", status, url);
        }

        let envelope: ResultsEnvelope<T> = response
            .json()
            .await
            .with_context(|| format!("Failed to decode Sitrad response: {}", url))?;

        debug!(url = %url, results = envelope.results.len(), "Sitrad read");
        Ok(envelope.results)
    }
}

#[async_trait]
impl InstrumentApi for SitradClient {
    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        self.get_results("/instruments?instrumentStatus=active").await
    }

    async fn values(&self, instrument_id: i64) -> Result<Vec<ValueGroup>> {
        self.get_results(&format!("/instruments/{}/values", instrument_id))
            .await
    }

    async fn functions(&self, instrument_id: i64) -> Result<Vec<InstrumentFunction>> {
        self.get_results(&format!("/instruments/{}/functions", instrument_id))
            .await
    }

    async fn write_function(
        &self,
        instrument_id: i64,
        code: &str,
        value: f64,
    ) -> Result<WriteStatus> {
        let url = self.url(&format!("/instruments/{}/functions", instrument_id));
        let body = write_body(instrument_id, code, value);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to post function write to {}", url))?;

        let status = WriteStatus::from_status(response.status());
        debug!(instrument_id, code, value, status = ?status, "Sitrad function write");
        Ok(status)
    }
}

fn write_body(instrument_id: i64, code: &str, value: f64) -> FunctionWrite<'_> {
    FunctionWrite {
        instrument_id: instrument_id.to_string(),
        code,
        value,
        show_spc: true,
        sandbox: false,
    }
}

/// Interpret an untyped JSON value as a finite number
///
/// Accepts JSON numbers and numeric strings; everything else is absent.
pub fn parse_numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(parse_numeric(&value))
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
