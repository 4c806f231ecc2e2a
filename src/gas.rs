//! Gas-sensor feed and its correlation with chamber views
//!
//! The gas platform names sensors by alias (`CO2_Camara_5`,
//! `Etileno_Camara_05`). Chamber numbers are pulled out of the alias and
//! matched against the trailing token of each chamber name, with and
//! without zero-padding.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chamber::{chamber_numbers_match, derive_key, pad_chamber_number};
use crate::config::GasApiConfig;
use crate::dashboard::{ChamberView, NOT_AVAILABLE};

const CO2_CHAMBER_MARKER: &str = "CO2_Camara_";
const ETHYLENE_CHAMBER_MARKER: &str = "Etileno_Camara_";
const CO2_PREFIX: &str = "CO2_";
const ETHYLENE_PREFIX: &str = "Etileno_";

/// One device from the gas platform's real-time list
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasSensorItem {
    #[serde(default)]
    pub imei_alias: Option<String>,
    #[serde(default)]
    pub sensor_transmission_data: Option<SensorTransmissionData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorTransmissionData {
    #[serde(default)]
    pub sensor_transmission_data_details_list: Option<Vec<SensorDetail>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorDetail {
    #[serde(default)]
    pub sensor_val: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GasSensorResponse {
    #[serde(default)]
    data: Option<Vec<GasSensorItem>>,
}

impl GasSensorItem {
    /// Value of the first transmission detail, when present and non-empty
    pub fn first_value(&self) -> Option<&str> {
        self.sensor_transmission_data
            .as_ref()?
            .sensor_transmission_data_details_list
            .as_ref()?
            .first()?
            .sensor_val
            .as_deref()
            .filter(|v| !v.is_empty())
    }
}

/// Reading extracted from a single gas device
#[derive(Debug, Clone, PartialEq)]
pub struct GasReading {
    pub chamber_number: String,
    pub co2: Option<String>,
    pub ethylene: Option<String>,
}

/// Source of gas-sensor items
#[async_trait]
pub trait GasFeed: Send + Sync {
    async fn fetch(&self) -> Result<Vec<GasSensorItem>>;
}

/// reqwest-backed client for the gas platform's real-time endpoint
pub struct GasApiClient {
    client: Client,
    url: String,
    app_key: String,
    app_secret: String,
}

impl GasApiClient {
    /// Create a new gas platform client
    ///
    /// The request timeout comes from `config.timeout_secs` and is separate
    /// from the Sitrad client's timeout.
    pub fn new(config: &GasApiConfig) -> Result<Self> {
        info!(url = %config.url, timeout_secs = config.timeout_secs, "Creating gas API client");

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build gas API HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            app_key: config.app_key.clone(),
            app_secret: config.app_secret.clone(),
        })
    }
}

#[async_trait]
impl GasFeed for GasApiClient {
    async fn fetch(&self) -> Result<Vec<GasSensorItem>> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("appKey", &self.app_key), ("appSecret", &self.app_secret)])
            .send()
            .await
            .context("Failed to reach gas API")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Gas API returned status {}", status);
        }

        let body: GasSensorResponse = response
            .json()
            .await
            .context("Failed to decode gas API response")?;

        Ok(body.data.unwrap_or_default())
    }
}

/// Chamber number encoded in a gas alias, if any
pub fn chamber_number_from_alias(alias: &str) -> Option<&str> {
    [CO2_CHAMBER_MARKER, ETHYLENE_CHAMBER_MARKER]
        .iter()
        .find_map(|marker| alias.find(marker).map(|pos| &alias[pos + marker.len()..]))
}

/// Turn a gas item into a reading, dropping items without a chamber or value
pub fn parse_item(item: &GasSensorItem) -> Option<GasReading> {
    let alias = item.imei_alias.as_deref()?;
    let number = chamber_number_from_alias(alias)?;
    let value = item.first_value()?;

    let co2 = alias.starts_with(CO2_PREFIX).then(|| value.to_string());
    let ethylene = alias.starts_with(ETHYLENE_PREFIX).then(|| value.to_string());
    if co2.is_none() && ethylene.is_none() {
        return None;
    }

    Some(GasReading {
        chamber_number: number.to_string(),
        co2,
        ethylene,
    })
}

/// CO2 and ethylene values indexed by chamber number
#[derive(Debug, Default)]
pub struct GasReadings {
    co2: HashMap<String, String>,
    ethylene: HashMap<String, String>,
    chambers: Vec<String>,
}

impl GasReadings {
    pub fn from_items(items: &[GasSensorItem]) -> Self {
        let mut readings = Self::default();
        for reading in items.iter().filter_map(parse_item) {
            readings.insert(reading);
        }
        readings
    }

    pub fn insert(&mut self, reading: GasReading) {
        if !self.chambers.contains(&reading.chamber_number) {
            self.chambers.push(reading.chamber_number.clone());
        }
        if let Some(co2) = reading.co2 {
            self.co2.insert(reading.chamber_number.clone(), co2);
        }
        if let Some(ethylene) = reading.ethylene {
            self.ethylene.insert(reading.chamber_number, ethylene);
        }
    }

    /// Chamber numbers in the order the feed first reported them
    pub fn chambers(&self) -> &[String] {
        &self.chambers
    }

    pub fn co2_for(&self, number: &str) -> Option<&str> {
        lookup(&self.co2, number)
    }

    pub fn ethylene_for(&self, number: &str) -> Option<&str> {
        lookup(&self.ethylene, number)
    }
}

/// Raw number first, then its padded form, then any padded-equivalent key
fn lookup<'a>(map: &'a HashMap<String, String>, number: &str) -> Option<&'a str> {
    map.get(number)
        .or_else(|| map.get(&pad_chamber_number(number)))
        .or_else(|| {
            map.iter()
                .find(|(key, _)| chamber_numbers_match(key, number))
                .map(|(_, value)| value)
        })
        .map(String::as_str)
}

pub fn format_co2(value: Option<&str>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{} %VOL", v))
}

pub fn format_ethylene(value: Option<&str>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{} ppm", v))
}

/// Merge gas readings into the chamber list
///
/// Instrument-backed views get their CO2 and ethylene fields refreshed.
/// Chamber numbers without a matching view get one gas-only view appended,
/// carrying its gas values from the start. Gas-only views are matched by
/// the number they were created for, so running the merge again with the
/// same readings changes nothing.
pub fn merge_gas(views: &mut Vec<ChamberView>, readings: &GasReadings) {
    for view in views.iter_mut().filter(|view| !view.gas_only) {
        let number = derive_key(&view.camera_name);
        view.co2 = format_co2(readings.co2_for(&number));
        view.ethylene = format_ethylene(readings.ethylene_for(&number));
    }

    for number in readings.chambers() {
        let matched = views.iter().any(|view| match &view.gas_chamber {
            Some(gas_chamber) => chamber_numbers_match(gas_chamber, number),
            None => chamber_numbers_match(&derive_key(&view.camera_name), number),
        });
        if matched {
            continue;
        }

        debug!(chamber = %number, "Adding gas-only chamber");
        let mut view = ChamberView::gas_only(number);
        view.co2 = format_co2(readings.co2_for(number));
        view.ethylene = format_ethylene(readings.ethylene_for(number));
        views.push(view);
    }
}

/// Fetch the gas feed and merge it, skipping the merge on any failure
pub async fn fetch_and_merge<G: GasFeed + ?Sized>(feed: &G, views: &mut Vec<ChamberView>) {
    match feed.fetch().await {
        Ok(items) => {
            let readings = GasReadings::from_items(&items);
            info!(
                devices = items.len(),
                chambers = readings.chambers().len(),
                "Gas feed read"
            );
            merge_gas(views, &readings);
        }
        Err(e) => {
            warn!(error = %e, "Gas feed unavailable, skipping gas merge");
        }
    }
}
