//! Dashboard view builder
//!
//! Orchestrates one refresh: registry grouping, per-chamber telemetry reads,
//! then the gas merge. The result is presentation-ready: every value is a
//! display string with its unit, or `N/A`.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::gas::{self, GasFeed};
use crate::registry::{self, ChamberGroup};
use crate::sitrad::InstrumentApi;
use crate::telemetry::{self, ChamberReadings};

/// Sentinel rendered for any value that could not be read
pub const NOT_AVAILABLE: &str = "N/A";

/// One row of the dashboard
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChamberView {
    /// Base instrument id, else pulp instrument id, else 0
    pub instrument_id: i64,
    pub camera_name: String,
    pub temperature: String,
    pub humidity: String,
    pub pulp_temp: String,
    pub evaporator_temp: String,
    pub set1: String,
    pub set3: String,
    pub co2: String,
    pub ethylene: String,
    /// Synthesized from gas data with no matching instrument
    pub gas_only: bool,
    /// Chamber number exactly as the gas feed reported it, for gas-only rows
    #[serde(skip)]
    pub gas_chamber: Option<String>,
}

impl ChamberView {
    /// Build the view for an instrument-backed chamber
    pub fn from_readings(group: &ChamberGroup, readings: &ChamberReadings) -> Self {
        let instrument_id = group
            .base
            .as_ref()
            .or(group.pulp.as_ref())
            .map_or(0, |i| i.id);
        let camera_name = group
            .base
            .as_ref()
            .or(group.pulp.as_ref())
            .map_or_else(|| group.key.clone(), |i| i.name.clone());

        Self {
            instrument_id,
            camera_name,
            temperature: format_celsius(readings.temperature),
            humidity: format_percent(readings.humidity),
            pulp_temp: format_celsius(readings.pulp_temp),
            evaporator_temp: format_celsius(readings.evaporator_temp),
            set1: format_celsius(readings.set1),
            set3: format_celsius(readings.set3),
            co2: NOT_AVAILABLE.to_string(),
            ethylene: NOT_AVAILABLE.to_string(),
            gas_only: false,
            gas_chamber: None,
        }
    }

    /// Placeholder row for a chamber known only to the gas platform
    pub fn gas_only(chamber_number: &str) -> Self {
        Self {
            instrument_id: 0,
            camera_name: format!("Camara {} - Gas", chamber_number),
            temperature: NOT_AVAILABLE.to_string(),
            humidity: NOT_AVAILABLE.to_string(),
            pulp_temp: NOT_AVAILABLE.to_string(),
            evaporator_temp: NOT_AVAILABLE.to_string(),
            set1: NOT_AVAILABLE.to_string(),
            set3: NOT_AVAILABLE.to_string(),
            co2: NOT_AVAILABLE.to_string(),
            ethylene: NOT_AVAILABLE.to_string(),
            gas_only: true,
            gas_chamber: Some(chamber_number.to_string()),
        }
    }

    /// Chamber token used to join with other feeds
    pub fn chamber_key(&self) -> String {
        match &self.gas_chamber {
            Some(number) => number.clone(),
            None => crate::chamber::derive_key(&self.camera_name),
        }
    }
}

pub fn format_celsius(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:.1}°C", v))
}

pub fn format_percent(value: Option<f64>) -> String {
    value.map_or_else(|| NOT_AVAILABLE.to_string(), |v| format!("{:.1}%", v))
}

/// Builds the ordered chamber list from both upstream feeds
pub struct DashboardBuilder<A: ?Sized, G: ?Sized> {
    instruments: Arc<A>,
    gas: Arc<G>,
    max_concurrent_reads: usize,
}

impl<A, G> DashboardBuilder<A, G>
where
    A: InstrumentApi + ?Sized,
    G: GasFeed + ?Sized,
{
    pub fn new(instruments: Arc<A>, gas: Arc<G>) -> Self {
        Self {
            instruments,
            gas,
            max_concurrent_reads: 1,
        }
    }

    /// Read up to `limit` chambers at a time; output order is unaffected
    pub fn with_max_concurrent_reads(mut self, limit: usize) -> Self {
        self.max_concurrent_reads = limit.max(1);
        self
    }

    /// Build the dashboard
    ///
    /// Never fails: upstream problems show up as `N/A` values, a skipped gas
    /// merge, or an empty list when the registry itself is unavailable. A
    /// registry with no active instruments still gets gas-only chambers.
    pub async fn build(&self) -> Vec<ChamberView> {
        let Some(groups) = registry::fetch_chamber_groups(self.instruments.as_ref()).await else {
            return Vec::new();
        };

        let api = self.instruments.as_ref();
        let reads: Vec<_> = groups
            .iter()
            .map(|group| async move {
                let readings = telemetry::read_chamber(api, group).await;
                ChamberView::from_readings(group, &readings)
            })
            .collect();
        let mut views: Vec<ChamberView> = stream::iter(reads)
            .buffered(self.max_concurrent_reads)
            .collect()
            .await;

        gas::fetch_and_merge(self.gas.as_ref(), &mut views).await;

        info!(chambers = views.len(), "Dashboard built");
        views
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeGasFeed, FakeInstrumentApi};
    use serde_json::json;

    fn builder(
        api: FakeInstrumentApi,
        gas: FakeGasFeed,
    ) -> DashboardBuilder<FakeInstrumentApi, FakeGasFeed> {
        DashboardBuilder::new(Arc::new(api), Arc::new(gas)).with_max_concurrent_reads(3)
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format_celsius(Some(-0.44)), "-0.4°C");
        assert_eq!(format_celsius(Some(2.0)), "2.0°C");
        assert_eq!(format_percent(Some(87.31)), "87.3%");
        assert_eq!(format_celsius(None), NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn test_full_dashboard() {
        let api = FakeInstrumentApi::new()
            .with_instruments(vec![
                (10, "Camara 5 - Zac"),
                (11, "Temperatura Pulpa Cam 5"),
                (20, "Camara 6 - Sur"),
            ])
            .with_values(
                10,
                vec![("Temperature", "Temp", json!(1.5)), ("Humidity", "Hum", json!(90))],
            )
            .with_functions(10, vec![("SET1", 0.0), ("SET3", 4.0)])
            .with_values(11, vec![("Sensor1", "Pulpa", json!(2.3))])
            .with_values(20, vec![("Temperature", "Temp", json!(-18))])
            .with_functions(20, vec![]);
        let gas = FakeGasFeed::new(vec![("CO2_Camara_05", "4.1"), ("Etileno_Camara_8", "15")]);

        let views = builder(api, gas).build().await;

        assert_eq!(views.len(), 3);
        assert_eq!(views[0].instrument_id, 10);
        assert_eq!(views[0].camera_name, "Camara 5 - Zac");
        assert_eq!(views[0].temperature, "1.5°C");
        assert_eq!(views[0].humidity, "90.0%");
        assert_eq!(views[0].pulp_temp, "2.3°C");
        assert_eq!(views[0].evaporator_temp, NOT_AVAILABLE);
        assert_eq!(views[0].set1, "0.0°C");
        assert_eq!(views[0].set3, "4.0°C");
        assert_eq!(views[0].co2, "4.1 %VOL");

        assert_eq!(views[1].camera_name, "Camara 6 - Sur");
        assert_eq!(views[1].temperature, "-18.0°C");
        assert_eq!(views[1].set1, NOT_AVAILABLE);

        assert!(views[2].gas_only);
        assert_eq!(views[2].camera_name, "Camara 8 - Gas");
        assert_eq!(views[2].ethylene, "15 ppm");
    }

    #[tokio::test]
    async fn test_partial_data_still_listed() {
        // No scripted values or functions: every read fails
        let api = FakeInstrumentApi::new().with_instruments(vec![(10, "Camara 5 - Zac")]);

        let views = builder(api, FakeGasFeed::unavailable()).build().await;

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].camera_name, "Camara 5 - Zac");
        assert_eq!(views[0].temperature, NOT_AVAILABLE);
        assert_eq!(views[0].humidity, NOT_AVAILABLE);
        assert_eq!(views[0].co2, NOT_AVAILABLE);
    }

    #[tokio::test]
    async fn test_pulp_only_chamber_uses_pulp_identity() {
        let api = FakeInstrumentApi::new()
            .with_instruments(vec![(30, "Temperatura Pulpa Cam 3")])
            .with_values(30, vec![("Sensor2", "Evaporador", json!(-3.0))]);

        let views = builder(api, FakeGasFeed::new(vec![])).build().await;

        assert_eq!(views[0].instrument_id, 30);
        assert_eq!(views[0].camera_name, "Temperatura Pulpa Cam 3");
        assert_eq!(views[0].evaporator_temp, "-3.0°C");
        assert_eq!(views[0].chamber_key(), "3");
    }

    #[tokio::test]
    async fn test_unclassified_chamber_named_by_key() {
        let api = FakeInstrumentApi::new().with_instruments(vec![(40, "Compresor 4")]);

        let views = builder(api, FakeGasFeed::unavailable()).build().await;

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].instrument_id, 0);
        assert_eq!(views[0].camera_name, "4");
    }

    #[tokio::test]
    async fn test_registry_down_renders_empty() {
        let gas = FakeGasFeed::new(vec![("CO2_Camara_1", "3.0")]);
        let views = builder(FakeInstrumentApi::new(), gas).build().await;
        assert!(views.is_empty());
    }

    #[tokio::test]
    async fn test_empty_registry_still_lists_gas_chambers() {
        let api = FakeInstrumentApi::new().with_instruments(vec![]);
        let gas = FakeGasFeed::new(vec![("CO2_Camara_1", "3.0")]);

        let views = builder(api, gas).build().await;

        assert_eq!(views.len(), 1);
        assert!(views[0].gas_only);
        assert_eq!(views[0].camera_name, "Camara 1 - Gas");
        assert_eq!(views[0].co2, "3.0 %VOL");
    }

    #[tokio::test]
    async fn test_order_preserved_with_concurrency() {
        let names: Vec<String> = (1..=8).map(|n| format!("Camara {}", n)).collect();
        let instruments = names
            .iter()
            .enumerate()
            .map(|(i, n)| (i as i64 + 1, n.as_str()))
            .collect();
        let api = FakeInstrumentApi::new().with_instruments(instruments);

        let views = builder(api, FakeGasFeed::unavailable()).build().await;

        let got: Vec<&str> = views.iter().map(|v| v.camera_name.as_str()).collect();
        let want: Vec<&str> = names.iter().map(String::as_str).collect();
        assert_eq!(got, want);
    }
}
