//! Telemetry reader: extracts the signals the dashboard shows for a chamber
//!
//! Every read is best effort. A failed or malformed upstream response leaves
//! the affected readings unset; it never fails the chamber.

use tracing::{debug, warn};

use crate::registry::ChamberGroup;
use crate::sitrad::{Instrument, InstrumentApi, InstrumentFunction, ValueGroup};

const TEMPERATURE_CODE: &str = "Temperature";
const HUMIDITY_CODE: &str = "Humidity";
const SET1_CODE: &str = "SET1";
const SET3_CODE: &str = "SET3";
const PULP_CODE: &str = "Sensor1";
const PULP_NAME: &str = "pulpa";
const EVAPORATOR_CODE: &str = "Sensor2";
const EVAPORATOR_NAME: &str = "evaporador";

/// Numeric readings for one chamber; `None` means not available
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChamberReadings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub set1: Option<f64>,
    pub set3: Option<f64>,
    pub pulp_temp: Option<f64>,
    pub evaporator_temp: Option<f64>,
}

/// Read every signal available for a chamber group
pub async fn read_chamber<A: InstrumentApi + ?Sized>(
    api: &A,
    group: &ChamberGroup,
) -> ChamberReadings {
    let mut readings = ChamberReadings::default();

    if let Some(base) = &group.base {
        if let Some(groups) = fetch_values(api, base).await {
            readings.temperature =
                find_by_code(&groups, TEMPERATURE_CODE).and_then(ValueGroup::first_value);
            readings.humidity =
                find_by_code(&groups, HUMIDITY_CODE).and_then(ValueGroup::first_value);
        }

        match api.functions(base.id).await {
            Ok(functions) => {
                let (set1, set3) = extract_setpoints(&functions);
                readings.set1 = set1;
                readings.set3 = set3;
            }
            Err(e) => {
                warn!(instrument_id = base.id, error = %e, "Setpoint read failed");
            }
        }
    }

    if let Some(pulp) = &group.pulp {
        if let Some(groups) = fetch_values(api, pulp).await {
            readings.pulp_temp = find_by_code_or_name(&groups, PULP_CODE, PULP_NAME)
                .and_then(ValueGroup::first_value);
            readings.evaporator_temp =
                find_by_code_or_name(&groups, EVAPORATOR_CODE, EVAPORATOR_NAME)
                    .and_then(ValueGroup::first_value);
        }
    }

    debug!(key = %group.key, readings = ?readings, "Chamber telemetry read");
    readings
}

async fn fetch_values<A: InstrumentApi + ?Sized>(
    api: &A,
    instrument: &Instrument,
) -> Option<Vec<ValueGroup>> {
    match api.values(instrument.id).await {
        Ok(groups) => Some(groups),
        Err(e) => {
            warn!(
                instrument_id = instrument.id,
                name = %instrument.name,
                error = %e,
                "Value read failed"
            );
            None
        }
    }
}

/// First group whose code equals `code`, ignoring case
pub fn find_by_code<'a>(groups: &'a [ValueGroup], code: &str) -> Option<&'a ValueGroup> {
    groups.iter().find(|g| g.code.eq_ignore_ascii_case(code))
}

/// First group, in API order, whose code equals `code` or whose display
/// name contains `name_fragment`, both ignoring case
pub fn find_by_code_or_name<'a>(
    groups: &'a [ValueGroup],
    code: &str,
    name_fragment: &str,
) -> Option<&'a ValueGroup> {
    groups.iter().find(|g| {
        g.code.eq_ignore_ascii_case(code) || g.name.to_lowercase().contains(name_fragment)
    })
}

/// SET1 and SET3 values from a function list
pub fn extract_setpoints(functions: &[InstrumentFunction]) -> (Option<f64>, Option<f64>) {
    let mut set1 = None;
    let mut set3 = None;
    for function in functions {
        if function.code.eq_ignore_ascii_case(SET1_CODE) {
            set1 = function.value;
        }
        if function.code.eq_ignore_ascii_case(SET3_CODE) {
            set3 = function.value;
        }
    }
    (set1, set3)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeInstrumentApi;
    use serde_json::json;

    fn group(key: &str, base: Option<(i64, &str)>, pulp: Option<(i64, &str)>) -> ChamberGroup {
        let to_instrument = |(id, name): (i64, &str)| Instrument {
            id,
            name: name.to_string(),
            status: None,
        };
        ChamberGroup {
            key: key.to_string(),
            base: base.map(to_instrument),
            pulp: pulp.map(to_instrument),
        }
    }

    #[tokio::test]
    async fn test_reads_base_and_pulp() {
        let api = FakeInstrumentApi::new()
            .with_values(
                1,
                vec![
                    ("temperature", "Temp", json!(-0.5)),
                    ("HUMIDITY", "Hum", json!("91.3")),
                ],
            )
            .with_functions(1, vec![("set1", 0.5), ("SET3", 2.0), ("DIF", 1.0)])
            .with_values(
                2,
                vec![
                    ("Sensor2", "Evaporador", json!(-4.2)),
                    ("Sensor1", "Pulpa", json!(1.1)),
                ],
            );

        let readings = read_chamber(
            &api,
            &group("5", Some((1, "Camara 5 - Zac")), Some((2, "Temperatura Pulpa Cam 5"))),
        )
        .await;

        assert_eq!(
            readings,
            ChamberReadings {
                temperature: Some(-0.5),
                humidity: Some(91.3),
                set1: Some(0.5),
                set3: Some(2.0),
                pulp_temp: Some(1.1),
                evaporator_temp: Some(-4.2),
            }
        );
    }

    #[tokio::test]
    async fn test_failed_values_keep_setpoints() {
        let api = FakeInstrumentApi::new().with_functions(1, vec![("SET1", 3.0)]);

        let readings = read_chamber(&api, &group("5", Some((1, "Camara 5")), None)).await;

        assert_eq!(readings.temperature, None);
        assert_eq!(readings.humidity, None);
        assert_eq!(readings.set1, Some(3.0));
        assert_eq!(readings.set3, None);
    }

    #[tokio::test]
    async fn test_unparseable_value_is_absent() {
        let api = FakeInstrumentApi::new().with_values(
            1,
            vec![
                ("Temperature", "Temp", json!("---")),
                ("Humidity", "Hum", json!(null)),
            ],
        );

        let readings = read_chamber(&api, &group("5", Some((1, "Camara 5")), None)).await;

        assert_eq!(readings, ChamberReadings::default());
    }

    #[test]
    fn test_pulp_match_falls_back_to_name() {
        let groups: Vec<ValueGroup> = serde_json::from_value(json!([
            {"code": "S1", "name": "Temp. Pulpa Cam 3", "values": [{"value": 2.0}]},
            {"code": "S2", "name": "Temp. EVAPORADOR", "values": [{"value": -6.0}]}
        ]))
        .unwrap();

        let pulp =
            find_by_code_or_name(&groups, PULP_CODE, PULP_NAME).and_then(ValueGroup::first_value);
        let evap = find_by_code_or_name(&groups, EVAPORATOR_CODE, EVAPORATOR_NAME)
            .and_then(ValueGroup::first_value);

        assert_eq!(pulp, Some(2.0));
        assert_eq!(evap, Some(-6.0));
    }

    #[test]
    fn test_first_match_in_api_order_wins() {
        let groups: Vec<ValueGroup> = serde_json::from_value(json!([
            {"code": "Aux", "name": "Pulpa auxiliar", "values": [{"value": 7.0}]},
            {"code": "Sensor1", "name": "Sonda", "values": [{"value": 3.0}]}
        ]))
        .unwrap();

        let pulp =
            find_by_code_or_name(&groups, PULP_CODE, PULP_NAME).and_then(ValueGroup::first_value);
        assert_eq!(pulp, Some(7.0));
    }
}
