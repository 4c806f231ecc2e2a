//! In-memory upstream fakes shared by unit tests

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::gas::{GasFeed, GasSensorItem};
use crate::retry::Clock;
use crate::sitrad::{Instrument, InstrumentApi, InstrumentFunction, ValueGroup, WriteStatus};

/// Scripted reply to a function write
#[derive(Debug, Clone, Copy)]
pub enum WriteReply {
    Status(WriteStatus),
    TransportError,
}

/// Fake Sitrad API
///
/// Reads for instruments without scripted data fail like a non-success
/// status. Accepted writes are applied to the stored functions when
/// `apply_accepted_writes` is set.
pub struct FakeInstrumentApi {
    instruments: Mutex<Option<Vec<Instrument>>>,
    values: Mutex<HashMap<i64, Vec<ValueGroup>>>,
    functions: Mutex<HashMap<i64, Vec<InstrumentFunction>>>,
    write_replies: Mutex<VecDeque<WriteReply>>,
    default_reply: Mutex<WriteReply>,
    apply_accepted_writes: Mutex<bool>,
    writes: Mutex<Vec<(i64, String, f64)>>,
}

impl FakeInstrumentApi {
    pub fn new() -> Self {
        Self {
            instruments: Mutex::new(None),
            values: Mutex::new(HashMap::new()),
            functions: Mutex::new(HashMap::new()),
            write_replies: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(WriteReply::Status(WriteStatus::Other(500))),
            apply_accepted_writes: Mutex::new(false),
            writes: Mutex::new(Vec::new()),
        }
    }

    pub fn with_instruments(self, instruments: Vec<(i64, &str)>) -> Self {
        *self.instruments.lock() = Some(
            instruments
                .into_iter()
                .map(|(id, name)| Instrument {
                    id,
                    name: name.to_string(),
                    status: Some("active".to_string()),
                })
                .collect(),
        );
        self
    }

    pub fn with_values(
        self,
        instrument_id: i64,
        groups: Vec<(&str, &str, serde_json::Value)>,
    ) -> Self {
        let groups = groups
            .into_iter()
            .map(|(code, name, value)| {
                serde_json::from_value(serde_json::json!({
                    "code": code,
                    "name": name,
                    "values": [{"value": value}]
                }))
                .expect("valid value group")
            })
            .collect();
        self.values.lock().insert(instrument_id, groups);
        self
    }

    pub fn with_functions(self, instrument_id: i64, functions: Vec<(&str, f64)>) -> Self {
        self.set_functions(instrument_id, functions);
        self
    }

    pub fn set_functions(&self, instrument_id: i64, functions: Vec<(&str, f64)>) {
        let functions = functions
            .into_iter()
            .map(|(code, value)| InstrumentFunction {
                code: code.to_string(),
                value: Some(value),
                min_value: None,
                max_value: None,
            })
            .collect();
        self.functions.lock().insert(instrument_id, functions);
    }

    pub fn applying_accepted_writes(self) -> Self {
        *self.apply_accepted_writes.lock() = true;
        self
    }

    pub fn with_default_reply(self, reply: WriteReply) -> Self {
        *self.default_reply.lock() = reply;
        self
    }

    pub fn push_reply(&self, reply: WriteReply) {
        self.write_replies.lock().push_back(reply);
    }

    pub fn writes(&self) -> Vec<(i64, String, f64)> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl InstrumentApi for FakeInstrumentApi {
    async fn active_instruments(&self) -> Result<Vec<Instrument>> {
        match self.instruments.lock().clone() {
            Some(instruments) => Ok(instruments),
            None => anyhow::bail!("registry returned status 503"),
        }
    }

    async fn values(&self, instrument_id: i64) -> Result<Vec<ValueGroup>> {
        match self.values.lock().get(&instrument_id) {
            Some(groups) => Ok(groups.clone()),
            None => anyhow::bail!("values returned status 500"),
        }
    }

    async fn functions(&self, instrument_id: i64) -> Result<Vec<InstrumentFunction>> {
        match self.functions.lock().get(&instrument_id) {
            Some(functions) => Ok(functions.clone()),
            None => anyhow::bail!("functions returned status 500"),
        }
    }

    async fn write_function(
        &self,
        instrument_id: i64,
        code: &str,
        value: f64,
    ) -> Result<WriteStatus> {
        self.writes.lock().push((instrument_id, code.to_string(), value));

        let reply = self
            .write_replies
            .lock()
            .pop_front()
            .unwrap_or(*self.default_reply.lock());

        match reply {
            WriteReply::TransportError => anyhow::bail!("connection reset"),
            WriteReply::Status(WriteStatus::Accepted) => {
                if *self.apply_accepted_writes.lock() {
                    let mut functions = self.functions.lock();
                    let entry = functions.entry(instrument_id).or_default();
                    match entry.iter_mut().find(|f| f.code.eq_ignore_ascii_case(code)) {
                        Some(function) => function.value = Some(value),
                        None => entry.push(InstrumentFunction {
                            code: code.to_string(),
                            value: Some(value),
                            min_value: None,
                            max_value: None,
                        }),
                    }
                }
                Ok(WriteStatus::Accepted)
            }
            WriteReply::Status(status) => Ok(status),
        }
    }
}

/// Fake gas platform returning a fixed item list, or failing
pub struct FakeGasFeed {
    items: Option<Vec<GasSensorItem>>,
}

impl FakeGasFeed {
    pub fn new(readings: Vec<(&str, &str)>) -> Self {
        let items = readings
            .into_iter()
            .map(|(alias, value)| {
                serde_json::from_value(serde_json::json!({
                    "imeiAlias": alias,
                    "sensorTransmissionData": {
                        "sensorTransmissionDataDetailsList": [{"sensorVal": value}]
                    }
                }))
                .expect("valid gas item")
            })
            .collect();
        Self { items: Some(items) }
    }

    pub fn unavailable() -> Self {
        Self { items: None }
    }
}

#[async_trait]
impl GasFeed for FakeGasFeed {
    async fn fetch(&self) -> Result<Vec<GasSensorItem>> {
        match &self.items {
            Some(items) => Ok(items.clone()),
            None => anyhow::bail!("gas platform timed out"),
        }
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
