//! MQTT publisher for dashboard snapshots and setpoint commands
//!
//! This module provides an async MQTT client that:
//! - Connects to a Mosquitto broker
//! - Publishes each chamber view as retained per-metric topics
//! - Publishes the retry queue snapshot as JSON
//! - Subscribes to `{prefix}/setpoints/set` and forwards decoded requests
//! - Keeps its event loop alive across broker disconnects

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dashboard::ChamberView;
use crate::retry::RetryStatus;
use crate::setpoint::{SetpointOutcome, SetpointRequest};

const COMMAND_BUFFER: usize = 16;

/// MQTT client for publishing chamber snapshots
pub struct MqttPublisher {
    client: AsyncClient,
    topic_prefix: String,
    _event_loop_handle: JoinHandle<()>,
}

impl MqttPublisher {
    /// Create a new MQTT publisher and connect to the broker
    ///
    /// Returns the publisher together with the setpoint requests received
    /// on the command topic.
    ///
    /// # Arguments
    /// * `broker_url` - URL like "mqtt://localhost:1883"
    /// * `client_id` - Unique client identifier
    /// * `topic_prefix` - Root of every published topic (e.g., "chambers")
    pub async fn new(
        broker_url: &str,
        client_id: &str,
        topic_prefix: &str,
    ) -> Result<(Self, mpsc::Receiver<SetpointRequest>)> {
        info!(broker = broker_url, client_id = client_id, "Connecting to MQTT broker");

        let (host, port) = parse_broker_url(broker_url)?;

        let mut mqttoptions = MqttOptions::new(client_id, host, port);
        mqttoptions.set_keep_alive(Duration::from_secs(30));

        let (client, mut event_loop) = AsyncClient::new(mqttoptions, 64);

        let command_topic = Self::setpoint_command_topic(topic_prefix);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let subscriber = client.clone();

        let event_loop_handle = tokio::spawn(async move {
            info!("MQTT event loop started");
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        // Clean sessions drop subscriptions on every reconnect
                        match subscriber.try_subscribe(command_topic.as_str(), QoS::AtLeastOnce) {
                            Ok(()) => {
                                info!(topic = %command_topic, "Subscribed to setpoint commands")
                            }
                            Err(e) => {
                                error!(topic = %command_topic, error = %e, "Failed to subscribe")
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish)))
                        if publish.topic == command_topic =>
                    {
                        forward_setpoint_command(&command_tx, &publish.payload);
                    }
                    Ok(notification) => {
                        debug!("MQTT notification: {:?}", notification);
                    }
                    Err(e) => {
                        error!("MQTT connection error: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        let publisher = Self {
            client,
            topic_prefix: topic_prefix.to_string(),
            _event_loop_handle: event_loop_handle,
        };
        Ok((publisher, command_rx))
    }

    /// Publish a message to a topic
    pub async fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, retain, payload.as_bytes())
            .await
            .with_context(|| format!("Failed to publish to topic: {}", topic))?;

        debug!(topic = topic, payload_len = payload.len(), "Published to MQTT");
        Ok(())
    }

    /// Publish every metric of a chamber view as a retained topic
    pub async fn publish_chamber(&self, view: &ChamberView) -> Result<()> {
        let chamber = view.chamber_key();
        for (metric, value) in chamber_metrics(view) {
            let topic = Self::build_topic(&self.topic_prefix, &chamber, metric);
            self.publish(&topic, value, true).await?;
        }
        Ok(())
    }

    /// Publish a full dashboard snapshot
    pub async fn publish_dashboard(&self, views: &[ChamberView]) -> Result<()> {
        for view in views {
            self.publish_chamber(view).await?;
        }
        info!(chambers = views.len(), "Published dashboard to MQTT");
        Ok(())
    }

    /// Publish the retry queue snapshot as a JSON array
    pub async fn publish_retry_status(&self, statuses: &[RetryStatus]) -> Result<()> {
        let topic = format!("{}/retries", self.topic_prefix);
        let payload = serde_json::to_string(statuses).context("Failed to encode retry status")?;
        self.publish(&topic, &payload, true).await
    }

    /// Publish the answer to a setpoint command
    pub async fn publish_setpoint_outcome(&self, outcome: &SetpointOutcome) -> Result<()> {
        let topic = format!("{}/setpoints/result", self.topic_prefix);
        let payload = serde_json::to_string(outcome).context("Failed to encode setpoint outcome")?;
        self.publish(&topic, &payload, false).await
    }

    /// Topic operators publish setpoint requests to
    pub fn setpoint_command_topic(prefix: &str) -> String {
        format!("{}/setpoints/set", prefix)
    }

    /// Build topic name for a chamber metric
    ///
    /// Topic hierarchy:
    /// - chambers/5/camera_name
    /// - chambers/5/temperature
    /// - chambers/5/set1
    /// - chambers/5/co2
    /// - chambers/retries
    pub fn build_topic(prefix: &str, chamber: &str, metric: &str) -> String {
        format!("{}/{}/{}", prefix, chamber, metric)
    }
}

fn chamber_metrics(view: &ChamberView) -> [(&'static str, &str); 9] {
    [
        ("camera_name", view.camera_name.as_str()),
        ("temperature", view.temperature.as_str()),
        ("humidity", view.humidity.as_str()),
        ("pulp_temp", view.pulp_temp.as_str()),
        ("evaporator_temp", view.evaporator_temp.as_str()),
        ("set1", view.set1.as_str()),
        ("set3", view.set3.as_str()),
        ("co2", view.co2.as_str()),
        ("ethylene", view.ethylene.as_str()),
    ]
}

/// Decode a setpoint command payload
///
/// Expected JSON: `{"instrumentId": 42, "code": "SET1", "value": 3.5}`
pub fn parse_setpoint_command(payload: &[u8]) -> Result<SetpointRequest> {
    serde_json::from_slice(payload).context("Invalid setpoint command payload")
}

fn forward_setpoint_command(commands: &mpsc::Sender<SetpointRequest>, payload: &[u8]) {
    match parse_setpoint_command(payload) {
        Ok(request) => {
            debug!(
                instrument_id = request.instrument_id,
                code = %request.code,
                "Setpoint command received"
            );
            if let Err(e) = commands.try_send(request) {
                warn!(error = %e, "Dropping setpoint command");
            }
        }
        Err(e) => {
            warn!(error = %e, payload_len = payload.len(), "Ignoring setpoint command");
        }
    }
}

/// Parse MQTT broker URL into host and port
///
/// Supports:
/// - mqtt://localhost:1883
/// - mqtt://192.168.1.100:1883
/// - mqtts://broker.example.com:8883
fn parse_broker_url(url: &str) -> Result<(String, u16)> {
    let url_without_protocol = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("mqtts://"))
        .context("Invalid MQTT URL: must start with mqtt:// or mqtts://")?;

    if let Some((host, port_str)) = url_without_protocol.split_once(':') {
        let port = port_str
            .parse::<u16>()
            .context("Invalid port number in MQTT URL")?;
        Ok((host.to_string(), port))
    } else {
        // Default port if not specified
        Ok((url_without_protocol.to_string(), 1883))
    }
}
