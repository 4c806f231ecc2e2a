//! Cold Chamber Gateway Service
//!
//! This service:
//! - Periodically builds the chamber dashboard from Sitrad and the gas platform
//! - Logs each chamber and, when configured, publishes snapshots to MQTT
//! - Applies setpoint commands received over MQTT
//! - Runs the setpoint retry worker in the background
//!
//! Architecture: Sitrad + gas API → dashboard builder → log / MQTT,
//! MQTT commands → setpoint writer → Sitrad, with the retry worker
//! sharing the Sitrad client

use anyhow::{Context, Result};
use cold_chamber_gateway::config::Config;
use cold_chamber_gateway::dashboard::DashboardBuilder;
use cold_chamber_gateway::gas::GasApiClient;
use cold_chamber_gateway::mqtt::MqttPublisher;
use cold_chamber_gateway::retry::{self, RetryPolicy, RetryQueue};
use cold_chamber_gateway::setpoint::{SetpointRequest, SetpointWriter, WriteMode};
use cold_chamber_gateway::sitrad::SitradClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// Refresh the dashboard until shutdown, logging and publishing each snapshot
async fn refresh_dashboard(
    builder: DashboardBuilder<SitradClient, GasApiClient>,
    publisher: Option<Arc<MqttPublisher>>,
    queue: RetryQueue,
    refresh_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(refresh_interval_secs = refresh_interval.as_secs(), "Starting dashboard refresher");

    let mut ticker = tokio::time::interval(refresh_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let views = builder.build().await;
        for view in &views {
            info!(
                instrument_id = view.instrument_id,
                chamber = %view.camera_name,
                temperature = %view.temperature,
                humidity = %view.humidity,
                pulp = %view.pulp_temp,
                evaporator = %view.evaporator_temp,
                set1 = %view.set1,
                set3 = %view.set3,
                co2 = %view.co2,
                ethylene = %view.ethylene,
                "Chamber"
            );
        }

        let retries = queue.snapshot();
        if !retries.is_empty() {
            info!(pending = retries.len(), "Setpoint retries pending");
        }

        if let Some(publisher) = &publisher {
            if let Err(e) = publisher.publish_dashboard(&views).await {
                error!(error = %e, "Failed to publish dashboard to MQTT");
            }
            if let Err(e) = publisher.publish_retry_status(&retries).await {
                error!(error = %e, "Failed to publish retry status to MQTT");
            }
        }
    }

    info!("Dashboard refresher stopped");
}

/// Apply setpoint commands until shutdown, publishing each outcome
async fn serve_setpoint_commands(
    writer: SetpointWriter<SitradClient>,
    publisher: Arc<MqttPublisher>,
    mut requests: mpsc::Receiver<SetpointRequest>,
    allow_remote: bool,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(mode = ?writer.mode(), allow_remote, "Listening for setpoint commands");

    loop {
        let request = tokio::select! {
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };

        let outcome = writer.submit(request, allow_remote).await;
        if let Err(e) = publisher.publish_setpoint_outcome(&outcome).await {
            error!(error = %e, "Failed to publish setpoint outcome");
        }
    }

    info!("Setpoint command handler stopped");
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Cold Chamber Gateway starting");

    // Load configuration
    let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path))?;
    info!(path = %config_path, "Configuration loaded successfully");

    // Create upstream clients
    let sitrad = Arc::new(
        SitradClient::new(&config.instrument_api).context("Failed to create Sitrad client")?,
    );
    let gas = Arc::new(
        GasApiClient::new(&config.gas_api).context("Failed to create gas API client")?,
    );

    // The dashboard degrades to empty when Sitrad is down, so keep running
    if let Err(e) = sitrad.health_check().await {
        warn!(error = ?e, "Sitrad not reachable at startup");
    }

    // Optional MQTT publisher and setpoint command stream
    let (publisher, setpoint_requests) = match &config.mqtt {
        Some(mqtt) => {
            let (publisher, requests) =
                MqttPublisher::new(&mqtt.broker_url, &mqtt.client_id, &mqtt.topic_prefix)
                    .await
                    .context("Failed to create MQTT publisher")?;
            (Some(Arc::new(publisher)), Some(requests))
        }
        None => {
            info!("No [mqtt] section, snapshots will only be logged");
            (None, None)
        }
    };

    let policy = RetryPolicy::from_config(&config.retry, config.setpoints.tolerance);
    let queue = RetryQueue::new(policy);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn setpoint command handler
    let writer = SetpointWriter::new(
        sitrad.clone(),
        queue.clone(),
        WriteMode::from_live_flag(config.setpoints.live_writes),
        config.setpoints.tolerance,
    );
    let command_handle = match (publisher.clone(), setpoint_requests) {
        (Some(publisher), Some(requests)) => Some(tokio::spawn(serve_setpoint_commands(
            writer,
            publisher,
            requests,
            config.setpoints.allow_remote,
            shutdown_rx.clone(),
        ))),
        _ => {
            info!(mode = ?writer.mode(), "No command channel, setpoint writes disabled");
            None
        }
    };

    // Spawn retry worker
    let worker_handle = tokio::spawn(retry::run_worker(
        queue.clone(),
        sitrad.clone(),
        config.retry.poll_interval(),
        shutdown_rx.clone(),
    ));

    // Spawn dashboard refresher
    let builder = DashboardBuilder::new(sitrad, gas)
        .with_max_concurrent_reads(config.dashboard.max_concurrent_reads);
    let refresher_handle = tokio::spawn(refresh_dashboard(
        builder,
        publisher,
        queue.clone(),
        Duration::from_secs(config.dashboard.refresh_interval_secs.max(1)),
        shutdown_rx,
    ));

    // Wait for Ctrl+C
    info!("Service running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, shutting down gracefully");

    shutdown_tx.send(true).ok();

    // Let in-flight sweeps, refreshes and writes finish
    if let Some(handle) = command_handle {
        handle.await.ok();
    }
    worker_handle.await.ok();
    refresher_handle.await.ok();

    let abandoned = queue.snapshot();
    if !abandoned.is_empty() {
        warn!(pending = abandoned.len(), "Unconfirmed setpoints dropped at shutdown");
    }

    info!("Cold Chamber Gateway stopped");
    Ok(())
}
