//! Check Sitrad connectivity and print one dashboard
//!
//! Run with: cargo run --example sitrad_health

use cold_chamber_gateway::config::Config;
use cold_chamber_gateway::dashboard::DashboardBuilder;
use cold_chamber_gateway::gas::GasApiClient;
use cold_chamber_gateway::sitrad::SitradClient;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_target(false)
        .init();

    let config_path = std::env::var("GATEWAY_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let sitrad = Arc::new(SitradClient::new(&config.instrument_api)?);
    let gas = Arc::new(GasApiClient::new(&config.gas_api)?);

    // Test health check
    sitrad.health_check().await?;
    println!("✅ Sitrad health check passed!");

    println!("\nBuilding dashboard...");
    let views = DashboardBuilder::new(sitrad, gas)
        .with_max_concurrent_reads(config.dashboard.max_concurrent_reads)
        .build()
        .await;

    for view in &views {
        println!(
            "{:<28} T={:<9} H={:<8} pulp={:<9} evap={:<9} SET1={:<9} SET3={:<9} CO2={:<10} C2H4={}",
            view.camera_name,
            view.temperature,
            view.humidity,
            view.pulp_temp,
            view.evaporator_temp,
            view.set1,
            view.set3,
            view.co2,
            view.ethylene
        );
    }
    println!("\n✅ {} chambers", views.len());

    Ok(())
}
