//! Cold chamber gateway library
//!
//! Builds a per-chamber view from Sitrad instrument telemetry and an external
//! gas-sensor feed, and writes setpoints back to Sitrad with a retry queue.

pub mod chamber;
pub mod config;
pub mod dashboard;
pub mod gas;
pub mod mqtt;
pub mod registry;
pub mod retry;
pub mod setpoint;
pub mod sitrad;
pub mod telemetry;

#[cfg(test)]
mod testing;
