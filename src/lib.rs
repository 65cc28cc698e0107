//! Powerwall to MQTT Bridge
//!
//! Polls a Tesla Powerwall gateway, keeps the latest reading as a shared
//! snapshot and derives energy totals from the power samples.

pub mod config;
pub mod coordinator;
pub mod energy;
pub mod errors;
pub mod mqtt;
pub mod normalizer;
pub mod powerwall;
pub mod reading;

pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle, SnapshotReader};
pub use energy::{EnergyChannel, EnergyIntegrator};
pub use mqtt::publisher::MqttPublisher;
pub use powerwall::{PowerwallClient, ReadingSource};
pub use reading::Reading;
