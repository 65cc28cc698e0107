//! MQTT consumer of the coordinator snapshot and energy integrators

pub mod context;
pub mod publisher;
pub mod types;

pub use publisher::MqttPublisher;
pub use types::*;
