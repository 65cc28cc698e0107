//! Error types for the Powerwall-MQTT bridge
//!
//! Uses thiserror for ergonomic error definitions.
//! These errors can be converted to anyhow::Error in the main application.

/// Powerwall gateway communication errors
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("Request to {endpoint} returned HTTP {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Failed to decode response from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("No data available: {0}")]
    NoData(&'static str),
}

/// Raw payload could not be turned into a reading
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Value {value} out of range for {field}")]
    OutOfRange { field: &'static str, value: f64 },

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A refresh was abandoned; the previous snapshot is still current
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Fetch worker failed: {0}")]
    Worker(String),
}

/// MQTT connection and publishing errors
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("Failed to publish message to topic '{topic}': {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("Failed to serialize data: {error:?}")]
    SerializationError { error: serde_json::Error },

    #[error("MQTT client error: {0}")]
    ClientError(String),
}
