use chrono::{DateTime, Utc};
use rumqttc::{AsyncClient, QoS};

use crate::errors::MqttError;

pub trait MqttPayload {
    fn to_payload(&self) -> String;
}

impl MqttPayload for DateTime<Utc> {
    fn to_payload(&self) -> String {
        self.to_rfc3339()
    }
}

impl MqttPayload for String {
    fn to_payload(&self) -> String {
        self.clone()
    }
}

impl MqttPayload for bool {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

impl MqttPayload for f64 {
    fn to_payload(&self) -> String {
        self.to_string()
    }
}

pub struct PublishContext<'a> {
    client: &'a AsyncClient,
    pub topic: String,
    pub qos: QoS,
    pub retain: bool,
}

impl<'a> PublishContext<'a> {
    pub fn new(client: &'a AsyncClient, topic: impl Into<String>) -> Self {
        Self {
            client,
            topic: topic.into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        }
    }

    pub fn full_topic(&self, topic: &str) -> String {
        format!("{}/{}", self.topic, topic)
    }

    pub async fn publish<T: MqttPayload>(&self, topic: &str, payload: &T) -> Result<(), MqttError> {
        let full_topic = self.full_topic(topic);
        self.client
            .publish(&full_topic, self.qos, self.retain, payload.to_payload())
            .await
            .map_err(|e| MqttError::PublishFailed {
                topic: full_topic,
                reason: e.to_string(),
            })
    }
}
