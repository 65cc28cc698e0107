use crate::config::Config;
use crate::coordinator::SnapshotReader;
use crate::energy::{EnergyChannel, EnergyIntegrator};
use crate::errors::MqttError;
use crate::mqtt::context::PublishContext;
use crate::mqtt::{Status, SystemInfo};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

pub struct MqttPublisher {
    client: AsyncClient,
    root_topic: String,
}

macro_rules! publish_if_changed {
    ($context:expr, $src:ident , $old:ident, $field:ident) => {
        if $old.as_ref().map_or(true, |o| o.$field != $src.$field) {
            $context.publish(stringify!($field), &$src.$field).await?;
        }
    };
}

impl MqttPublisher {
    /// Connect to the broker and drive the event loop on a background task
    pub fn new(config: &Config) -> Result<Self, MqttError> {
        let device_id = &config.mqtt.device_id;
        let client_id = format!("pw3-mqtt-rs-{}", device_id);

        let mut mqtt_options = if let Some(socket_path) = &config.mqtt.socket {
            // Unix domain socket connection
            tracing::info!("Using MQTT Unix socket: {}", socket_path);
            let mut options = MqttOptions::new(client_id, socket_path, 0);
            #[cfg(unix)]
            options.set_transport(rumqttc::Transport::Unix);
            options
        } else {
            let host = config.mqtt.host.as_ref().ok_or_else(|| {
                MqttError::ClientError("MQTT host or socket must be configured".to_string())
            })?;

            tracing::info!("Using MQTT TCP connection: {}:{}", host, config.mqtt.port);
            MqttOptions::new(client_id, host, config.mqtt.port)
        };

        if !config.mqtt.username.is_empty() {
            mqtt_options.set_credentials(&config.mqtt.username, &config.mqtt.password);
        }

        mqtt_options.set_keep_alive(Duration::from_secs(60));

        let root_topic = format!("{}/{}", config.mqtt.root, device_id);

        // Publish "false" to the online topic when the connection is lost
        mqtt_options.set_last_will(rumqttc::LastWill {
            topic: format!("{}/online", root_topic),
            message: b"false".to_vec().into(),
            qos: QoS::AtLeastOnce,
            retain: true,
        });

        let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10);

        tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        tracing::info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        // On connection error, crash the process (let it crash philosophy)
                        tracing::error!("MQTT connection error: {:?}", e);
                        std::process::exit(1);
                    }
                }
            }
        });

        Ok(Self::with_client(client, root_topic))
    }

    fn with_client(client: AsyncClient, root_topic: String) -> Self {
        Self { client, root_topic }
    }

    pub fn context(&'_ self, topic: &str) -> PublishContext<'_> {
        let full_topic = if topic.is_empty() {
            self.root_topic.clone()
        } else {
            format!("{}/{}", self.root_topic, topic)
        };
        PublishContext::new(&self.client, full_topic)
    }

    pub async fn publish_online_status(&self, online: bool) -> Result<(), MqttError> {
        let context = self.context("");
        context.publish("online", &online).await
    }

    /// Publish bridge info as JSON
    pub async fn publish_system_info(&self, info: &SystemInfo<'_>) -> Result<(), MqttError> {
        let context = self.context("");
        let json =
            serde_json::to_string(info).map_err(|error| MqttError::SerializationError { error })?;

        context.publish("info", &json).await
    }

    /// Publish snapshot values.
    /// Only publishes fields that have changed compared to `old`
    pub async fn publish_status(&self, status: &Status, old: Option<&Status>) -> Result<(), MqttError> {
        let context = self.context("status");
        publish_if_changed!(context, status, old, time);
        publish_if_changed!(context, status, old, solar);
        publish_if_changed!(context, status, old, battery);
        publish_if_changed!(context, status, old, home);
        publish_if_changed!(context, status, old, grid);
        publish_if_changed!(context, status, old, percentage);
        publish_if_changed!(context, status, old, battery_charge);
        publish_if_changed!(context, status, old, battery_discharge);
        publish_if_changed!(context, status, old, grid_import);
        publish_if_changed!(context, status, old, grid_export);
        publish_if_changed!(context, status, old, update_failed);

        Ok(())
    }

    pub async fn publish_update_failed(&self, failed: bool) -> Result<(), MqttError> {
        let context = self.context("status");
        context.publish("update_failed", &failed).await
    }

    /// Publish an integrator value in kWh
    pub async fn publish_energy(&self, channel: EnergyChannel, kwh: f64) -> Result<(), MqttError> {
        let context = self.context("energy");
        context.publish(channel.name(), &kwh).await
    }

    /// Publish snapshot and energy values every `publish_interval` until
    /// `shutdown` is cancelled or a publish fails.
    pub async fn run(
        &self,
        config: &Config,
        reader: &SnapshotReader,
        integrators: &mut [EnergyIntegrator],
        shutdown: &CancellationToken,
    ) -> Result<(), MqttError> {
        let mut ticker = time::interval(config.mqtt.publish_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_status: Option<Status> = None;
        let mut last_failed: Option<bool> = None;

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            let failed = reader.last_update_failed();
            if config.sensors.power {
                if let Some(reading) = reader.current() {
                    let status = Status::from_reading(&reading, failed);
                    self.publish_status(&status, last_status.as_ref()).await?;
                    last_status = Some(status);
                }
            } else if last_failed != Some(failed) {
                // Without power topics this is the only staleness signal
                self.publish_update_failed(failed).await?;
            }
            last_failed = Some(failed);

            for integrator in integrators.iter_mut() {
                if let Some(kwh) = integrator.current_value() {
                    self.publish_energy(integrator.channel(), kwh).await?;
                }
            }
        }
    }
}
