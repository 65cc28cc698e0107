use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pw3_mqtt_rs::config::Config;
use pw3_mqtt_rs::coordinator::{Coordinator, CoordinatorSettings};
use pw3_mqtt_rs::energy::EnergyIntegrator;
use pw3_mqtt_rs::mqtt::{MqttPublisher, SystemInfo};
use pw3_mqtt_rs::powerwall::PowerwallClient;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Powerwall MQTT Bridge - Publishes Powerwall power flows and energy totals to MQTT
#[derive(Parser)]
#[command(name = "pw3-mqtt-rs")]
#[command(version)]
#[command(about = "Powerwall MQTT Bridge - Publishes Powerwall power flows and energy totals to MQTT", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration first (to get log level)
    let config_path = cli.config;
    let config = Config::from_file(&config_path)?;

    // Initialize tracing with log level from config
    let app_log_level = config.default.log_level.as_str();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("pw3_mqtt_rs={}", app_log_level).parse()?)
                .add_directive("rumqttc=warn".parse()?)
                .add_directive("reqwest=warn".parse()?),
        )
        .init();

    info!("Configuration loaded from: {}", config_path);
    info!("Log level: {}", config.default.log_level);
    debug!("Debug logging is enabled");

    info!("  Powerwall Host: {}", config.powerwall.host);
    info!("  Account: {}", config.powerwall.email);
    info!("  Timezone: {}", config.powerwall.timezone);
    info!("  Interval: {:?}", config.powerwall.interval);
    info!("  MQTT Root: {}/{}", config.mqtt.root, config.mqtt.device_id);

    // The blocking HTTP client must not be built on a runtime thread
    let powerwall_config = config.powerwall.clone();
    let client = tokio::task::spawn_blocking(move || PowerwallClient::new(&powerwall_config))
        .await
        .context("Powerwall client worker failed")??;

    let coordinator = Arc::new(Coordinator::new(
        client,
        CoordinatorSettings::from(&config.powerwall),
    ));

    // Consumers are only set up once a first reading exists
    info!("Fetching initial reading...");
    let polling = Arc::clone(&coordinator)
        .start()
        .await
        .context("Initial Powerwall refresh failed")?;
    info!("✓ Initial reading received");

    let mut integrators: Vec<EnergyIntegrator> = if config.sensors.energy {
        config
            .energy
            .channels
            .iter()
            .map(|channel| {
                EnergyIntegrator::new(*channel, coordinator.reader(), config.energy.report_interval)
            })
            .collect()
    } else {
        Vec::new()
    };
    info!("{} energy integrator(s) enabled", integrators.len());

    info!("Creating MQTT publisher...");
    let mqtt_publisher = MqttPublisher::new(&config)?;
    mqtt_publisher.publish_online_status(true).await?;
    info!("✓ Published online status");

    let info = SystemInfo {
        version: env!("CARGO_PKG_VERSION"),
        timezone: &config.powerwall.timezone,
        interval_seconds: config.powerwall.interval.as_secs(),
        energy_channels: integrators.iter().map(|i| i.channel().name()).collect(),
    };
    mqtt_publisher.publish_system_info(&info).await?;
    info!("✓ Published system info");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    ctrlc::set_handler(move || on_signal.cancel())?;

    info!("Starting main loop...");
    let reader = coordinator.reader();
    let result = mqtt_publisher
        .run(&config, &reader, &mut integrators, &shutdown)
        .await;
    if let Err(e) = &result {
        error!("Publishing failed: {:?}", e);
    }

    polling.shutdown().await;
    if let Err(e) = mqtt_publisher.publish_online_status(false).await {
        error!("Failed to publish offline status: {:?}", e);
    }
    info!("Stopped");

    Ok(result?)
}
