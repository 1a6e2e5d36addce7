//! Station tracker service

use eva_tracker::config::AppConfig;
use eva_tracker::database::Database;
use eva_tracker::errors::TrackerError;
use eva_tracker::geofence::Campus;
use eva_tracker::mqtt::{MqttClient, MqttClientBuilder};
use eva_tracker::reducer::Outcome;
use tokio::signal;
use tracing::{debug, error, info};

#[tokio::main]
async fn main() -> Result<(), TrackerError> {
    #[cfg(feature = "dotenv")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load configuration, preferring environment variables and config files
    let config = AppConfig::load()?;
    config.validate()?;
    let campus = config.campus.to_campus()?;
    info!(
        "Tracking campus {} ({}), inner fence: {}",
        campus.name,
        campus.time_zone,
        campus.inner.is_some()
    );

    let db = Database::connect(&config.database)
        .await?
        .with_policy(config.ingest.policy())
        .with_gateway(config.ingest.gateway()?);

    let mqtt_client = MqttClientBuilder::new(&config.mqtt)?
        .connect(&config.mqtt.topics)
        .await?;

    tokio::select! {
        result = run_tracker(mqtt_client, &db, &campus) => {
            info!("Tracker completed: {:?}", result);
        }
        _ = signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    db.pool().close().await;
    Ok(())
}

async fn run_tracker(
    mut mqtt_client: MqttClient,
    database: &Database,
    campus: &Campus,
) -> Result<(), TrackerError> {
    while let Some(delivery) = mqtt_client.recv().await {
        match database.process_event(&delivery.event, campus).await {
            Ok(outcome) => {
                if let Outcome::Dropped(reason) = outcome {
                    debug!("Dropped event from {}: {:?}", delivery.event.source, reason);
                }
                mqtt_client.ack(&delivery).await?;
            }
            // Left unacknowledged so the broker delivers it again
            Err(e) => error!(
                "Failed to process {} event from {}: {}",
                delivery.event.payload.kind(),
                delivery.event.source,
                e
            ),
        }
    }

    Ok(())
}
