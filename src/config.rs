//! Application configuration

use std::time::Duration;

use chrono_tz::Tz;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::TrackerError;
use crate::geofence::{Campus, Geofence};
use crate::models::HardwareNumber;
use crate::reducer::{PersistencePolicy, DEFAULT_DAILY_FIX_WINDOW};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub mqtt: MqttConfig,
    pub database: DatabaseConfig,
    pub campus: CampusConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MqttTransport {
    #[default]
    Tcp,
    Tls,
    Wss,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub transport: MqttTransport,
    pub client_id: String,
    pub topics: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_keep_alive")]
    pub keep_alive: Duration,
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Geofence as two opposite corners
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct GeofenceConfig {
    pub latitude1: f64,
    pub longitude1: f64,
    pub latitude2: f64,
    pub longitude2: f64,
}

impl TryFrom<GeofenceConfig> for Geofence {
    type Error = TrackerError;

    fn try_from(c: GeofenceConfig) -> Result<Self, Self::Error> {
        Geofence::from_corners(c.latitude1, c.longitude1, c.latitude2, c.longitude2)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CampusConfig {
    pub name: String,
    /// IANA time zone name, e.g. `America/Denver`
    pub time_zone: String,
    #[serde(default)]
    pub inner: Option<GeofenceConfig>,
    #[serde(default)]
    pub outer: Option<GeofenceConfig>,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(default = "default_daily_fix_window")]
    pub daily_fix_window: Duration,
    /// Station relaying the bus; its broadcasts fan out to field stations
    #[serde(default)]
    pub gateway_number: Option<u32>,
}

fn default_daily_fix_window() -> Duration {
    DEFAULT_DAILY_FIX_WINDOW
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            daily_fix_window: DEFAULT_DAILY_FIX_WINDOW,
            gateway_number: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("EVATRACKER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("mqtt.topics"),
            )
            .build()?;

        config.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        self.mqtt.validate()?;
        self.database.validate()?;
        self.campus.to_campus()?;
        self.ingest.gateway()?;
        Ok(())
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.host.trim().is_empty() {
            return Err(TrackerError::configuration("MQTT host cannot be empty"));
        }
        if self.topics.is_empty() {
            return Err(TrackerError::configuration(
                "At least one MQTT topic is required",
            ));
        }
        if self.keep_alive.is_zero() {
            return Err(TrackerError::configuration(
                "MQTT keep alive must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl DatabaseConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.url.trim().is_empty() {
            return Err(TrackerError::configuration("Database URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(TrackerError::configuration(
                "Database pool needs at least one connection",
            ));
        }
        Ok(())
    }
}

impl CampusConfig {
    /// Build the campus value handed to every operation
    pub fn to_campus(&self) -> Result<Campus, TrackerError> {
        if self.name.trim().is_empty() {
            return Err(TrackerError::configuration("Campus name cannot be empty"));
        }
        let time_zone: Tz = self.time_zone.parse().map_err(|_| {
            TrackerError::configuration(format!("Unknown time zone: {}", self.time_zone))
        })?;

        Ok(Campus {
            name: self.name.clone(),
            time_zone,
            inner: self.inner.map(Geofence::try_from).transpose()?,
            outer: self.outer.map(Geofence::try_from).transpose()?,
        })
    }
}

impl IngestConfig {
    pub fn policy(&self) -> PersistencePolicy {
        PersistencePolicy {
            daily_fix_window: self.daily_fix_window,
        }
    }

    pub fn gateway(&self) -> Result<Option<HardwareNumber>, TrackerError> {
        self.gateway_number.map(HardwareNumber::try_from).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_load_config() {
        env::set_var("EVATRACKER__MQTT__HOST", "localhost");
        env::set_var("EVATRACKER__MQTT__PORT", "1883");
        env::set_var("EVATRACKER__MQTT__TOPICS", "msh/US/2/json/#,msh/US/2/e/#");
        env::set_var("EVATRACKER__MQTT__CLIENT_ID", "test_client");
        env::set_var("EVATRACKER__DATABASE__URL", "sqlite::memory:");
        env::set_var("EVATRACKER__CAMPUS__NAME", "Test Campus");
        env::set_var("EVATRACKER__CAMPUS__TIME_ZONE", "America/Denver");
        env::set_var("EVATRACKER__INGEST__DAILY_FIX_WINDOW", "600");

        let config = AppConfig::load().unwrap();
        assert_eq!(config.mqtt.host, "localhost");
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.topics, vec!["msh/US/2/json/#", "msh/US/2/e/#"]);
        assert_eq!(config.mqtt.client_id, "test_client");
        assert_eq!(config.mqtt.transport, MqttTransport::Tcp);
        assert_eq!(config.mqtt.keep_alive, Duration::from_secs(30));
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.ingest.daily_fix_window, Duration::from_secs(600));
        assert!(config.validate().is_ok());

        let campus = config.campus.to_campus().unwrap();
        assert_eq!(campus.time_zone, chrono_tz::America::Denver);
        assert!(campus.inner.is_none());
    }

    fn campus_config() -> CampusConfig {
        CampusConfig {
            name: "Test Campus".to_string(),
            time_zone: "America/Denver".to_string(),
            inner: Some(GeofenceConfig {
                latitude1: 40.1,
                longitude1: -104.9,
                latitude2: 39.9,
                longitude2: -105.1,
            }),
            outer: None,
        }
    }

    #[test]
    fn test_campus_normalizes_fence() {
        let campus = campus_config().to_campus().unwrap();
        let inner = campus.inner.unwrap();
        assert_eq!(inner.lat_min, 39.9);
        assert_eq!(inner.lon_max, -104.9);
    }

    #[test]
    fn test_campus_invalid_time_zone() {
        let mut config = campus_config();
        config.time_zone = "Mars/Olympus_Mons".to_string();
        assert!(config.to_campus().is_err());
    }

    #[test]
    fn test_database_config_validate() {
        let config = DatabaseConfig {
            url: "sqlite://tracker.db".to_string(),
            max_connections: 5,
        };
        assert!(config.validate().is_ok());

        let config = DatabaseConfig {
            url: "".to_string(),
            max_connections: 5,
        };
        assert!(config.validate().is_err());

        let config = DatabaseConfig {
            url: "sqlite://tracker.db".to_string(),
            max_connections: 0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gateway_number_validated() {
        let ingest = IngestConfig {
            gateway_number: Some(0),
            ..Default::default()
        };
        assert!(ingest.gateway().is_err());

        let ingest = IngestConfig {
            gateway_number: Some(12345),
            ..Default::default()
        };
        assert_eq!(ingest.gateway().unwrap().unwrap().value(), 12345);
    }
}
