//! Errors for the station tracker
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("MQTT client error")]
    MqttClientError(#[from] rumqttc::ClientError),

    #[error("Serialization error")]
    SerdeError(#[from] serde_json::Error),

    #[error("Configuration error")]
    ConfigError(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Invalid topic")]
    InvalidTopic(String),

    #[error("Invalid hardware number: {0}")]
    InvalidHardwareNumber(String),

    #[error("Unknown event kind: {0}")]
    UnknownEventKind(String),

    #[error("Invalid event: {0}")]
    Validation(String),

    #[error("Duplicate record: {0}")]
    Duplicate(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Record still referenced: {0}")]
    ReferentialConstraint(String),

    #[error("Broadcast {id} incomplete: {failed} companion texts not stored")]
    IncompleteBroadcast { id: i64, failed: usize },

    #[error("Database migration error")]
    MigrationError(#[from] sqlx::migrate::MigrateError),

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),
}

impl TrackerError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        TrackerError::Validation(message.into())
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        TrackerError::ConfigurationError {
            message: message.into(),
        }
    }
}
