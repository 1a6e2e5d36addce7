//! Database rows and their conversion into domain types

use chrono::{DateTime, NaiveDate, Utc};

use super::types::{EpochSeconds, StoredNumber};
use crate::broadcast::Candidate;
use crate::errors::TrackerError;
use crate::features::StationFeature;
use crate::geofence::Coordinates;
use crate::models::{
    HardwareClass, HardwareNumber, PositionFix, PositionSample, Station, StationType,
    TelemetryReadings, TelemetrySample, TextSample,
};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct HardwareRow {
    hardware_type: i64,
    name: String,
    station_type: String,
}

impl From<HardwareRow> for HardwareClass {
    fn from(row: HardwareRow) -> Self {
        Self {
            hardware_type: row.hardware_type,
            name: row.name,
            station_type: StationType::from(row.station_type.as_str()),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct StationRow {
    hardware_number: StoredNumber,
    hardware_node: String,
    name: String,
    short_name: String,
    station_type: String,
    hardware_type: Option<i64>,
    last_position_id: Option<i64>,
    features: Option<String>, // JSON document
    updated_at: EpochSeconds,
}

impl TryFrom<StationRow> for Station {
    type Error = TrackerError;

    fn try_from(row: StationRow) -> Result<Self, Self::Error> {
        let features = row
            .features
            .as_deref()
            .map(serde_json::from_str::<StationFeature>)
            .transpose()?;

        Ok(Self {
            number: HardwareNumber::try_from(row.hardware_number)?,
            node: row.hardware_node,
            name: row.name,
            short_name: row.short_name,
            station_type: StationType::from(row.station_type.as_str()),
            hardware_type: row.hardware_type,
            last_position_id: row.last_position_id,
            features,
            updated_at: DateTime::try_from(row.updated_at)?,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct PositionRow {
    id: i64,
    station_number: StoredNumber,
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    ground_speed: Option<f64>,
    ground_track: Option<f64>,
    planned_at: Option<EpochSeconds>,
    recorded_at: EpochSeconds,
    local_date: NaiveDate,
}

impl TryFrom<PositionRow> for PositionSample {
    type Error = TrackerError;

    fn try_from(row: PositionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            station: HardwareNumber::try_from(row.station_number)?,
            fix: PositionFix {
                latitude: row.latitude,
                longitude: row.longitude,
                altitude: row.altitude,
                ground_speed: row.ground_speed,
                ground_track: row.ground_track,
                planned_at: row.planned_at.map(DateTime::<Utc>::try_from).transpose()?,
            },
            recorded_at: DateTime::try_from(row.recorded_at)?,
            local_date: row.local_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TelemetryRow {
    id: i64,
    station_number: StoredNumber,
    position_id: Option<i64>,
    battery_level: Option<f64>,
    voltage: Option<f64>,
    current: Option<f64>,
    temperature: Option<f64>,
    relative_humidity: Option<f64>,
    barometric_pressure: Option<f64>,
    wind_direction: Option<f64>,
    wind_speed: Option<f64>,
    wind_gust: Option<f64>,
    recorded_at: EpochSeconds,
    local_date: NaiveDate,
}

impl TryFrom<TelemetryRow> for TelemetrySample {
    type Error = TrackerError;

    fn try_from(row: TelemetryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            station: HardwareNumber::try_from(row.station_number)?,
            position_id: row.position_id,
            readings: TelemetryReadings {
                battery_level: row.battery_level,
                voltage: row.voltage,
                current: row.current,
                temperature: row.temperature,
                relative_humidity: row.relative_humidity,
                barometric_pressure: row.barometric_pressure,
                wind_direction: row.wind_direction,
                wind_speed: row.wind_speed,
                wind_gust: row.wind_gust,
            },
            recorded_at: DateTime::try_from(row.recorded_at)?,
            local_date: row.local_date,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TextRow {
    id: i64,
    station_number: StoredNumber,
    position_id: Option<i64>,
    text: String,
    message_key: Option<String>,
    destination_number: Option<i64>,
    recorded_at: EpochSeconds,
    local_date: NaiveDate,
}

impl TryFrom<TextRow> for TextSample {
    type Error = TrackerError;

    fn try_from(row: TextRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            station: HardwareNumber::try_from(row.station_number)?,
            position_id: row.position_id,
            text: row.text,
            message_key: row.message_key,
            destination: row
                .destination_number
                .map(|n| {
                    u32::try_from(n).map_err(|_| {
                        TrackerError::validation(format!("Invalid destination number {n}"))
                    })
                })
                .transpose()?,
            recorded_at: DateTime::try_from(row.recorded_at)?,
            local_date: row.local_date,
        })
    }
}

/// Station joined with its last durable position
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct CandidateRow {
    hardware_number: StoredNumber,
    station_type: String,
    last_position_id: i64,
    latitude: f64,
    longitude: f64,
}

impl TryFrom<CandidateRow> for Candidate {
    type Error = TrackerError;

    fn try_from(row: CandidateRow) -> Result<Self, Self::Error> {
        Ok(Self {
            number: HardwareNumber::try_from(row.hardware_number)?,
            station_type: StationType::from(row.station_type.as_str()),
            last_position_id: row.last_position_id,
            last_position: Coordinates::new(row.latitude, row.longitude),
        })
    }
}

/// Sample id with the time used to derive its local date
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct DatedRow {
    pub(crate) id: i64,
    pub(crate) recorded_at: EpochSeconds,
}
