//! Consolidated per-station feature document.
//!
//! Every station keeps one GeoJSON-shaped `Feature` that is rebuilt field by
//! field as identity, position, telemetry and text events arrive. Readings
//! merge with [`Coalesce`]: a newer value replaces the stored one only when
//! it is present, so a sensor that drops out never erases the last known
//! value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geofence::Coordinates;
use crate::models::{PositionFix, Station, TelemetryReadings};

/// Last-known-value merge
pub trait Coalesce {
    /// Merge `newer` into `self`, keeping existing values where `newer` has none
    fn coalesce(&mut self, newer: Self);
}

impl<T> Coalesce for Option<T> {
    fn coalesce(&mut self, newer: Self) {
        if newer.is_some() {
            *self = newer;
        }
    }
}

impl Coalesce for TelemetryReadings {
    fn coalesce(&mut self, newer: Self) {
        self.battery_level.coalesce(newer.battery_level);
        self.voltage.coalesce(newer.voltage);
        self.current.coalesce(newer.current);
        self.temperature.coalesce(newer.temperature);
        self.relative_humidity.coalesce(newer.relative_humidity);
        self.barometric_pressure.coalesce(newer.barometric_pressure);
        self.wind_direction.coalesce(newer.wind_direction);
        self.wind_speed.coalesce(newer.wind_speed);
        self.wind_gust.coalesce(newer.wind_gust);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointGeometry {
    #[serde(rename = "type")]
    pub kind: String,
    /// `[lon, lat]` or `[lon, lat, alt]`
    pub coordinates: Vec<f64>,
}

impl PointGeometry {
    /// Placeholder point at the origin, excluded from queries
    pub fn placeholder() -> Self {
        Self {
            kind: "Point".to_string(),
            coordinates: vec![0.0, 0.0],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PositionProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ground_track: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position_at: Option<DateTime<Utc>>,
}

impl Coalesce for PositionProperties {
    fn coalesce(&mut self, newer: Self) {
        self.latitude.coalesce(newer.latitude);
        self.longitude.coalesce(newer.longitude);
        self.altitude.coalesce(newer.altitude);
        self.ground_speed.coalesce(newer.ground_speed);
        self.ground_track.coalesce(newer.ground_track);
        self.position_at.coalesce(newer.position_at);
    }
}

/// Entry of the feature's text log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEntry {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// Properties added when a feature is served, never stored
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_old: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hours_old: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outside: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureProperties {
    pub name: String,
    pub short_name: String,
    pub hardware_number: u32,
    pub hardware_node: String,
    #[serde(default)]
    pub hardware_class: Option<i64>,
    pub node_type: String,
    #[serde(flatten)]
    pub position: PositionProperties,
    #[serde(flatten)]
    pub telemetry: TelemetryReadings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub telemetry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub texts: Vec<TextEntry>,
    #[serde(flatten)]
    pub query: QueryProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationFeature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: PointGeometry,
    pub properties: FeatureProperties,
}

impl StationFeature {
    /// Canonical empty document for a station
    pub fn skeleton(station: &Station) -> Self {
        Self {
            kind: "Feature".to_string(),
            geometry: PointGeometry::placeholder(),
            properties: FeatureProperties {
                name: station.name.clone(),
                short_name: station.short_name.clone(),
                hardware_number: station.number.value(),
                hardware_node: station.node.clone(),
                hardware_class: station.hardware_type,
                node_type: station.station_type.to_string(),
                ..Default::default()
            },
        }
    }

    /// Copy station identity into the document
    pub fn apply_identity(&mut self, station: &Station) {
        let props = &mut self.properties;
        props.name = station.name.clone();
        props.short_name = station.short_name.clone();
        props.hardware_number = station.number.value();
        props.hardware_node = station.node.clone();
        props.hardware_class.coalesce(station.hardware_type);
        props.node_type = station.station_type.to_string();
    }

    pub fn apply_position(&mut self, fix: &PositionFix, at: DateTime<Utc>) {
        let mut coordinates = vec![fix.longitude, fix.latitude];
        if let Some(alt) = fix.altitude {
            coordinates.push(alt);
        }
        self.geometry.coordinates = coordinates;

        self.properties.position.coalesce(PositionProperties {
            latitude: Some(fix.latitude),
            longitude: Some(fix.longitude),
            altitude: fix.altitude,
            ground_speed: fix.ground_speed,
            ground_track: fix.ground_track,
            position_at: Some(at),
        });
    }

    pub fn apply_telemetry(&mut self, readings: &TelemetryReadings, at: DateTime<Utc>) {
        self.properties.telemetry.coalesce(readings.clone());
        self.properties.telemetry_at = Some(at);
    }

    pub fn push_text(&mut self, text: &str, at: DateTime<Utc>) {
        self.properties.texts.push(TextEntry {
            text: text.to_string(),
            at,
        });
    }

    /// Point of the geometry, None for a missing or placeholder point
    pub fn coordinates(&self) -> Option<Coordinates> {
        match self.geometry.coordinates.as_slice() {
            [lon, lat, ..] => {
                let c = Coordinates::new(*lat, *lon);
                (!c.is_null_island()).then_some(c)
            }
            _ => None,
        }
    }
}
