//! Data models.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::TrackerError;
use crate::features::StationFeature;
use crate::geofence::Coordinates;
use serde_helpers::*;

/// Node number of a mesh station
///
/// A 32-bit identifier assigned by the radio firmware. Zero and the
/// broadcast address are never valid station identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct HardwareNumber(u32);

impl HardwareNumber {
    /// Destination address of messages sent to every node
    pub const BROADCAST: u32 = u32::MAX;

    /// Get the raw node number
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Node identifier in the `!xxxxxxxx` form radios display
    pub fn node_id(&self) -> String {
        format!("!{:08x}", self.0)
    }
}

impl TryFrom<i64> for HardwareNumber {
    type Error = TrackerError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        match u32::try_from(value) {
            Ok(0) | Ok(Self::BROADCAST) | Err(_) => {
                Err(TrackerError::InvalidHardwareNumber(value.to_string()))
            }
            Ok(n) => Ok(Self(n)),
        }
    }
}

impl From<HardwareNumber> for u32 {
    fn from(number: HardwareNumber) -> Self {
        number.0
    }
}

impl TryFrom<u32> for HardwareNumber {
    type Error = TrackerError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::try_from(value as i64)
    }
}

impl TryFrom<&str> for HardwareNumber {
    type Error = TrackerError;

    /// Accepts decimal numbers and `!`-prefixed hexadecimal node ids
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let parsed = match value.strip_prefix('!') {
            Some(hex) => i64::from_str_radix(hex, 16),
            None => value.parse::<i64>(),
        }
        .map_err(|_| TrackerError::InvalidHardwareNumber(value.to_string()))?;
        Self::try_from(parsed)
    }
}

impl fmt::Display for HardwareNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a station, derived from its hardware class
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum StationType {
    /// Repeaters, gateways and other fixed equipment
    #[default]
    Infrastructure,
    /// Carried by crew or vehicles in the field
    Active,
    /// Known but excluded from every report
    Ignore,
    /// Virtual station following a pre-planned route
    Planner,
    Other(String),
}

impl StationType {
    pub fn as_str(&self) -> &str {
        match self {
            StationType::Infrastructure => "infrastructure",
            StationType::Active => "active",
            StationType::Ignore => "ignore",
            StationType::Planner => "planner",
            StationType::Other(s) => s,
        }
    }

    /// Fixed and ignored stations never take part in excursions
    pub fn is_excluded(&self) -> bool {
        matches!(self, StationType::Infrastructure | StationType::Ignore)
    }
}

impl From<&str> for StationType {
    fn from(value: &str) -> Self {
        match value {
            "infrastructure" => StationType::Infrastructure,
            "active" => StationType::Active,
            "ignore" => StationType::Ignore,
            "planner" => StationType::Planner,
            other => StationType::Other(other.to_string()),
        }
    }
}

impl fmt::Display for StationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for StationType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for StationType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(StationType::from(s.as_str()))
    }
}

/// Entry of the hardware-class lookup table
#[derive(Debug, Clone, PartialEq)]
pub struct HardwareClass {
    pub hardware_type: i64,
    pub name: String,
    pub station_type: StationType,
}

impl HardwareClass {
    /// Entry created on demand for a class nobody has configured yet
    pub fn unknown(hardware_type: i64) -> Self {
        Self {
            hardware_type,
            name: "unknown".to_string(),
            station_type: StationType::Infrastructure,
        }
    }
}

/// A tracked station and its consolidated state
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub number: HardwareNumber,
    pub node: String,
    pub name: String,
    pub short_name: String,
    pub station_type: StationType,
    pub hardware_type: Option<i64>,
    /// Latest durable position sample
    pub last_position_id: Option<i64>,
    pub features: Option<StationFeature>,
    pub updated_at: DateTime<Utc>,
}

/// Position as reported by a producer, already converted to degrees
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PositionFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Altitude in metres
    pub altitude: Option<f64>,
    /// Ground speed in m/s
    pub ground_speed: Option<f64>,
    /// Ground track in degrees
    pub ground_track: Option<f64>,
    /// Time this position is planned for, for forward-looking routes
    pub planned_at: Option<DateTime<Utc>>,
}

impl PositionFix {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }
}

/// Environmental and power readings
///
/// Every field is optional; producers send whatever their sensors have.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryReadings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_humidity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub barometric_pressure: Option<f64>,
    /// Wind direction in degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_direction: Option<f64>,
    /// Wind speed in m/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_gust: Option<f64>,
}

impl TelemetryReadings {
    pub fn has_wind(&self) -> bool {
        self.wind_direction.is_some() || self.wind_speed.is_some()
    }
}

/// Durable position sample
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub id: i64,
    pub station: HardwareNumber,
    pub fix: PositionFix,
    pub recorded_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

impl PositionSample {
    pub fn coordinates(&self) -> Coordinates {
        self.fix.coordinates()
    }
}

/// Durable telemetry sample
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub id: i64,
    pub station: HardwareNumber,
    pub position_id: Option<i64>,
    pub readings: TelemetryReadings,
    pub recorded_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

/// Durable text message
#[derive(Debug, Clone, PartialEq)]
pub struct TextSample {
    pub id: i64,
    pub station: HardwareNumber,
    pub position_id: Option<i64>,
    pub text: String,
    /// De-duplication key, unique across all texts
    pub message_key: Option<String>,
    /// Addressed node number, [`HardwareNumber::BROADCAST`] for broadcasts
    pub destination: Option<u32>,
    pub recorded_at: DateTime<Utc>,
    pub local_date: NaiveDate,
}

/// Station metadata announcement
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct IdentityPayload {
    /// Node identifier string, e.g. `!a1b2c3d4`
    #[serde(default, deserialize_with = "deserialize_clean_name")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "deserialize_clean_name")]
    pub longname: Option<String>,
    #[serde(default, deserialize_with = "deserialize_clean_name")]
    pub shortname: Option<String>,
    /// Hardware class number
    #[serde(default)]
    pub hardware: Option<i64>,
}

/// Free-form text message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TextPayload {
    #[serde(deserialize_with = "deserialize_clean_text")]
    pub text: String,
}

/// Kind-specific part of an inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Identity(IdentityPayload),
    Position(PositionFix),
    Telemetry(TelemetryReadings),
    Text(TextPayload),
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Identity(_) => "identity",
            EventPayload::Position(_) => "position",
            EventPayload::Telemetry(_) => "telemetry",
            EventPayload::Text(_) => "text",
        }
    }
}

/// A validated inbound event
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    /// Station that produced the event
    pub source: HardwareNumber,
    /// Receipt time reported by the gateway
    pub received_at: DateTime<Utc>,
    /// Producer message identifier, when available
    pub dedupe_id: Option<i64>,
    /// Destination node number, when addressed
    pub to: Option<u32>,
    pub payload: EventPayload,
}

impl InboundEvent {
    pub fn new(source: HardwareNumber, received_at: DateTime<Utc>, payload: EventPayload) -> Self {
        Self {
            source,
            received_at,
            dedupe_id: None,
            to: None,
            payload,
        }
    }

    pub fn with_dedupe_id(mut self, id: i64) -> Self {
        self.dedupe_id = Some(id);
        self
    }

    pub fn with_destination(mut self, to: u32) -> Self {
        self.to = Some(to);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to == Some(HardwareNumber::BROADCAST)
    }

    /// Parse and validate a JSON envelope
    pub fn from_json(payload: &[u8]) -> Result<Self, TrackerError> {
        let raw: RawEnvelope = serde_json::from_slice(payload)?;
        Self::try_from(raw)
    }
}

/// Envelope as it arrives on the bus, before validation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEnvelope {
    #[serde(default, alias = "type")]
    pub kind: Option<String>,
    #[serde(default, alias = "from")]
    pub source_id: Option<i64>,
    /// Receipt time in seconds from Unix epoch
    #[serde(default, alias = "timestamp")]
    pub received_at: Option<i64>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default, alias = "id")]
    pub dedupe_id: Option<i64>,
    #[serde(default)]
    pub to: Option<i64>,
}

impl TryFrom<RawEnvelope> for InboundEvent {
    type Error = TrackerError;

    fn try_from(raw: RawEnvelope) -> Result<Self, Self::Error> {
        let kind = raw
            .kind
            .ok_or_else(|| TrackerError::validation("missing kind"))?;
        let source = raw
            .source_id
            .ok_or_else(|| TrackerError::validation("missing source_id"))?;
        let received_at = raw
            .received_at
            .ok_or_else(|| TrackerError::validation("missing received_at"))?;
        let payload = raw
            .payload
            .ok_or_else(|| TrackerError::validation("missing payload"))?;

        let source = HardwareNumber::try_from(source)?;
        let received_at = DateTime::from_timestamp(received_at, 0).ok_or_else(|| {
            TrackerError::validation(format!("received_at out of range: {received_at}"))
        })?;

        let payload = match kind.as_str() {
            "identity" | "nodeinfo" => EventPayload::Identity(parse_payload(&kind, payload)?),
            "position" => {
                let raw: RawPosition = parse_payload(&kind, payload)?;
                EventPayload::Position(raw.into_fix()?)
            }
            "telemetry" => EventPayload::Telemetry(parse_payload(&kind, payload)?),
            "text" => EventPayload::Text(parse_payload(&kind, payload)?),
            _ => return Err(TrackerError::UnknownEventKind(kind)),
        };

        Ok(Self {
            source,
            received_at,
            dedupe_id: raw.dedupe_id,
            to: raw.to.and_then(|to| u32::try_from(to).ok()),
            payload,
        })
    }
}

fn parse_payload<T>(kind: &str, value: serde_json::Value) -> Result<T, TrackerError>
where
    T: serde::de::DeserializeOwned,
{
    serde_json::from_value(value)
        .map_err(|e| TrackerError::validation(format!("malformed {kind} payload: {e}")))
}

/// Position payload in either fixed-point or floating encoding
#[derive(Debug, Clone, Default, Deserialize)]
struct RawPosition {
    /// Latitude in 1e-7 degrees
    latitude_i: Option<i64>,
    /// Longitude in 1e-7 degrees
    longitude_i: Option<i64>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    altitude: Option<f64>,
    ground_speed: Option<f64>,
    ground_track: Option<FixedPoint>,
    /// Planned time in seconds from Unix epoch
    planned_at: Option<i64>,
}

/// Integer values are fixed-point encoded, floats are plain degrees
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(untagged)]
enum FixedPoint {
    Integer(i64),
    Float(f64),
}

impl FixedPoint {
    fn scaled(self, scale: f64) -> f64 {
        match self {
            FixedPoint::Integer(v) => v as f64 / scale,
            FixedPoint::Float(v) => v,
        }
    }
}

const DEGREE_SCALE: f64 = 1e7;
const TRACK_SCALE: f64 = 1e5;

impl RawPosition {
    fn into_fix(self) -> Result<PositionFix, TrackerError> {
        let latitude = self
            .latitude_i
            .map(|v| v as f64 / DEGREE_SCALE)
            .or(self.latitude)
            .ok_or_else(|| TrackerError::validation("position without latitude"))?;
        let longitude = self
            .longitude_i
            .map(|v| v as f64 / DEGREE_SCALE)
            .or(self.longitude)
            .ok_or_else(|| TrackerError::validation("position without longitude"))?;

        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(TrackerError::validation("position is not finite"));
        }

        let planned_at = match self.planned_at {
            Some(secs) => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
                TrackerError::validation(format!("planned_at out of range: {secs}"))
            })?),
            None => None,
        };

        Ok(PositionFix {
            latitude,
            longitude,
            altitude: self.altitude,
            ground_speed: self.ground_speed,
            ground_track: self.ground_track.map(|t| t.scaled(TRACK_SCALE)),
            planned_at,
        })
    }
}

/// Remove control characters from user supplied strings
pub fn strip_control(s: &str) -> String {
    s.chars().filter(|c| !c.is_control()).collect()
}

/// Like [`strip_control`] but keeps line breaks
pub fn strip_control_keep_newlines(s: &str) -> String {
    s.chars().filter(|&c| c == '\n' || !c.is_control()).collect()
}

/// Custom deserializers
mod serde_helpers {
    use super::{strip_control, strip_control_keep_newlines};
    use serde::{self, Deserialize, Deserializer};

    pub fn deserialize_clean_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: Option<String> = Option::deserialize(deserializer)?;
        Ok(s.map(|s| strip_control(&s).trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    pub fn deserialize_clean_text<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(strip_control_keep_newlines(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hardware_number_bounds() {
        assert!(HardwareNumber::try_from(0i64).is_err());
        assert!(HardwareNumber::try_from(-1i64).is_err());
        assert!(HardwareNumber::try_from(u32::MAX as i64).is_err());
        assert!(HardwareNumber::try_from(1i64 << 33).is_err());
        assert_eq!(HardwareNumber::try_from(12345i64).unwrap().value(), 12345);
    }

    #[test]
    fn test_hardware_number_from_node_id() {
        let n = HardwareNumber::try_from("!a1b2c3d4").unwrap();
        assert_eq!(n.value(), 0xa1b2c3d4);
        assert_eq!(n.node_id(), "!a1b2c3d4");
        assert_eq!(HardwareNumber::try_from("42").unwrap().value(), 42);
        assert!(HardwareNumber::try_from("!zz").is_err());
    }

    #[test]
    fn test_hardware_number_serde_checks_bounds() {
        let n: HardwareNumber = serde_json::from_str("12345").unwrap();
        assert_eq!(n.value(), 12345);
        assert_eq!(serde_json::to_string(&n).unwrap(), "12345");

        assert!(serde_json::from_str::<HardwareNumber>("0").is_err());
        assert!(serde_json::from_str::<HardwareNumber>("4294967295").is_err());
        assert!(serde_json::from_str::<HardwareNumber>("-7").is_err());
    }

    #[test]
    fn test_station_type_round_trip_names() {
        for name in ["infrastructure", "active", "ignore", "planner", "rover"] {
            assert_eq!(StationType::from(name).as_str(), name);
        }
        assert!(StationType::Infrastructure.is_excluded());
        assert!(StationType::Ignore.is_excluded());
        assert!(!StationType::Active.is_excluded());
    }

    #[test]
    fn parse_nodeinfo() {
        let s = r#"{
            "type": "nodeinfo",
            "from": 12345,
            "timestamp": 1715194060,
            "id": 987,
            "payload": {
                "id": "!00003039",
                "longname": "Rover\u0007 One ",
                "shortname": "R1",
                "hardware": 4
            }
        }"#;
        let event = InboundEvent::from_json(s.as_bytes()).unwrap();

        assert_eq!(event.source.value(), 12345);
        assert_eq!(event.received_at.timestamp(), 1715194060);
        assert_eq!(event.dedupe_id, Some(987));
        assert_eq!(
            event.payload,
            EventPayload::Identity(IdentityPayload {
                id: Some("!00003039".to_string()),
                longname: Some("Rover One".to_string()),
                shortname: Some("R1".to_string()),
                hardware: Some(4),
            })
        );
    }

    #[test]
    fn parse_fixed_point_position() {
        let s = r#"{
            "kind": "position",
            "source_id": 12345,
            "received_at": 1715194060,
            "payload": {
                "latitude_i": 384063720,
                "longitude_i": -1107915420,
                "altitude": 1359,
                "ground_track": 9000000
            }
        }"#;
        let event = InboundEvent::from_json(s.as_bytes()).unwrap();
        let EventPayload::Position(fix) = event.payload else {
            panic!("expected position");
        };

        assert!((fix.latitude - 38.406372).abs() < 1e-9);
        assert!((fix.longitude - -110.791542).abs() < 1e-9);
        assert_eq!(fix.altitude, Some(1359.0));
        assert_eq!(fix.ground_track, Some(90.0));
        assert_eq!(fix.planned_at, None);
    }

    #[test]
    fn parse_float_position_with_plan() {
        let s = r#"{
            "kind": "position",
            "source_id": 12345,
            "received_at": 1715194060,
            "payload": {
                "latitude": 38.5,
                "longitude": -110.75,
                "ground_track": 45.5,
                "planned_at": 1715200000
            }
        }"#;
        let event = InboundEvent::from_json(s.as_bytes()).unwrap();
        let EventPayload::Position(fix) = event.payload else {
            panic!("expected position");
        };

        assert_eq!(fix.latitude, 38.5);
        assert_eq!(fix.ground_track, Some(45.5));
        assert_eq!(fix.planned_at.unwrap().timestamp(), 1715200000);
    }

    #[test]
    fn reject_position_without_coordinates() {
        let s = r#"{"kind":"position","source_id":1,"received_at":1,"payload":{"altitude":3}}"#;
        let err = InboundEvent::from_json(s.as_bytes()).unwrap_err();
        assert!(matches!(err, TrackerError::Validation(_)));
    }

    #[test]
    fn reject_missing_envelope_fields() {
        for s in [
            r#"{"source_id":1,"received_at":1,"payload":{}}"#,
            r#"{"kind":"text","received_at":1,"payload":{"text":"x"}}"#,
            r#"{"kind":"text","source_id":1,"payload":{"text":"x"}}"#,
            r#"{"kind":"text","source_id":1,"received_at":1}"#,
        ] {
            let err = InboundEvent::from_json(s.as_bytes()).unwrap_err();
            assert!(matches!(err, TrackerError::Validation(_)), "{s}: {err:?}");
        }
    }

    #[test]
    fn reject_unknown_kind() {
        let s = r#"{"kind":"neighborinfo","source_id":1,"received_at":1,"payload":{}}"#;
        let err = InboundEvent::from_json(s.as_bytes()).unwrap_err();
        assert!(matches!(err, TrackerError::UnknownEventKind(k) if k == "neighborinfo"));
    }

    #[test]
    fn parse_text_strips_control_characters() {
        let s = r#"{
            "type": "text",
            "from": 12345,
            "to": 4294967295,
            "timestamp": 1715194060,
            "id": 55,
            "payload": {"text": "back\u0000 at\nhab"}
        }"#;
        let event = InboundEvent::from_json(s.as_bytes()).unwrap();

        assert!(event.is_broadcast());
        assert_eq!(
            event.payload,
            EventPayload::Text(TextPayload {
                text: "back at\nhab".to_string()
            })
        );
    }

    #[test]
    fn parse_telemetry_with_missing_fields() {
        let s = r#"{
            "type": "telemetry",
            "from": 12345,
            "timestamp": 1715194060,
            "payload": {"battery_level": 87, "temperature": 21.5, "wind_speed": 3.2}
        }"#;
        let event = InboundEvent::from_json(s.as_bytes()).unwrap();
        let EventPayload::Telemetry(readings) = event.payload else {
            panic!("expected telemetry");
        };

        assert_eq!(readings.battery_level, Some(87.0));
        assert_eq!(readings.voltage, None);
        assert!(readings.has_wind());
    }
}
