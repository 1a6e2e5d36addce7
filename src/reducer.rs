//! Station state reducer.
//!
//! [`apply`] folds one inbound event into the current state of its station
//! and describes the resulting writes. It performs no I/O: the database layer
//! loads a [`StationState`], applies the event, and persists the returned
//! [`Applied`] inside one transaction.

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use tracing::{debug, trace};

use crate::features::StationFeature;
use crate::geofence::{Campus, Coordinates};
use crate::models::{
    strip_control, strip_control_keep_newlines, EventPayload, HardwareClass, IdentityPayload,
    InboundEvent, PositionFix, Station, TelemetryReadings,
};

/// Default length of the after-midnight window during which in-fence
/// positions are stored anyway
pub const DEFAULT_DAILY_FIX_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Rules deciding which position samples become durable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistencePolicy {
    pub daily_fix_window: Duration,
}

impl Default for PersistencePolicy {
    fn default() -> Self {
        Self {
            daily_fix_window: DEFAULT_DAILY_FIX_WINDOW,
        }
    }
}

/// Current state of one station, as loaded before an event is applied
#[derive(Debug, Clone, Default)]
pub struct StationState {
    pub station: Option<Station>,
    /// Coordinates of the station's last durable position
    pub last_position: Option<Coordinates>,
    /// Hardware class named by an identity event, resolved from the lookup table
    pub hardware: Option<HardwareClass>,
}

/// Why a position sample was stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistReason {
    /// No inner geofence is configured, nothing can be gated
    NoFence,
    OutsideFence,
    FirstFix,
    /// Previous durable fix was outside, this one is back inside
    Returning,
    DailyFix,
    /// Waypoint of a pre-planned route
    Planned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    UnknownStation,
    /// Fix at (0, 0), reported by receivers without a solution
    NullIsland,
}

/// Result of processing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    StationCreated,
    StationUpdated,
    PositionStored(PersistReason),
    /// Position only reflected in the feature document
    PositionTransient,
    TelemetryStored,
    TextStored,
    /// Text with an already known de-duplication key
    Duplicate,
    Dropped(DropReason),
}

/// Sample to insert alongside the station update
#[derive(Debug, Clone, PartialEq)]
pub enum SampleWrite {
    /// Stored and becomes the station's last position
    Position(PositionFix),
    /// References the station's last position
    Telemetry(TelemetryReadings),
    /// References the station's last position
    Text {
        text: String,
        message_key: Option<String>,
        destination: Option<u32>,
    },
}

/// Station after the event, plus the sample to store
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub station: Station,
    pub created: bool,
    pub write: Option<SampleWrite>,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reduction {
    Apply(Box<Applied>),
    Drop(DropReason),
}

/// Fold `event` into `state`.
///
/// `now` is the processing time stamped on the station; the event's own
/// clock is only used for sample times.
pub fn apply(
    state: StationState,
    event: &InboundEvent,
    campus: &Campus,
    policy: &PersistencePolicy,
    now: DateTime<Utc>,
) -> Reduction {
    let StationState {
        station,
        last_position,
        hardware,
    } = state;

    let (mut station, created) = match (&event.payload, station) {
        (_, Some(station)) => (station, false),
        (EventPayload::Identity(identity), None) => (new_station(event, identity, hardware), true),
        (_, None) => {
            debug!(
                "Dropping {} event from unknown station {}",
                event.payload.kind(),
                event.source
            );
            return Reduction::Drop(DropReason::UnknownStation);
        }
    };

    let mut feature = station
        .features
        .take()
        .unwrap_or_else(|| StationFeature::skeleton(&station));

    let (write, outcome) = match &event.payload {
        EventPayload::Identity(identity) => {
            if !created {
                update_identity(&mut station, identity);
            }
            feature.apply_identity(&station);
            let outcome = if created {
                Outcome::StationCreated
            } else {
                Outcome::StationUpdated
            };
            (None, outcome)
        }
        EventPayload::Position(fix) => {
            if fix.coordinates().is_null_island() {
                debug!("Dropping null island fix from station {}", station.number);
                return Reduction::Drop(DropReason::NullIsland);
            }
            feature.apply_position(fix, event.received_at);
            match persistence_reason(fix, last_position, campus, event.received_at, policy) {
                Some(reason) => {
                    trace!("Storing fix from {}: {:?}", station.number, reason);
                    (
                        Some(SampleWrite::Position(fix.clone())),
                        Outcome::PositionStored(reason),
                    )
                }
                None => (None, Outcome::PositionTransient),
            }
        }
        EventPayload::Telemetry(readings) => {
            feature.apply_telemetry(readings, event.received_at);
            (
                Some(SampleWrite::Telemetry(readings.clone())),
                Outcome::TelemetryStored,
            )
        }
        EventPayload::Text(text) => {
            let text = strip_control_keep_newlines(&text.text);
            feature.push_text(&text, event.received_at);
            (
                Some(SampleWrite::Text {
                    text,
                    message_key: event.dedupe_id.map(|id| id.to_string()),
                    destination: event.to,
                }),
                Outcome::TextStored,
            )
        }
    };

    station.features = Some(feature);
    station.updated_at = now;

    Reduction::Apply(Box::new(Applied {
        station,
        created,
        write,
        outcome,
    }))
}

/// Decide whether a fix is stored durably.
///
/// Planned waypoints and fixes outside the inner fence are always kept.
/// Inside it, only the first fix ever, the first fix after returning and
/// fixes in the early local morning window are kept.
pub fn persistence_reason(
    fix: &PositionFix,
    previous: Option<Coordinates>,
    campus: &Campus,
    recorded_at: DateTime<Utc>,
    policy: &PersistencePolicy,
) -> Option<PersistReason> {
    if fix.planned_at.is_some() {
        return Some(PersistReason::Planned);
    }
    let Some(fence) = campus.inner.as_ref() else {
        return Some(PersistReason::NoFence);
    };

    if fence.outside(fix.latitude, fix.longitude) {
        return Some(PersistReason::OutsideFence);
    }

    match previous {
        None => return Some(PersistReason::FirstFix),
        Some(prev) if fence.outside(prev.lat, prev.lon) => return Some(PersistReason::Returning),
        Some(_) => {}
    }

    let since_midnight = campus.local_time(recorded_at).num_seconds_from_midnight() as u64;
    (since_midnight < policy.daily_fix_window.as_secs()).then_some(PersistReason::DailyFix)
}

fn new_station(
    event: &InboundEvent,
    identity: &IdentityPayload,
    hardware: Option<HardwareClass>,
) -> Station {
    let node = identity
        .id
        .clone()
        .unwrap_or_else(|| event.source.node_id());
    let name = clean_name(identity.longname.as_deref()).unwrap_or_else(|| node.clone());
    let short_name = clean_name(identity.shortname.as_deref())
        .unwrap_or_else(|| placeholder_short_name(&node));

    Station {
        number: event.source,
        node,
        name,
        short_name,
        station_type: hardware
            .as_ref()
            .map(|h| h.station_type.clone())
            .unwrap_or_default(),
        hardware_type: hardware.map(|h| h.hardware_type).or(identity.hardware),
        last_position_id: None,
        features: None,
        updated_at: event.received_at,
    }
}

fn update_identity(station: &mut Station, identity: &IdentityPayload) {
    if let Some(name) = clean_name(identity.longname.as_deref()) {
        station.name = name;
    }
    if let Some(short_name) = clean_name(identity.shortname.as_deref()) {
        station.short_name = short_name;
    }
}

/// Blank names count as missing
fn clean_name(name: Option<&str>) -> Option<String> {
    name.map(|n| strip_control(n).trim().to_string())
        .filter(|n| !n.is_empty())
}

/// Radios show the last four hex digits when no short name is set
fn placeholder_short_name(node: &str) -> String {
    let skip = node.chars().count().saturating_sub(4);
    node.chars().skip(skip).collect()
}
