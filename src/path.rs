//! Path reconstruction.
//!
//! Observed stations are answered from their durable samples of one local
//! day, each position paired with the telemetry sample closest in time.
//! Planner stations are answered by interpolating along planned waypoints.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::geofence::Coordinates;
use crate::models::{
    HardwareNumber, PositionSample, TelemetryReadings, TelemetrySample, TextSample,
};

/// Position with the telemetry captured closest to it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathPoint {
    pub id: i64,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ground_track: Option<f64>,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<TelemetryReadings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry_at: Option<DateTime<Utc>>,
}

impl PathPoint {
    fn new(position: &PositionSample, telemetry: Option<&TelemetrySample>) -> Self {
        Self {
            id: position.id,
            latitude: position.fix.latitude,
            longitude: position.fix.longitude,
            altitude: position.fix.altitude,
            ground_speed: position.fix.ground_speed,
            ground_track: position.fix.ground_track,
            recorded_at: position.recorded_at,
            telemetry: telemetry.map(|t| t.readings.clone()),
            telemetry_at: telemetry.map(|t| t.recorded_at),
        }
    }
}

/// Text message pinned to the position it was sent from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Waypoint {
    pub text: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

impl Waypoint {
    pub fn new(text: &TextSample, position: &PositionSample) -> Self {
        Self {
            text: text.text.clone(),
            latitude: position.fix.latitude,
            longitude: position.fix.longitude,
            altitude: position.fix.altitude,
            recorded_at: text.recorded_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyPath {
    pub station: HardwareNumber,
    pub date: NaiveDate,
    pub points: Vec<PathPoint>,
    pub waypoints: Vec<Waypoint>,
}

/// Which day of data a path query asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySelector {
    /// Most recent day with data
    Latest,
    /// Most recent day with data strictly before the date
    Before(NaiveDate),
    /// Earliest day with data strictly after the date
    After(NaiveDate),
}

/// Keep only wind-bearing samples when the day has any
pub fn prefer_wind(telemetry: Vec<TelemetrySample>) -> Vec<TelemetrySample> {
    if telemetry.iter().any(|t| t.readings.has_wind()) {
        telemetry
            .into_iter()
            .filter(|t| t.readings.has_wind())
            .collect()
    } else {
        telemetry
    }
}

/// Index of the sample closest in time to `at`; ties go to the earlier one.
///
/// `telemetry` must be ordered by `recorded_at`.
pub fn nearest_telemetry(telemetry: &[TelemetrySample], at: DateTime<Utc>) -> Option<usize> {
    let split = telemetry.partition_point(|t| t.recorded_at <= at);

    // First of any run of samples sharing the latest timestamp not after `at`
    let before = split.checked_sub(1).map(|mut i| {
        while i > 0 && telemetry[i - 1].recorded_at == telemetry[i].recorded_at {
            i -= 1;
        }
        i
    });
    let after = (split < telemetry.len()).then_some(split);

    match (before, after) {
        (Some(b), Some(a)) => {
            let db = (at - telemetry[b].recorded_at).num_milliseconds().abs();
            let da = (telemetry[a].recorded_at - at).num_milliseconds().abs();
            Some(if da < db { a } else { b })
        }
        (b, a) => b.or(a),
    }
}

/// Pair every position with its closest telemetry sample.
///
/// Both inputs must be ordered by `recorded_at`.
pub fn attach_telemetry(
    positions: &[PositionSample],
    telemetry: &[TelemetrySample],
) -> Vec<PathPoint> {
    positions
        .iter()
        .map(|p| {
            let nearest = nearest_telemetry(telemetry, p.recorded_at).map(|i| &telemetry[i]);
            PathPoint::new(p, nearest)
        })
        .collect()
}

/// Waypoints for texts that reference one of the given positions
pub fn waypoints(texts: &[TextSample], positions: &[PositionSample]) -> Vec<Waypoint> {
    texts
        .iter()
        .filter_map(|text| {
            let position_id = text.position_id?;
            positions
                .iter()
                .find(|p| p.id == position_id)
                .map(|p| Waypoint::new(text, p))
        })
        .collect()
}

/// Waypoint of a pre-planned route
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannedPoint {
    pub at: DateTime<Utc>,
    pub position: Coordinates,
}

impl PlannedPoint {
    /// None for samples without a planned time
    pub fn from_sample(sample: &PositionSample) -> Option<Self> {
        sample.fix.planned_at.map(|at| Self {
            at,
            position: sample.coordinates(),
        })
    }
}

/// Position along a planned route at `at`.
///
/// Before the first waypoint the first position is reported, after the last
/// the last one; in between the position is interpolated linearly between
/// the bracketing waypoints. `route` must be ordered by time.
pub fn interpolate(route: &[PlannedPoint], at: DateTime<Utc>) -> Option<Coordinates> {
    let first = route.first()?;
    let last = route.last()?;
    if at < first.at {
        return Some(first.position);
    }
    if at >= last.at {
        return Some(last.position);
    }

    let next_index = route.partition_point(|p| p.at <= at);
    let prev = route[next_index - 1];
    let next = route[next_index];

    let span = (next.at - prev.at).num_milliseconds();
    let factor = if span == 0 {
        0.0
    } else {
        (at - prev.at).num_milliseconds() as f64 / span as f64
    };

    Some(Coordinates::new(
        prev.position.lat + factor * (next.position.lat - prev.position.lat),
        prev.position.lon + factor * (next.position.lon - prev.position.lon),
    ))
}

/// How a [`Location`] was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    /// Latest durable sample at or before the requested time
    Observed,
    /// Planned route, interpolated or clamped to its ends
    Planned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Location {
    pub station: HardwareNumber,
    pub at: DateTime<Utc>,
    pub coordinates: Coordinates,
    pub method: LocateMethod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PositionFix;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn station() -> HardwareNumber {
        HardwareNumber::try_from(12345i64).unwrap()
    }

    fn position(id: i64, secs: i64) -> PositionSample {
        PositionSample {
            id,
            station: station(),
            fix: PositionFix {
                latitude: 41.0,
                longitude: -106.0,
                ..Default::default()
            },
            recorded_at: at(secs),
            local_date: at(secs).date_naive(),
        }
    }

    fn telemetry(id: i64, secs: i64, wind: bool) -> TelemetrySample {
        TelemetrySample {
            id,
            station: station(),
            position_id: None,
            readings: TelemetryReadings {
                temperature: Some(id as f64),
                wind_speed: wind.then_some(2.0),
                ..Default::default()
            },
            recorded_at: at(secs),
            local_date: at(secs).date_naive(),
        }
    }

    #[test]
    fn test_nearest_telemetry() {
        let samples = [
            telemetry(1, 100, false),
            telemetry(2, 200, false),
            telemetry(3, 400, false),
        ];
        assert_eq!(nearest_telemetry(&samples, at(0)), Some(0));
        assert_eq!(nearest_telemetry(&samples, at(140)), Some(0));
        assert_eq!(nearest_telemetry(&samples, at(160)), Some(1));
        assert_eq!(nearest_telemetry(&samples, at(200)), Some(1));
        assert_eq!(nearest_telemetry(&samples, at(1000)), Some(2));
        assert_eq!(nearest_telemetry(&[], at(1000)), None);
    }

    #[test]
    fn test_nearest_telemetry_tie_prefers_earlier() {
        let samples = [telemetry(1, 100, false), telemetry(2, 200, false)];
        assert_eq!(nearest_telemetry(&samples, at(150)), Some(0));

        let duplicated = [
            telemetry(1, 100, false),
            telemetry(2, 100, false),
            telemetry(3, 300, false),
        ];
        assert_eq!(nearest_telemetry(&duplicated, at(120)), Some(0));
    }

    #[test]
    fn test_attach_telemetry() {
        let positions = [position(1, 90), position(2, 310)];
        let samples = [telemetry(10, 100, false), telemetry(11, 300, false)];
        let points = attach_telemetry(&positions, &samples);

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].telemetry_at, Some(at(100)));
        assert_eq!(points[1].telemetry.as_ref().unwrap().temperature, Some(11.0));
    }

    #[test]
    fn test_prefer_wind() {
        let mixed = vec![
            telemetry(1, 100, false),
            telemetry(2, 200, true),
            telemetry(3, 300, false),
        ];
        let kept = prefer_wind(mixed);
        assert_eq!(kept.iter().map(|t| t.id).collect::<Vec<_>>(), vec![2]);

        let calm = vec![telemetry(1, 100, false), telemetry(2, 200, false)];
        assert_eq!(prefer_wind(calm).len(), 2);
    }

    #[test]
    fn test_waypoints_need_known_position() {
        let positions = [position(1, 100)];
        let text = |position_id| TextSample {
            id: 1,
            station: station(),
            position_id,
            text: "sample site".to_string(),
            message_key: None,
            destination: None,
            recorded_at: at(120),
            local_date: at(120).date_naive(),
        };
        let texts = [text(Some(1)), text(None), text(Some(99))];
        let found = waypoints(&texts, &positions);

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].text, "sample site");
        assert_eq!(found[0].latitude, 41.0);
    }

    fn route() -> Vec<PlannedPoint> {
        vec![
            PlannedPoint {
                at: at(0),
                position: Coordinates::new(0.0, 0.0),
            },
            PlannedPoint {
                at: at(100),
                position: Coordinates::new(0.0, 10.0),
            },
        ]
    }

    #[test]
    fn test_interpolate_midpoint() {
        let c = interpolate(&route(), at(50)).unwrap();
        assert_eq!(c, Coordinates::new(0.0, 5.0));
    }

    #[test]
    fn test_interpolate_clamps_to_route_ends() {
        assert_eq!(interpolate(&route(), at(-10)), Some(Coordinates::new(0.0, 0.0)));
        assert_eq!(interpolate(&route(), at(200)), Some(Coordinates::new(0.0, 10.0)));
        assert_eq!(interpolate(&route(), at(100)), Some(Coordinates::new(0.0, 10.0)));
        assert_eq!(interpolate(&route(), at(0)), Some(Coordinates::new(0.0, 0.0)));
        assert_eq!(interpolate(&[], at(0)), None);
    }

    #[test]
    fn test_interpolate_between_later_waypoints() {
        let mut points = route();
        points.push(PlannedPoint {
            at: at(300),
            position: Coordinates::new(4.0, 10.0),
        });
        let c = interpolate(&points, at(250)).unwrap();
        assert_eq!(c, Coordinates::new(3.0, 10.0));
    }
}
