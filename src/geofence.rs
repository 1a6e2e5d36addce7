//! Campus perimeters and distance helpers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::errors::TrackerError;

/// Mean Earth radius used for great-circle distances, in kilometres
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// A latitude/longitude pair in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Origin fixes are what receivers report before they have a solution.
    pub fn is_null_island(&self) -> bool {
        self.lat == 0.0 && self.lon == 0.0
    }
}

/// Haversine great-circle distance in kilometres
pub fn distance_km(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.lon - a.lon).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * h.sqrt().min(1.0).asin()
}

/// Axis-aligned bounding box. Edges count as inside.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    pub lat_min: f64,
    pub lon_min: f64,
    pub lat_max: f64,
    pub lon_max: f64,
}

impl Geofence {
    /// Build a fence from two opposite corners given in any order
    pub fn from_corners(
        latitude1: f64,
        longitude1: f64,
        latitude2: f64,
        longitude2: f64,
    ) -> Result<Self, TrackerError> {
        if ![latitude1, longitude1, latitude2, longitude2]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(TrackerError::configuration(
                "Geofence corners must be finite numbers",
            ));
        }

        Ok(Self {
            lat_min: latitude1.min(latitude2),
            lon_min: longitude1.min(longitude2),
            lat_max: latitude1.max(latitude2),
            lon_max: longitude1.max(longitude2),
        })
    }

    pub fn outside(&self, lat: f64, lon: f64) -> bool {
        lat < self.lat_min || lat > self.lat_max || lon < self.lon_min || lon > self.lon_max
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        !self.outside(lat, lon)
    }

    pub fn center(&self) -> Coordinates {
        Coordinates::new(
            (self.lat_min + self.lat_max) / 2.0,
            (self.lon_min + self.lon_max) / 2.0,
        )
    }
}

/// The active deployment: its local time zone and perimeters.
#[derive(Debug, Clone, PartialEq)]
pub struct Campus {
    pub name: String,
    pub time_zone: Tz,
    /// Safety perimeter; positions outside it count as excursions
    pub inner: Option<Geofence>,
    /// Area of interest bounding broadcast reachability
    pub outer: Option<Geofence>,
}

impl Campus {
    pub fn new(name: impl Into<String>, time_zone: Tz) -> Self {
        Self {
            name: name.into(),
            time_zone,
            inner: None,
            outer: None,
        }
    }

    pub fn with_inner(mut self, fence: Geofence) -> Self {
        self.inner = Some(fence);
        self
    }

    pub fn with_outer(mut self, fence: Geofence) -> Self {
        self.outer = Some(fence);
        self
    }

    /// Some(true) when outside the inner fence, None without a fence.
    pub fn outside_inner(&self, position: Coordinates) -> Option<bool> {
        self.inner
            .as_ref()
            .map(|fence| fence.outside(position.lat, position.lon))
    }

    pub fn local_time(&self, at: DateTime<Utc>) -> NaiveDateTime {
        at.with_timezone(&self.time_zone).naive_local()
    }

    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        self.local_time(at).date()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn inner() -> Geofence {
        Geofence::from_corners(39.9, -105.1, 40.1, -104.9).unwrap()
    }

    #[test]
    fn test_inside_and_outside() {
        let fence = inner();
        assert!(fence.contains(40.0, -105.0));
        assert!(!fence.outside(40.0, -105.0));
        assert!(fence.outside(41.0, -106.0));
        assert!(!fence.contains(41.0, -106.0));
    }

    #[test]
    fn test_edges_are_inside() {
        let fence = inner();
        assert!(fence.contains(39.9, -105.1));
        assert!(fence.contains(40.1, -104.9));
        assert!(fence.contains(40.1, -105.0));
        assert!(fence.outside(40.100001, -105.0));
        assert!(fence.outside(40.0, -104.899999));
    }

    #[test]
    fn test_corners_are_normalized() {
        let fence = Geofence::from_corners(40.1, -104.9, 39.9, -105.1).unwrap();
        assert_eq!(fence, inner());
    }

    #[test]
    fn test_non_finite_corner_rejected() {
        assert!(Geofence::from_corners(f64::NAN, 0.0, 1.0, 1.0).is_err());
        assert!(Geofence::from_corners(0.0, f64::INFINITY, 1.0, 1.0).is_err());
    }

    #[test]
    fn test_distance_symmetric_and_zero() {
        let a = Coordinates::new(38.406372, -110.791542);
        let b = Coordinates::new(38.5, -110.7);
        assert_eq!(distance_km(a, b), distance_km(b, a));
        assert_eq!(distance_km(a, a), 0.0);
    }

    #[test]
    fn test_distance_one_degree_of_longitude_at_equator() {
        let d = distance_km(Coordinates::new(0.0, 0.0), Coordinates::new(0.0, 1.0));
        assert!((d - 111.195).abs() < 0.01, "got {d}");
    }

    #[test]
    fn test_campus_local_date() {
        let campus = Campus::new("Test Campus", chrono_tz::America::Denver);
        // 03:30 UTC is the previous evening in Denver
        let at = Utc.with_ymd_and_hms(2024, 5, 9, 3, 30, 0).unwrap();
        assert_eq!(
            campus.local_date(at),
            NaiveDate::from_ymd_opt(2024, 5, 8).unwrap()
        );
    }

    #[test]
    fn test_outside_inner_without_fence() {
        let campus = Campus::new("Test Campus", chrono_tz::UTC);
        assert_eq!(campus.outside_inner(Coordinates::new(1.0, 1.0)), None);

        let campus = campus.with_inner(inner());
        assert_eq!(
            campus.outside_inner(Coordinates::new(41.0, -106.0)),
            Some(true)
        );
    }
}
