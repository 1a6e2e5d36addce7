//! Broadcast reachability.
//!
//! Field stations outside the inner perimeter hear gateway broadcasts but
//! rarely confirm them. For each broadcast a companion "heard" text is
//! recorded on every station that was in that zone at its last durable fix.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::geofence::{Campus, Coordinates};
use crate::models::{HardwareNumber, StationType};

/// Outbound text sent to every node
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    /// Message identifier assigned by the gateway
    pub id: i64,
    pub gateway: HardwareNumber,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Broadcast {
    pub fn companion_text(&self) -> String {
        format!("heard: {}", self.text)
    }

    /// Unique per broadcast and recipient, so retries are idempotent
    pub fn companion_key(&self, recipient: HardwareNumber) -> String {
        format!("{}:{}", self.id, recipient)
    }
}

/// Station considered for a broadcast
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub number: HardwareNumber,
    pub station_type: StationType,
    pub last_position_id: i64,
    pub last_position: Coordinates,
}

/// Whether a station at `position` would only hear the broadcast
pub fn is_reachable(station_type: &StationType, position: Coordinates, campus: &Campus) -> bool {
    if station_type.is_excluded() {
        return false;
    }
    let Some(inner) = campus.inner.as_ref() else {
        return false;
    };
    inner.outside(position.lat, position.lon)
        && campus
            .outer
            .as_ref()
            .map_or(true, |outer| outer.contains(position.lat, position.lon))
}

/// Candidates that get a companion text, the gateway itself excluded
pub fn recipients<'a>(
    broadcast: &Broadcast,
    candidates: &'a [Candidate],
    campus: &Campus,
) -> Vec<&'a Candidate> {
    candidates
        .iter()
        .filter(|c| c.number != broadcast.gateway)
        .filter(|c| is_reachable(&c.station_type, c.last_position, campus))
        .collect()
}

/// Result of fanning out one broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Recipients that already had this broadcast
    pub duplicates: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::Geofence;

    fn campus() -> Campus {
        Campus::new("Test Campus", chrono_tz::America::Denver)
            .with_inner(Geofence::from_corners(39.9, -105.1, 40.1, -104.9).unwrap())
            .with_outer(Geofence::from_corners(39.0, -106.5, 41.5, -104.0).unwrap())
    }

    fn candidate(number: i64, station_type: StationType, lat: f64, lon: f64) -> Candidate {
        Candidate {
            number: HardwareNumber::try_from(number).unwrap(),
            station_type,
            last_position_id: number,
            last_position: Coordinates::new(lat, lon),
        }
    }

    fn broadcast() -> Broadcast {
        Broadcast {
            id: 900,
            gateway: HardwareNumber::try_from(1i64).unwrap(),
            text: "return to hab".to_string(),
            at: DateTime::from_timestamp(1_715_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn test_companion_record() {
        let b = broadcast();
        let to = HardwareNumber::try_from(42i64).unwrap();
        assert_eq!(b.companion_text(), "heard: return to hab");
        assert_eq!(b.companion_key(to), "900:42");
    }

    #[test]
    fn test_reachability() {
        let campus = campus();
        // between the fences
        assert!(is_reachable(&StationType::Active, Coordinates::new(41.0, -106.0), &campus));
        // inside the inner fence
        assert!(!is_reachable(&StationType::Active, Coordinates::new(40.0, -105.0), &campus));
        // beyond the outer fence
        assert!(!is_reachable(&StationType::Active, Coordinates::new(45.0, -106.0), &campus));
        assert!(!is_reachable(
            &StationType::Infrastructure,
            Coordinates::new(41.0, -106.0),
            &campus
        ));
        assert!(!is_reachable(&StationType::Ignore, Coordinates::new(41.0, -106.0), &campus));
    }

    #[test]
    fn test_reachability_without_outer_fence() {
        let mut campus = campus();
        campus.outer = None;
        assert!(is_reachable(&StationType::Active, Coordinates::new(45.0, -106.0), &campus));

        campus.inner = None;
        assert!(!is_reachable(&StationType::Active, Coordinates::new(45.0, -106.0), &campus));
    }

    #[test]
    fn test_recipients_skip_gateway() {
        let candidates = vec![
            candidate(1, StationType::Active, 41.0, -106.0),
            candidate(2, StationType::Active, 41.0, -106.0),
            candidate(3, StationType::Active, 40.0, -105.0),
            candidate(4, StationType::Infrastructure, 41.0, -106.0),
        ];
        let chosen = recipients(&broadcast(), &candidates, &campus());
        assert_eq!(
            chosen.iter().map(|c| c.number.value()).collect::<Vec<_>>(),
            vec![2]
        );
    }
}
