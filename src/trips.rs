//! Excursion ("EVA") detection and statistics.
//!
//! A trip is a run of consecutive position samples outside the inner
//! geofence, bounded by inside samples or by the ends of the data. Runs of a
//! single sample are noise and are discarded.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::geofence::{distance_km, Geofence};
use crate::models::{HardwareNumber, PositionSample};

/// Fewest samples a run needs to count as a trip
pub const MIN_TRIP_SAMPLES: usize = 2;

/// Split time-ordered samples into outside-fence runs of at least
/// [`MIN_TRIP_SAMPLES`]. Single left-to-right pass.
pub fn segment_trips<'a>(samples: &'a [PositionSample], fence: &Geofence) -> Vec<&'a [PositionSample]> {
    let mut trips = Vec::new();
    let mut run_start: Option<usize> = None;

    for (i, sample) in samples.iter().enumerate() {
        let outside = fence.outside(sample.fix.latitude, sample.fix.longitude);
        match (outside, run_start) {
            (true, None) => run_start = Some(i),
            (true, Some(_)) => {}
            (false, Some(start)) => {
                if i - start >= MIN_TRIP_SAMPLES {
                    trips.push(&samples[start..i]);
                }
                run_start = None;
            }
            (false, None) => {}
        }
    }

    if let Some(start) = run_start {
        if samples.len() - start >= MIN_TRIP_SAMPLES {
            trips.push(&samples[start..]);
        }
    }

    trips
}

/// Sum of great-circle distances between consecutive samples
pub fn path_distance_km(samples: &[PositionSample]) -> f64 {
    samples
        .windows(2)
        .map(|pair| distance_km(pair[0].coordinates(), pair[1].coordinates()))
        .sum()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trip {
    pub station: HardwareNumber,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub samples: usize,
    pub distance_km: f64,
}

impl Trip {
    /// None for runs shorter than [`MIN_TRIP_SAMPLES`]
    pub fn from_run(run: &[PositionSample]) -> Option<Self> {
        if run.len() < MIN_TRIP_SAMPLES {
            return None;
        }
        let first = run.first()?;
        let last = run.last()?;
        Some(Self {
            station: first.station,
            started_at: first.recorded_at,
            ended_at: last.recorded_at,
            samples: run.len(),
            distance_km: path_distance_km(run),
        })
    }
}

/// All trips of one station's ordered history
pub fn detect_trips(samples: &[PositionSample], fence: &Geofence) -> Vec<Trip> {
    segment_trips(samples, fence)
        .into_iter()
        .filter_map(Trip::from_run)
        .collect()
}

/// Calendar month bucket, displayed as `YYYY-MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

impl Serialize for YearMonth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TripAggregate {
    pub count: usize,
    pub total_distance_km: f64,
}

impl TripAggregate {
    pub fn add(&mut self, distance_km: f64) {
        self.count += 1;
        self.total_distance_km += distance_km;
    }

    pub fn average_distance_km(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_distance_km / self.count as f64
        }
    }
}

impl Serialize for TripAggregate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("TripAggregate", 3)?;
        s.serialize_field("count", &self.count)?;
        s.serialize_field("total_distance_km", &self.total_distance_km)?;
        s.serialize_field("average_distance_km", &self.average_distance_km())?;
        s.end()
    }
}

/// Trip counts and distances, bucketed by the local start time of each trip
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TripStatistics {
    pub total: TripAggregate,
    pub by_year: BTreeMap<i32, TripAggregate>,
    pub by_month: BTreeMap<YearMonth, TripAggregate>,
}

impl TripStatistics {
    pub fn record(&mut self, trip: &Trip, time_zone: Tz) {
        let local = trip.started_at.with_timezone(&time_zone);
        let month = YearMonth {
            year: local.year(),
            month: local.month(),
        };

        self.total.add(trip.distance_km);
        self.by_year
            .entry(month.year)
            .or_default()
            .add(trip.distance_km);
        self.by_month.entry(month).or_default().add(trip.distance_km);
    }

    pub fn record_all<'a>(&mut self, trips: impl IntoIterator<Item = &'a Trip>, time_zone: Tz) {
        for trip in trips {
            self.record(trip, time_zone);
        }
    }
}
