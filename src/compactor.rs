//! Redundant-sample selection.
//!
//! A station parked inside the fence may still leave several durable fixes
//! per day. Within each run of three or more consecutive inside samples only
//! the endpoints carry information; the interior members are candidates for
//! deletion.

use serde::Serialize;

use crate::geofence::Geofence;
use crate::models::PositionSample;

/// Runs shorter than this are left untouched
pub const MIN_COMPACTION_RUN: usize = 3;

/// Result of compacting one station-day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CompactionReport {
    pub deleted: usize,
    /// Candidates kept because something still references them
    pub skipped: usize,
}

/// Ids of interior samples of inside-fence runs of at least
/// [`MIN_COMPACTION_RUN`], in input order.
///
/// `samples` must be ordered by `recorded_at`. The caller still has to check
/// each candidate for references before deleting it.
pub fn redundant_samples(samples: &[PositionSample], fence: &Geofence) -> Vec<i64> {
    let mut candidates = Vec::new();
    let mut run_start: Option<usize> = None;

    for i in 0..=samples.len() {
        let inside = samples
            .get(i)
            .is_some_and(|s| fence.contains(s.fix.latitude, s.fix.longitude));

        match (inside, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= MIN_COMPACTION_RUN {
                    candidates.extend(samples[start + 1..i - 1].iter().map(|s| s.id));
                }
                run_start = None;
            }
            _ => {}
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{HardwareNumber, PositionFix};
    use chrono::DateTime;

    const INSIDE: (f64, f64) = (40.0, -105.0);
    const OUTSIDE: (f64, f64) = (41.0, -106.0);

    fn fence() -> Geofence {
        Geofence::from_corners(39.9, -105.1, 40.1, -104.9).unwrap()
    }

    fn samples(points: &[(f64, f64)]) -> Vec<PositionSample> {
        points
            .iter()
            .enumerate()
            .map(|(i, &(lat, lon))| {
                let recorded_at = DateTime::from_timestamp(1_715_000_000 + 60 * i as i64, 0).unwrap();
                PositionSample {
                    id: i as i64 + 1,
                    station: HardwareNumber::try_from(12345i64).unwrap(),
                    fix: PositionFix {
                        latitude: lat,
                        longitude: lon,
                        ..Default::default()
                    },
                    recorded_at,
                    local_date: recorded_at.date_naive(),
                }
            })
            .collect()
    }

    #[test]
    fn test_interior_of_long_run() {
        let data = samples(&[INSIDE, INSIDE, INSIDE, INSIDE, INSIDE]);
        assert_eq!(redundant_samples(&data, &fence()), vec![2, 3, 4]);
    }

    #[test]
    fn test_short_runs_untouched() {
        let data = samples(&[INSIDE, INSIDE, OUTSIDE, INSIDE]);
        assert!(redundant_samples(&data, &fence()).is_empty());
        assert!(redundant_samples(&[], &fence()).is_empty());
    }

    #[test]
    fn test_runs_split_by_excursions() {
        let data = samples(&[INSIDE, INSIDE, INSIDE, OUTSIDE, OUTSIDE, INSIDE, INSIDE, INSIDE, INSIDE]);
        assert_eq!(redundant_samples(&data, &fence()), vec![2, 7, 8]);
    }

    #[test]
    fn test_outside_samples_never_candidates() {
        let data = samples(&[OUTSIDE, OUTSIDE, OUTSIDE, OUTSIDE]);
        assert!(redundant_samples(&data, &fence()).is_empty());
    }

    #[test]
    fn test_selection_is_stable_after_removal() {
        let data = samples(&[INSIDE, INSIDE, INSIDE, INSIDE]);
        let removed = redundant_samples(&data, &fence());
        let remaining: Vec<_> = data
            .into_iter()
            .filter(|s| !removed.contains(&s.id))
            .collect();
        assert!(redundant_samples(&remaining, &fence()).is_empty());
    }
}
