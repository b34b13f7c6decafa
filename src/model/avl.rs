use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::schedule::{StopPathSchedule, TripSchedule};

/// A single vehicle position observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvlReport {
    pub vehicle_id: String,
    pub time_ms: i64,
    pub lat: f64,
    pub lon: f64,
    /// Set for non-lead vehicles of a consist; only the lead vehicle predicts.
    #[serde(default)]
    pub ignore_because_in_consist: bool,
}

/// Where the external matcher placed the vehicle on its assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalMatch {
    pub trip_id: String,
    pub block_id: String,
    /// Epoch ms of midnight of the trip's service day.
    pub service_day_start_ms: i64,
    pub stop_path_index: usize,
    pub distance_along_path_m: f64,
    pub stop_path_length_m: f64,
}

impl TemporalMatch {
    /// Index of the stop the vehicle is at, if any.
    ///
    /// A vehicle is at the stop ending its current path when within that
    /// stop's radius of the path end, and at the previous stop while still
    /// within its radius of the path start.
    pub fn at_stop(&self, trip: &TripSchedule, default_radius_m: f64) -> Option<usize> {
        let radius = |sp: &StopPathSchedule| sp.stop_radius_m.unwrap_or(default_radius_m);

        let end_stop = trip.stop_path(self.stop_path_index)?;
        let remaining = self.stop_path_length_m - self.distance_along_path_m;
        if remaining <= radius(end_stop) {
            return Some(self.stop_path_index);
        }

        if self.stop_path_index > 0 {
            let previous = trip.stop_path(self.stop_path_index - 1)?;
            if self.distance_along_path_m <= radius(previous) {
                return Some(self.stop_path_index - 1);
            }
        }

        None
    }

    /// Share of the current stop path already covered, in `[0, 1]`.
    pub fn fraction_traveled(&self) -> f64 {
        if self.stop_path_length_m <= 0.0 {
            return 1.0;
        }
        (self.distance_along_path_m / self.stop_path_length_m).clamp(0.0, 1.0)
    }
}

/// A (trip, stop path) coordinate; the unit all statistics are kept for.
#[derive(Debug, Clone)]
pub struct Indices {
    trip: Arc<TripSchedule>,
    stop_path_index: usize,
}

impl Indices {
    pub fn new(trip: Arc<TripSchedule>, stop_path_index: usize) -> Self {
        Self {
            trip,
            stop_path_index,
        }
    }

    pub fn trip(&self) -> &TripSchedule {
        &self.trip
    }

    pub fn trip_id(&self) -> &str {
        &self.trip.trip_id
    }

    pub fn stop_path_index(&self) -> usize {
        self.stop_path_index
    }

    pub fn stop_path(&self) -> Option<&StopPathSchedule> {
        self.trip.stop_path(self.stop_path_index)
    }

    pub fn stop_id(&self) -> &str {
        self.stop_path().map(|sp| sp.stop_id.as_str()).unwrap_or("")
    }

    pub fn is_last(&self) -> bool {
        self.trip.is_last_stop_path(self.stop_path_index)
    }

    pub fn next(&self) -> Option<Indices> {
        if self.is_last() {
            return None;
        }
        Some(Indices::new(self.trip.clone(), self.stop_path_index + 1))
    }
}

impl PartialEq for Indices {
    fn eq(&self, other: &Self) -> bool {
        self.trip.trip_id == other.trip.trip_id && self.stop_path_index == other.stop_path_index
    }
}

impl fmt::Display for Indices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Indices[trip={}, stopPath={}]",
            self.trip.trip_id, self.stop_path_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::fixtures;

    fn matched(index: usize, along: f64) -> TemporalMatch {
        TemporalMatch {
            trip_id: "t1".to_string(),
            block_id: "b1".to_string(),
            service_day_start_ms: 0,
            stop_path_index: index,
            distance_along_path_m: along,
            stop_path_length_m: 500.0,
        }
    }

    #[test]
    fn test_at_stop_boundaries() {
        let trip = fixtures::trip("t1", "r1");

        // Stop radius boundary is inclusive
        assert_eq!(matched(2, 475.0).at_stop(&trip, 25.0), Some(2));
        assert_eq!(matched(2, 500.0).at_stop(&trip, 25.0), Some(2));
        assert_eq!(matched(2, 474.0).at_stop(&trip, 25.0), None);

        assert_eq!(matched(2, 25.0).at_stop(&trip, 25.0), Some(1));
        assert_eq!(matched(2, 26.0).at_stop(&trip, 25.0), None);
    }

    #[test]
    fn test_fraction_traveled_is_clamped() {
        assert_eq!(matched(1, 250.0).fraction_traveled(), 0.5);
        assert_eq!(matched(1, 600.0).fraction_traveled(), 1.0);
        assert_eq!(matched(1, -5.0).fraction_traveled(), 0.0);
    }

    #[test]
    fn test_indices_navigation() {
        let trip = Arc::new(fixtures::trip("t1", "r1"));
        let indices = Indices::new(trip.clone(), 2);

        assert_eq!(indices.stop_id(), "s2");
        let next = indices.next().unwrap();
        assert_eq!(next.stop_path_index(), 3);
        assert!(next.is_last());
        assert!(next.next().is_none());
        assert_eq!(indices, Indices::new(trip, 2));
    }
}
