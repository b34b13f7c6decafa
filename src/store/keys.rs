use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;

use crate::model::Indices;

/// Key for per stop path statistics. `start_time_secs` is set only for
/// frequency based service, where it holds the time of day bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StopPathCacheKey {
    pub trip_id: String,
    pub stop_path_index: usize,
    /// Travel time statistics when true, dwell time otherwise.
    pub travel_time: bool,
    pub start_time_secs: Option<u32>,
}

impl StopPathCacheKey {
    pub fn travel(trip_id: &str, stop_path_index: usize) -> Self {
        Self {
            trip_id: trip_id.to_string(),
            stop_path_index,
            travel_time: true,
            start_time_secs: None,
        }
    }

    pub fn dwell(trip_id: &str, stop_path_index: usize) -> Self {
        Self {
            travel_time: false,
            ..Self::travel(trip_id, stop_path_index)
        }
    }

    pub fn with_start_time(mut self, start_time_secs: u32) -> Self {
        self.start_time_secs = Some(start_time_secs);
        self
    }
}

impl fmt::Display for StopPathCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "StopPathCacheKey[trip={}, stopPath={}, travel={}, start={:?}]",
            self.trip_id, self.stop_path_index, self.travel_time, self.start_time_secs
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KalmanErrorCacheKey {
    pub trip_id: String,
    pub stop_path_index: usize,
}

impl From<&Indices> for KalmanErrorCacheKey {
    fn from(indices: &Indices) -> Self {
        Self {
            trip_id: indices.trip_id().to_string(),
            stop_path_index: indices.stop_path_index(),
        }
    }
}

/// One run of a trip on a service day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TripKey {
    pub trip_id: String,
    pub service_date: NaiveDate,
    pub start_time_secs: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct StopArrivalDepartureCacheKey {
    pub stop_id: String,
    pub service_date: NaiveDate,
}

/// Seconds after local midnight of the epoch time `time_ms`.
pub fn seconds_from_midnight(time_ms: i64, utc_offset_secs: i32) -> u32 {
    let local_secs = time_ms.div_euclid(1000) + i64::from(utc_offset_secs);
    local_secs.rem_euclid(86_400) as u32
}

/// Rounds a time of day down to its bucket so nearby start times share
/// statistics.
pub fn round_to_increment(secs: u32, increment_secs: u32) -> u32 {
    if increment_secs == 0 {
        return secs;
    }
    secs - secs % increment_secs
}
