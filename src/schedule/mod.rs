//! Static schedule data consumed by the core.
//!
//! Loading GTFS itself happens elsewhere; the core only needs per trip stop
//! path timings and the service calendar, exposed through [`ScheduleProvider`].

mod loader;

pub use loader::load_schedule_dir;

use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// One stop path: the path travelled to reach `stop_id`, plus the stop itself.
#[derive(Debug, Clone)]
pub struct StopPathSchedule {
    pub stop_id: String,
    /// Scheduled travel time from the previous stop to this one.
    pub travel_time_ms: i64,
    /// Scheduled dwell time at this stop.
    pub dwell_time_ms: i64,
    /// Scheduled arrival (departure for wait stops) as seconds after midnight.
    pub scheduled_time_secs: u32,
    pub wait_stop: bool,
    pub stop_radius_m: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct TripSchedule {
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: Option<String>,
    pub block_id: String,
    pub service_id: String,
    /// Headway defined service without a fixed timetable.
    pub frequency_based: bool,
    pub start_time_secs: u32,
    pub stop_paths: Vec<StopPathSchedule>,
}

impl TripSchedule {
    pub fn stop_path(&self, index: usize) -> Option<&StopPathSchedule> {
        self.stop_paths.get(index)
    }

    pub fn is_last_stop_path(&self, index: usize) -> bool {
        index + 1 >= self.stop_paths.len()
    }

    /// Scheduled epoch time for a stop given the start of the service day.
    pub fn scheduled_time_ms(&self, index: usize, service_day_start_ms: i64) -> Option<i64> {
        self.stop_path(index)
            .map(|sp| service_day_start_ms + i64::from(sp.scheduled_time_secs) * 1000)
    }
}

pub trait ScheduleProvider: Send + Sync {
    fn trip(&self, trip_id: &str) -> Option<Arc<TripSchedule>>;

    /// Trips whose service runs on `date`.
    fn active_trips(&self, service_id: &str, date: NaiveDate) -> Vec<Arc<TripSchedule>>;

    fn scheduled_travel_time_ms(&self, trip_id: &str, stop_path_index: usize) -> Option<i64> {
        self.trip(trip_id)?
            .stop_path(stop_path_index)
            .map(|sp| sp.travel_time_ms)
    }

    fn scheduled_dwell_time_ms(&self, trip_id: &str, stop_path_index: usize) -> Option<i64> {
        self.trip(trip_id)?
            .stop_path(stop_path_index)
            .map(|sp| sp.dwell_time_ms)
    }
}

#[derive(Debug, Default)]
pub struct InMemorySchedule {
    trips: HashMap<String, Arc<TripSchedule>>,
    service_dates: HashMap<String, HashSet<NaiveDate>>,
}

impl InMemorySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_trip(&mut self, trip: TripSchedule) {
        self.trips.insert(trip.trip_id.clone(), Arc::new(trip));
    }

    pub fn add_service_date(&mut self, service_id: &str, date: NaiveDate) {
        self.service_dates
            .entry(service_id.to_string())
            .or_default()
            .insert(date);
    }

    pub fn trip_count(&self) -> usize {
        self.trips.len()
    }
}

impl ScheduleProvider for InMemorySchedule {
    fn trip(&self, trip_id: &str) -> Option<Arc<TripSchedule>> {
        self.trips.get(trip_id).cloned()
    }

    fn active_trips(&self, service_id: &str, date: NaiveDate) -> Vec<Arc<TripSchedule>> {
        let runs = self
            .service_dates
            .get(service_id)
            .is_some_and(|dates| dates.contains(&date));
        if !runs {
            return Vec::new();
        }

        let mut trips: Vec<_> = self
            .trips
            .values()
            .filter(|t| t.service_id == service_id)
            .cloned()
            .collect();
        trips.sort_by_key(|t| t.start_time_secs);
        trips
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Four stop paths, 120 s travel and 20 s dwell each, starting 08:00.
    pub fn trip(trip_id: &str, route_id: &str) -> TripSchedule {
        let start = 8 * 3600;
        let stop_paths = (0..4)
            .map(|i| StopPathSchedule {
                stop_id: format!("s{i}"),
                travel_time_ms: if i == 0 { 0 } else { 120_000 },
                dwell_time_ms: 20_000,
                scheduled_time_secs: start + i * 140,
                wait_stop: i == 0,
                stop_radius_m: None,
            })
            .collect();

        TripSchedule {
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            direction_id: Some("0".to_string()),
            block_id: format!("block-{trip_id}"),
            service_id: "wk".to_string(),
            frequency_based: false,
            start_time_secs: start,
            stop_paths,
        }
    }

    pub fn schedule() -> InMemorySchedule {
        let mut schedule = InMemorySchedule::new();
        schedule.add_trip(trip("t1", "r1"));
        schedule.add_trip(trip("t2", "r1"));
        schedule
    }
}
