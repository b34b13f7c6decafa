use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use super::{InMemorySchedule, StopPathSchedule, TripSchedule};

#[derive(Debug, Deserialize)]
struct TripRow {
    trip_id: String,
    route_id: String,
    direction_id: Option<String>,
    block_id: String,
    service_id: String,
    #[serde(default)]
    frequency_based: bool,
    start_time_secs: u32,
}

#[derive(Debug, Deserialize)]
struct StopPathRow {
    trip_id: String,
    stop_path_index: usize,
    stop_id: String,
    travel_time_ms: i64,
    dwell_time_ms: i64,
    scheduled_time_secs: u32,
    #[serde(default)]
    wait_stop: bool,
    stop_radius_m: Option<f64>,
}

impl StopPathRow {
    fn into_stop_path(self) -> (String, usize, StopPathSchedule) {
        let stop_path = StopPathSchedule {
            stop_id: self.stop_id,
            travel_time_ms: self.travel_time_ms,
            dwell_time_ms: self.dwell_time_ms,
            scheduled_time_secs: self.scheduled_time_secs,
            wait_stop: self.wait_stop,
            stop_radius_m: self.stop_radius_m,
        };
        (self.trip_id, self.stop_path_index, stop_path)
    }
}

#[derive(Debug, Deserialize)]
struct CalendarDateRow {
    service_id: String,
    date: NaiveDate,
}

fn read_rows<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();

    for result in rdr.deserialize() {
        let row: T = result.with_context(|| format!("parsing {}", path.display()))?;
        rows.push(row);
    }

    Ok(rows)
}

/// Loads `trips.csv`, `stop_paths.csv` and `calendar_dates.csv` from `dir`.
#[tracing::instrument(fields(dir = %dir.display()))]
pub fn load_schedule_dir(dir: &Path) -> Result<InMemorySchedule> {
    let trips: Vec<TripRow> = read_rows(&dir.join("trips.csv"))?;
    let stop_paths: Vec<StopPathRow> = read_rows(&dir.join("stop_paths.csv"))?;

    let mut paths_by_trip: HashMap<String, Vec<(usize, StopPathSchedule)>> = HashMap::new();
    for row in stop_paths {
        let (trip_id, index, stop_path) = row.into_stop_path();
        paths_by_trip
            .entry(trip_id)
            .or_default()
            .push((index, stop_path));
    }

    let mut schedule = InMemorySchedule::new();
    for trip in trips {
        let mut paths = paths_by_trip.remove(&trip.trip_id).unwrap_or_default();
        if paths.is_empty() {
            warn!(trip_id = %trip.trip_id, "Trip has no stop paths, skipping");
            continue;
        }
        paths.sort_by_key(|(index, _)| *index);

        schedule.add_trip(TripSchedule {
            trip_id: trip.trip_id,
            route_id: trip.route_id,
            direction_id: trip.direction_id,
            block_id: trip.block_id,
            service_id: trip.service_id,
            frequency_based: trip.frequency_based,
            start_time_secs: trip.start_time_secs,
            stop_paths: paths.into_iter().map(|(_, sp)| sp).collect(),
        });
    }

    let calendar_path = dir.join("calendar_dates.csv");
    if calendar_path.exists() {
        let dates: Vec<CalendarDateRow> = read_rows(&calendar_path)?;
        for row in dates {
            schedule.add_service_date(&row.service_id, row.date);
        }
    }

    info!(trips = schedule.trip_count(), "Schedule loaded");
    Ok(schedule)
}
