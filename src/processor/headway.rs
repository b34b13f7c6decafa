use chrono::NaiveDate;

use crate::model::{Headway, TemporalMatch};
use crate::schedule::TripSchedule;
use crate::store::HistoricalStatisticsStore;

/// Gap to the vehicle ahead: the report time minus the most recent
/// departure by another vehicle on the same route and direction from the
/// stop this vehicle is at, or heading to.
pub fn headway(
    store: &HistoricalStatisticsStore,
    vehicle_id: &str,
    trip: &TripSchedule,
    temporal_match: &TemporalMatch,
    service_date: NaiveDate,
    time_ms: i64,
) -> Option<Headway> {
    let stop_index = temporal_match
        .at_stop(trip, store.config().default_stop_radius_m)
        .unwrap_or(temporal_match.stop_path_index);
    let stop = trip.stop_path(stop_index)?;

    let ahead = store.last_departure_at_stop(
        &stop.stop_id,
        service_date,
        &trip.route_id,
        trip.direction_id.as_deref(),
        vehicle_id,
        time_ms,
    )?;

    Some(Headway {
        vehicle_id: vehicle_id.to_string(),
        other_vehicle_id: ahead.vehicle_id,
        route_id: trip.route_id.clone(),
        trip_id: trip.trip_id.clone(),
        stop_id: stop.stop_id.clone(),
        headway_ms: time_ms - ahead.time_ms,
        creation_time_ms: time_ms,
    })
}
