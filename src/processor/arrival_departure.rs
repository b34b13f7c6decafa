//! Arrival/departure events derived from two consecutive matches.
//!
//! Positions along a trip are measured in stops: stop `k` sits at `k`, and
//! a match on stop path `i` at fraction `f` sits at `i - 1 + f`. Times for
//! stops passed between reports are interpolated on that scale.

use crate::model::{ArrivalDeparture, TemporalMatch, service_date_of};
use crate::schedule::TripSchedule;

/// One matched position on the trip.
#[derive(Debug, Clone, Copy)]
pub struct MatchPoint<'a> {
    pub temporal_match: &'a TemporalMatch,
    pub time_ms: i64,
}

impl MatchPoint<'_> {
    fn position(&self) -> f64 {
        self.temporal_match.stop_path_index as f64 - 1.0 + self.temporal_match.fraction_traveled()
    }
}

struct Emitter<'a> {
    vehicle_id: &'a str,
    trip: &'a TripSchedule,
    service_day_start_ms: i64,
    utc_offset_secs: i32,
    out: Vec<ArrivalDeparture>,
}

impl Emitter<'_> {
    fn emit(&mut self, index: usize, time_ms: i64, is_arrival: bool) {
        let Some(stop_path) = self.trip.stop_path(index) else {
            return;
        };
        let scheduled_time_ms = (!self.trip.frequency_based)
            .then(|| self.trip.scheduled_time_ms(index, self.service_day_start_ms))
            .flatten();
        self.out.push(ArrivalDeparture {
            vehicle_id: self.vehicle_id.to_string(),
            trip_id: self.trip.trip_id.clone(),
            route_id: self.trip.route_id.clone(),
            direction_id: self.trip.direction_id.clone(),
            block_id: self.trip.block_id.clone(),
            stop_id: stop_path.stop_id.clone(),
            stop_path_index: index,
            time_ms,
            is_arrival,
            service_date: service_date_of(self.service_day_start_ms, self.utc_offset_secs),
            trip_start_time_secs: self.trip.start_time_secs,
            frequency_based: self.trip.frequency_based,
            scheduled_time_ms,
        });
    }
}

/// Events between `previous` and `current`, oldest first. Nothing is
/// emitted for a first match, a trip change or backwards movement.
pub fn arrivals_departures(
    vehicle_id: &str,
    trip: &TripSchedule,
    previous: Option<MatchPoint<'_>>,
    current: MatchPoint<'_>,
    default_radius_m: f64,
    utc_offset_secs: i32,
) -> Vec<ArrivalDeparture> {
    let Some(previous) = previous else {
        return Vec::new();
    };
    if previous.temporal_match.trip_id != current.temporal_match.trip_id
        || previous.temporal_match.service_day_start_ms
            != current.temporal_match.service_day_start_ms
    {
        return Vec::new();
    }

    let (p0, t0) = (previous.position(), previous.time_ms);
    let (p1, t1) = (current.position(), current.time_ms);
    if p1 < p0 || t1 < t0 {
        return Vec::new();
    }
    let time_at = |stop: usize| -> i64 {
        let span = p1 - p0;
        if span <= f64::EPSILON {
            return t1;
        }
        let share = ((stop as f64 - p0) / span).clamp(0.0, 1.0);
        t0 + ((t1 - t0) as f64 * share).round() as i64
    };

    let was_at = previous.temporal_match.at_stop(trip, default_radius_m);
    let now_at = current.temporal_match.at_stop(trip, default_radius_m);

    let mut emitter = Emitter {
        vehicle_id,
        trip,
        service_day_start_ms: current.temporal_match.service_day_start_ms,
        utc_offset_secs,
        out: Vec::new(),
    };

    // first stop not yet reached at the previous report
    let mut first_unvisited = previous.temporal_match.stop_path_index;
    if let Some(stop) = was_at {
        if now_at == Some(stop) {
            return Vec::new();
        }
        // last seen at the stop at t0
        emitter.emit(stop, t0, false);
        first_unvisited = stop + 1;
    }

    // stops passed without a report at them
    let last_passed = match now_at {
        Some(stop) => stop.checked_sub(1),
        None => current.temporal_match.stop_path_index.checked_sub(1),
    };
    if let Some(last_passed) = last_passed {
        for stop in first_unvisited..=last_passed {
            let time_ms = time_at(stop);
            emitter.emit(stop, time_ms, true);
            emitter.emit(stop, time_ms, false);
        }
    }

    if let Some(stop) = now_at
        && stop >= first_unvisited
    {
        emitter.emit(stop, time_at(stop), true);
    }

    emitter.out
}
