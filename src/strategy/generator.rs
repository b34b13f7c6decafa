//! Walks a matched vehicle forward along its trip, accumulating travel
//! and dwell estimates into per stop predictions.

use std::sync::Arc;

use super::{Estimate, PredictionContext, PredictionStrategy};
use crate::clock::Clock;
use crate::model::{
    Indices, Prediction, PredictionForStopPath, TemporalMatch, service_date_of,
};
use crate::schedule::TripSchedule;
use crate::store::HistoricalStatisticsStore;

pub struct PredictionInput<'a> {
    pub vehicle_id: &'a str,
    pub trip: Arc<TripSchedule>,
    pub temporal_match: &'a TemporalMatch,
    pub avl_time_ms: i64,
    pub headway_ms: Option<i64>,
    pub schedule_based: bool,
}

#[derive(Debug, Default)]
pub struct GeneratedPredictions {
    pub predictions: Vec<Prediction>,
    pub stop_path_predictions: Vec<PredictionForStopPath>,
}

pub struct PredictionGenerator {
    strategy: PredictionStrategy,
    store: Arc<HistoricalStatisticsStore>,
    clock: Arc<dyn Clock>,
}

struct Walk<'a, 'b> {
    input: &'a PredictionInput<'b>,
    ctx: PredictionContext<'a>,
    creation_time_ms: i64,
    out: GeneratedPredictions,
}

impl Walk<'_, '_> {
    fn record(&mut self, indices: &Indices, estimate: Estimate, travel_time: bool) {
        self.out.stop_path_predictions.push(PredictionForStopPath {
            vehicle_id: self.input.vehicle_id.to_string(),
            creation_time_ms: self.creation_time_ms,
            prediction_time_ms: estimate.value_ms,
            trip_id: indices.trip_id().to_string(),
            stop_path_index: indices.stop_path_index(),
            algorithm: estimate.algorithm,
            travel_time,
            scheduled: estimate.algorithm == crate::model::Algorithm::Schedule,
        });
    }

    fn predict(&mut self, indices: &Indices, time_ms: i64, is_arrival: bool) {
        let trip = indices.trip();
        self.out.predictions.push(Prediction {
            vehicle_id: self.input.vehicle_id.to_string(),
            route_id: trip.route_id.clone(),
            trip_id: trip.trip_id.clone(),
            stop_id: indices.stop_id().to_string(),
            stop_path_index: indices.stop_path_index(),
            predicted_time_ms: time_ms,
            avl_time_ms: self.input.avl_time_ms,
            creation_time_ms: self.creation_time_ms,
            is_arrival,
            schedule_based: self.input.schedule_based,
        });
    }
}

impl PredictionGenerator {
    pub fn new(
        strategy: PredictionStrategy,
        store: Arc<HistoricalStatisticsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            strategy,
            store,
            clock,
        }
    }

    pub fn strategy(&self) -> &PredictionStrategy {
        &self.strategy
    }

    /// Arrival predictions for every remaining stop of the trip, plus a
    /// departure prediction for each remaining wait stop.
    pub fn generate(&self, input: &PredictionInput<'_>) -> GeneratedPredictions {
        let config = self.store.config();
        let temporal_match = input.temporal_match;
        let trip = &input.trip;

        let mut walk = Walk {
            input,
            ctx: PredictionContext {
                store: &self.store,
                vehicle_id: input.vehicle_id,
                avl_time_ms: input.avl_time_ms,
                service_date: service_date_of(
                    temporal_match.service_day_start_ms,
                    config.service_utc_offset_secs,
                ),
                headway_ms: input.headway_ms,
            },
            creation_time_ms: self.clock.now_ms(),
            out: GeneratedPredictions::default(),
        };

        let mut time_ms = input.avl_time_ms;
        let mut index = temporal_match.stop_path_index;
        let mut remaining_fraction = 1.0 - temporal_match.fraction_traveled();

        if let Some(at) = temporal_match.at_stop(trip, config.default_stop_radius_m) {
            let indices = Indices::new(trip.clone(), at);
            if indices.is_last() {
                return walk.out;
            }
            time_ms = self.depart(&mut walk, &indices, time_ms);
            index = at + 1;
            remaining_fraction = 1.0;
        }

        while index < trip.stop_paths.len() {
            let indices = Indices::new(trip.clone(), index);

            let travel = self.strategy.travel_time(&indices, &walk.ctx);
            walk.record(&indices, travel, true);
            time_ms += (travel.value_ms as f64 * remaining_fraction).round() as i64;
            remaining_fraction = 1.0;

            walk.predict(&indices, time_ms, true);
            if indices.is_last() {
                break;
            }
            time_ms = self.depart(&mut walk, &indices, time_ms);
            index += 1;
        }

        walk.out
    }

    /// Dwell at `indices` starting at `arrival_ms`; wait stops hold until
    /// their scheduled departure and get a departure prediction.
    fn depart(&self, walk: &mut Walk<'_, '_>, indices: &Indices, arrival_ms: i64) -> i64 {
        let dwell = self.strategy.dwell_time(indices, &walk.ctx);
        walk.record(indices, dwell, false);
        let mut departure_ms = arrival_ms + dwell.value_ms;

        let trip = indices.trip();
        let wait_stop = indices.stop_path().is_some_and(|sp| sp.wait_stop);
        if wait_stop {
            if !trip.frequency_based {
                let scheduled = trip.scheduled_time_ms(
                    indices.stop_path_index(),
                    walk.input.temporal_match.service_day_start_ms,
                );
                if let Some(scheduled) = scheduled {
                    departure_ms = departure_ms.max(scheduled);
                }
            }
            walk.predict(indices, departure_ms, false);
        }
        departure_ms
    }
}
