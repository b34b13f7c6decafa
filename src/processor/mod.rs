//! Everything that follows a successful match: predictions, headway,
//! spatial match logging and arrival/departure emission.
//!
//! Callers hold the vehicle's lock for the whole cycle. Results are built
//! locally and swapped in. Missing data in one sub-step (no headway, no
//! previous match) never stops the ones after it.

mod arrival_departure;
mod headway;

pub use arrival_departure::{MatchPoint, arrivals_departures};
pub use headway::headway;

use std::sync::Arc;
use tracing::{debug, error};

use crate::clock::Clock;
use crate::config::{CoreConfig, secs_to_ms};
use crate::error::CoreError;
use crate::live_cache::{VehicleDataCache, VehicleSnapshot};
use crate::model::{
    ArrivalDeparture, AvlReport, Headway, SpatialMatch, TemporalMatch, VehicleEvent,
    VehicleEventKind, service_date_of,
};
use crate::persistence::{DataLogger, Record};
use crate::predictions::ActivePredictionIndex;
use crate::schedule::TripSchedule;
use crate::store::HistoricalStatisticsStore;
use crate::strategy::{PredictionGenerator, PredictionInput};
use crate::vehicle::VehicleState;

/// What one processing cycle produced.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub predictions: usize,
    pub headway: Option<Headway>,
    pub spatial_match_stored: bool,
    pub arrivals_departures: Vec<ArrivalDeparture>,
}

/// Inputs of one cycle, copied out of the vehicle state.
struct Cycle {
    report: AvlReport,
    temporal_match: TemporalMatch,
    trip: Arc<TripSchedule>,
}

pub struct MatchResultProcessor {
    config: Arc<CoreConfig>,
    store: Arc<HistoricalStatisticsStore>,
    generator: PredictionGenerator,
    index: Arc<ActivePredictionIndex>,
    logger: Arc<dyn DataLogger>,
    live_cache: Arc<dyn VehicleDataCache>,
    clock: Arc<dyn Clock>,
}

impl MatchResultProcessor {
    pub fn new(
        config: Arc<CoreConfig>,
        store: Arc<HistoricalStatisticsStore>,
        generator: PredictionGenerator,
        index: Arc<ActivePredictionIndex>,
        logger: Arc<dyn DataLogger>,
        live_cache: Arc<dyn VehicleDataCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            index,
            logger,
            live_cache,
            clock,
        }
    }

    pub fn generator(&self) -> &PredictionGenerator {
        &self.generator
    }

    /// Runs one cycle for a freshly matched vehicle.
    ///
    /// Processing a vehicle that is not predictable is an invariant
    /// violation and aborts the cycle before anything is written.
    pub fn process(&self, state: &mut VehicleState) -> Result<ProcessOutcome, CoreError> {
        let vehicle_id = state.vehicle_id().to_string();
        if !state.is_predictable() {
            error!(%vehicle_id, "Processing match for vehicle that is not predictable");
            return Err(CoreError::InvariantViolation {
                vehicle_id,
                detail: "match processed while vehicle is not predictable".to_string(),
            });
        }
        let cycle = match (
            state.last_avl_report(),
            state.temporal_match(),
            state.trip(),
        ) {
            (Some(report), Some(temporal_match), Some(trip)) => Cycle {
                report: report.clone(),
                temporal_match: temporal_match.clone(),
                trip: trip.clone(),
            },
            _ => {
                error!(%vehicle_id, "Predictable vehicle without report or match");
                return Err(CoreError::InvariantViolation {
                    vehicle_id,
                    detail: "predictable vehicle without report or match".to_string(),
                });
            }
        };

        let mut outcome = ProcessOutcome::default();
        if cycle.report.ignore_because_in_consist {
            debug!(%vehicle_id, "Non-lead vehicle of consist, not processing");
            return Ok(outcome);
        }
        if cycle.trip.stop_path(cycle.temporal_match.stop_path_index).is_none() {
            return Err(CoreError::StopPathOutOfRange {
                trip_id: cycle.trip.trip_id.clone(),
                index: cycle.temporal_match.stop_path_index,
                len: cycle.trip.stop_paths.len(),
            });
        }

        let at_stop = cycle
            .temporal_match
            .at_stop(&cycle.trip, self.config.default_stop_radius_m);
        let at_wait_stop = at_stop
            .and_then(|i| cycle.trip.stop_path(i))
            .is_some_and(|sp| sp.wait_stop);
        state.set_at_wait_stop(at_wait_stop);

        let full_cycle = !self.config.only_need_arrival_departures;
        if full_cycle {
            outcome.predictions = self.process_predictions(state, &cycle);
            outcome.headway = self.process_headway(state, &cycle);
        }

        outcome.arrivals_departures = self.process_arrivals_departures(state, &cycle);

        if full_cycle && at_stop.is_none() {
            self.store_spatial_match(&vehicle_id, &cycle);
            outcome.spatial_match_stored = true;
        }

        if let Some(snapshot) = VehicleSnapshot::from_state(state) {
            self.live_cache.update(snapshot);
        }
        Ok(outcome)
    }

    fn process_predictions(&self, state: &mut VehicleState, cycle: &Cycle) -> usize {
        let avl_time_ms = cycle.report.time_ms;
        let generated = self.generator.generate(&PredictionInput {
            vehicle_id: state.vehicle_id(),
            trip: cycle.trip.clone(),
            temporal_match: &cycle.temporal_match,
            avl_time_ms,
            headway_ms: state.headway().map(|h| h.headway_ms),
            schedule_based: state.is_for_schedule_based_preds(),
        });

        let horizon_ms = avl_time_ms.saturating_add(secs_to_ms(self.config.max_prediction_horizon_secs));
        let (predictions, discarded): (Vec<_>, Vec<_>) = generated
            .predictions
            .into_iter()
            .partition(|p| p.predicted_time_ms <= horizon_ms);
        if !discarded.is_empty() {
            debug!(
                vehicle_id = state.vehicle_id(),
                discarded = discarded.len(),
                "Discarded predictions beyond horizon"
            );
        }

        if self.config.store_travel_time_stop_path_predictions {
            for sp in generated.stop_path_predictions {
                self.store.put_stop_path_prediction(sp.clone());
                self.logger.append(Record::PredictionForStopPath(sp));
            }
        }

        let db_limit_ms = match self.config.max_predictions_time_for_db_secs {
            0 => i64::MAX,
            secs => avl_time_ms.saturating_add(secs_to_ms(secs)),
        };
        for p in predictions.iter().filter(|p| p.predicted_time_ms <= db_limit_ms) {
            self.logger.append(Record::Prediction(p.clone()));
        }

        let count = predictions.len();
        let predictions = Arc::new(predictions);
        self.index.replace(state.vehicle_id(), predictions.clone());
        state.set_predictions(predictions);
        count
    }

    fn process_headway(&self, state: &mut VehicleState, cycle: &Cycle) -> Option<Headway> {
        let service_date = service_date_of(
            cycle.temporal_match.service_day_start_ms,
            self.config.service_utc_offset_secs,
        );
        let headway = headway(
            &self.store,
            state.vehicle_id(),
            &cycle.trip,
            &cycle.temporal_match,
            service_date,
            cycle.report.time_ms,
        );
        if let Some(h) = &headway {
            self.logger.append(Record::Headway(h.clone()));
        }
        state.set_headway(headway.clone());
        headway
    }

    fn store_spatial_match(&self, vehicle_id: &str, cycle: &Cycle) {
        self.logger.append(Record::Match(SpatialMatch {
            vehicle_id: vehicle_id.to_string(),
            time_ms: cycle.report.time_ms,
            trip_id: cycle.temporal_match.trip_id.clone(),
            block_id: cycle.temporal_match.block_id.clone(),
            stop_path_index: cycle.temporal_match.stop_path_index,
            distance_along_path_m: cycle.temporal_match.distance_along_path_m,
        }));
    }

    fn process_arrivals_departures(
        &self,
        state: &VehicleState,
        cycle: &Cycle,
    ) -> Vec<ArrivalDeparture> {
        let previous = match (state.previous_match(), state.previous_match_time_ms()) {
            (Some(temporal_match), Some(time_ms)) => Some(MatchPoint {
                temporal_match,
                time_ms,
            }),
            _ => None,
        };
        let events = arrivals_departures(
            state.vehicle_id(),
            &cycle.trip,
            previous,
            MatchPoint {
                temporal_match: &cycle.temporal_match,
                time_ms: cycle.report.time_ms,
            },
            self.config.default_stop_radius_m,
            self.config.service_utc_offset_secs,
        );

        for event in &events {
            self.logger.append(Record::ArrivalDeparture(event.clone()));
            if self.config.route_not_filtered(&event.route_id) {
                self.store.put_arrival_departure(event);
            } else {
                debug!(route_id = %event.route_id, "Excluded route, arrival/departure not added to caches");
            }
        }
        events
    }

    /// Demotes the vehicle: clears its predictions everywhere, records and
    /// persists the event.
    pub fn make_unpredictable(
        &self,
        state: &mut VehicleState,
        kind: VehicleEventKind,
        description: &str,
    ) -> VehicleEvent {
        let event = state.make_unpredictable(kind, description, self.clock.now_ms());
        self.after_unpredictable(state, event)
    }

    /// Administrative unassignment of the vehicle.
    pub fn unassign(&self, state: &mut VehicleState) -> VehicleEvent {
        let event = state.unassign(self.clock.now_ms());
        self.after_unpredictable(state, event)
    }

    /// Bookkeeping for a transition already applied to `state`.
    pub fn after_unpredictable(&self, state: &VehicleState, event: VehicleEvent) -> VehicleEvent {
        self.index.remove_vehicle(state.vehicle_id());
        self.logger.append(Record::VehicleEvent(event.clone()));
        if let Some(snapshot) = VehicleSnapshot::from_state(state) {
            self.live_cache.update(snapshot);
        }
        event
    }

    pub fn record_event(&self, event: VehicleEvent) {
        self.logger.append(Record::VehicleEvent(event));
    }

    pub fn remove_from_vehicle_data_cache(&self, vehicle_id: &str) {
        self.live_cache.remove(vehicle_id);
    }
}
