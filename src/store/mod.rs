//! Historical statistics: rolling averages, Kalman errors, raw
//! arrival/departure history, per stop path predictions and dwell models.
//!
//! All caches share one contract: `get` returns the live value or `None`,
//! `put` replaces, `keys` snapshots. They are populated incrementally from
//! every arrival/departure the core emits, and in bulk at warm-up by
//! replaying history from the persistence layer.

mod average;
mod cache;
mod dwell_model;
mod filter;
mod history;
mod keys;

pub use average::{HistoricalAverage, KalmanError};
pub use cache::BoundedCache;
pub use dwell_model::{DwellModelCache, RlsModel};
pub use filter::DataFilter;
pub use history::{EventLog, StopArrivalDepartureCache, TripDataHistoryCache};
pub use keys::{
    KalmanErrorCacheKey, StopArrivalDepartureCacheKey, StopPathCacheKey, TripKey,
    round_to_increment, seconds_from_midnight,
};

use anyhow::Result;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{CoreConfig, secs_to_ms};
use crate::model::{ArrivalDeparture, Indices, PredictionForStopPath};
use crate::persistence::ArrivalDepartureSource;

/// What a last-vehicle lookup is after.
#[derive(Debug, Clone, Copy)]
pub struct LastVehicleQuery<'a> {
    pub vehicle_id: &'a str,
    pub service_date: NaiveDate,
    pub now_ms: i64,
}

pub struct HistoricalStatisticsStore {
    config: Arc<CoreConfig>,
    filter: DataFilter,
    schedule_averages: BoundedCache<StopPathCacheKey, HistoricalAverage>,
    frequency_averages: BoundedCache<StopPathCacheKey, HistoricalAverage>,
    kalman_errors: BoundedCache<KalmanErrorCacheKey, KalmanError>,
    trip_history: TripDataHistoryCache,
    stop_history: StopArrivalDepartureCache,
    stop_path_predictions: BoundedCache<StopPathCacheKey, PredictionForStopPath>,
    dwell_models: DwellModelCache,
}

impl HistoricalStatisticsStore {
    pub fn new(config: Arc<CoreConfig>, clock: Arc<dyn Clock>) -> Self {
        let capacity = config.cache_capacity;
        let ttl = config.cache_ttl_ms();

        Self {
            filter: DataFilter::from_config(&config),
            schedule_averages: BoundedCache::new(
                "scheduleBasedHistoricalAverage",
                capacity,
                ttl,
                clock.clone(),
            ),
            frequency_averages: BoundedCache::new(
                "frequencyBasedHistoricalAverage",
                capacity,
                ttl,
                clock.clone(),
            ),
            kalman_errors: BoundedCache::new("kalmanError", capacity, ttl, clock.clone()),
            trip_history: TripDataHistoryCache::new(capacity, ttl, clock.clone()),
            stop_history: StopArrivalDepartureCache::new(capacity, ttl, clock.clone()),
            stop_path_predictions: BoundedCache::new(
                "stopPathPredictions",
                capacity,
                ttl,
                clock.clone(),
            ),
            dwell_models: DwellModelCache::new(
                capacity,
                ttl,
                clock,
                config.rls_forgetting_factor,
                config.dwell_model_min_samples,
            ),
            config,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    fn time_bucket(&self, time_ms: i64) -> u32 {
        round_to_increment(
            seconds_from_midnight(time_ms, self.config.service_utc_offset_secs),
            self.config.cache_increments_for_frequency_service_secs,
        )
    }

    pub fn trip_key_for(&self, event: &ArrivalDeparture) -> TripKey {
        let start_time_secs = if event.frequency_based {
            round_to_increment(
                event.trip_start_time_secs,
                self.config.cache_increments_for_frequency_service_secs,
            )
        } else {
            event.trip_start_time_secs
        };
        TripKey {
            trip_id: event.trip_id.clone(),
            service_date: event.service_date,
            start_time_secs,
        }
    }

    /// Statistics key for a stop path; frequency based trips are further
    /// split by the time of day bucket of `time_ms`.
    pub fn stop_path_key(
        &self,
        trip_id: &str,
        stop_path_index: usize,
        travel_time: bool,
        frequency_based: bool,
        time_ms: i64,
    ) -> StopPathCacheKey {
        let key = if travel_time {
            StopPathCacheKey::travel(trip_id, stop_path_index)
        } else {
            StopPathCacheKey::dwell(trip_id, stop_path_index)
        };
        if frequency_based {
            key.with_start_time(self.time_bucket(time_ms))
        } else {
            key
        }
    }

    fn averages_for(&self, frequency_based: bool) -> &BoundedCache<StopPathCacheKey, HistoricalAverage> {
        if frequency_based {
            &self.frequency_averages
        } else {
            &self.schedule_averages
        }
    }

    /// Feeds one observed arrival or departure into every statistic.
    pub fn put_arrival_departure(&self, event: &ArrivalDeparture) {
        let trip_key = self.trip_key_for(event);
        let trip_events = self
            .trip_history
            .put_arrival_departure(trip_key, event.clone());

        if event.is_departure() {
            // before this event lands in the stop history
            let headway_ms = self.observed_headway(event);
            self.record_dwell_sample(event, &trip_events, headway_ms);
        } else if let Some(departure) = trip_events.previous_departure(event) {
            let travel_ms = event.time_ms - departure.time_ms;
            if self.filter.travel_time_ok(travel_ms) {
                let key = self.stop_path_key(
                    &event.trip_id,
                    event.stop_path_index,
                    true,
                    event.frequency_based,
                    event.time_ms,
                );
                debug!(%key, travel_ms, "Updating travel time average");
                self.averages_for(event.frequency_based)
                    .update(key, |avg| avg.unwrap_or_default().with_sample(travel_ms as f64));
            } else {
                debug!(travel_ms, trip_id = %event.trip_id, "Travel time filtered out");
            }
        }

        self.stop_history.put_arrival_departure(event.clone());
    }

    fn record_dwell_sample(
        &self,
        departure: &ArrivalDeparture,
        trip_events: &EventLog,
        headway_ms: Option<i64>,
    ) {
        let Some(arrival) = trip_events.matching_arrival(departure) else {
            return;
        };
        let dwell_ms = departure.time_ms - arrival.time_ms;
        if !self.filter.dwell_time_ok(dwell_ms) {
            debug!(dwell_ms, trip_id = %departure.trip_id, "Dwell time filtered out");
            return;
        }

        let key = self.stop_path_key(
            &departure.trip_id,
            departure.stop_path_index,
            false,
            departure.frequency_based,
            departure.time_ms,
        );
        self.averages_for(departure.frequency_based)
            .update(key.clone(), |avg| avg.unwrap_or_default().with_sample(dwell_ms as f64));

        if let Some(headway_ms) = headway_ms {
            self.dwell_models.add_sample(key, headway_ms, dwell_ms);
        }
    }

    /// Gap between `departure` and the previous departure from the same stop
    /// by another vehicle on the same route and direction.
    fn observed_headway(&self, departure: &ArrivalDeparture) -> Option<i64> {
        let previous = self.last_departure_at_stop(
            &departure.stop_id,
            departure.service_date,
            &departure.route_id,
            departure.direction_id.as_deref(),
            &departure.vehicle_id,
            departure.time_ms,
        )?;
        Some(departure.time_ms - previous.time_ms)
    }

    /// Most recent departure from `stop_id` at or before `before_ms` by a
    /// vehicle other than `exclude_vehicle`, on the same route and direction.
    pub fn last_departure_at_stop(
        &self,
        stop_id: &str,
        service_date: NaiveDate,
        route_id: &str,
        direction_id: Option<&str>,
        exclude_vehicle: &str,
        before_ms: i64,
    ) -> Option<ArrivalDeparture> {
        let key = StopArrivalDepartureCacheKey {
            stop_id: stop_id.to_string(),
            service_date,
        };
        let history = self.stop_history.get_stop_history(&key)?;
        history.latest_where(|e| {
            e.time_ms <= before_ms
                && e.is_departure()
                && e.vehicle_id != exclude_vehicle
                && e.route_id == route_id
                && e.direction_id.as_deref() == direction_id
        })
    }

    /// Replays a window of history into the caches, oldest first, skipping
    /// filtered routes. Returns the number of events applied.
    #[tracing::instrument(skip(self, source))]
    pub async fn populate_from(
        &self,
        source: &dyn ArrivalDepartureSource,
        begin_ms: i64,
        end_ms: i64,
    ) -> Result<usize> {
        let mut events = source.query(begin_ms, end_ms).await?;
        events.sort_by_key(|e| e.time_ms);

        let mut applied = 0;
        for event in events
            .iter()
            .filter(|e| self.config.route_not_filtered(&e.route_id))
        {
            self.put_arrival_departure(event);
            applied += 1;
        }

        info!(applied, "Statistics caches populated from history");
        Ok(applied)
    }

    pub fn historical_average(
        &self,
        indices: &Indices,
        travel_time: bool,
        time_ms: i64,
    ) -> Option<HistoricalAverage> {
        let frequency_based = indices.trip().frequency_based;
        let key = self.stop_path_key(
            indices.trip_id(),
            indices.stop_path_index(),
            travel_time,
            frequency_based,
            time_ms,
        );
        self.averages_for(frequency_based).get(&key)
    }

    pub fn schedule_based_average(&self, key: &StopPathCacheKey) -> Option<HistoricalAverage> {
        self.schedule_averages.get(key)
    }

    pub fn frequency_based_average(&self, key: &StopPathCacheKey) -> Option<HistoricalAverage> {
        self.frequency_averages.get(key)
    }

    pub fn kalman_error(&self, indices: &Indices) -> Option<KalmanError> {
        self.kalman_errors.get(&KalmanErrorCacheKey::from(indices))
    }

    pub fn kalman_error_by_key(&self, key: &KalmanErrorCacheKey) -> Option<KalmanError> {
        self.kalman_errors.get(key)
    }

    pub fn put_kalman_error(&self, indices: &Indices, error: KalmanError) {
        self.kalman_errors
            .put(KalmanErrorCacheKey::from(indices), error);
    }

    /// Travel time over `indices` of the most recent other vehicle, within
    /// the configured maximum age.
    pub fn last_vehicle_travel_time(&self, indices: &Indices, query: LastVehicleQuery<'_>) -> Option<i64> {
        let arrival = self.last_vehicle_event(indices, query, true)?;
        let trip_events = self.trip_history.get_trip_history(&self.trip_key_for(&arrival))?;
        let departure = trip_events.previous_departure(&arrival)?;
        let travel_ms = arrival.time_ms - departure.time_ms;
        self.filter.travel_time_ok(travel_ms).then_some(travel_ms)
    }

    /// Dwell time at the stop of `indices` of the most recent other vehicle.
    pub fn last_vehicle_dwell_time(&self, indices: &Indices, query: LastVehicleQuery<'_>) -> Option<i64> {
        let departure = self.last_vehicle_event(indices, query, false)?;
        let trip_events = self.trip_history.get_trip_history(&self.trip_key_for(&departure))?;
        let arrival = trip_events.matching_arrival(&departure)?;
        let dwell_ms = departure.time_ms - arrival.time_ms;
        self.filter.dwell_time_ok(dwell_ms).then_some(dwell_ms)
    }

    fn last_vehicle_event(
        &self,
        indices: &Indices,
        query: LastVehicleQuery<'_>,
        arrival: bool,
    ) -> Option<ArrivalDeparture> {
        let trip = indices.trip();
        let key = StopArrivalDepartureCacheKey {
            stop_id: indices.stop_id().to_string(),
            service_date: query.service_date,
        };
        let oldest_ms = query
            .now_ms
            .saturating_sub(secs_to_ms(self.config.last_vehicle_max_age_secs));
        let history = self.stop_history.get_stop_history(&key)?;

        history.latest_where(|e| {
            e.time_ms <= query.now_ms
                && e.time_ms >= oldest_ms
                && e.is_arrival == arrival
                && e.vehicle_id != query.vehicle_id
                && e.route_id == trip.route_id
                && e.direction_id == trip.direction_id
                && e.stop_path_index == indices.stop_path_index()
        })
    }

    pub fn put_stop_path_prediction(&self, prediction: PredictionForStopPath) {
        let key = if prediction.travel_time {
            StopPathCacheKey::travel(&prediction.trip_id, prediction.stop_path_index)
        } else {
            StopPathCacheKey::dwell(&prediction.trip_id, prediction.stop_path_index)
        };
        self.stop_path_predictions.put(key, prediction);
    }

    pub fn stop_path_prediction(&self, key: &StopPathCacheKey) -> Option<PredictionForStopPath> {
        self.stop_path_predictions.get(key)
    }

    pub fn dwell_models(&self) -> &DwellModelCache {
        &self.dwell_models
    }

    pub fn trip_history(&self) -> &TripDataHistoryCache {
        &self.trip_history
    }

    pub fn stop_history(&self) -> &StopArrivalDepartureCache {
        &self.stop_history
    }

    pub fn schedule_based_average_keys(&self) -> Vec<StopPathCacheKey> {
        self.schedule_averages.keys()
    }

    pub fn frequency_based_average_keys(&self) -> Vec<StopPathCacheKey> {
        self.frequency_averages.keys()
    }

    pub fn kalman_error_keys(&self) -> Vec<KalmanErrorCacheKey> {
        self.kalman_errors.keys()
    }

    pub fn stop_path_prediction_keys(&self) -> Vec<StopPathCacheKey> {
        self.stop_path_predictions.keys()
    }
}
