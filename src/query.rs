//! Read-only views over the core for the query layer.
//!
//! Unknown keys give empty results; nothing here returns an error or
//! mutates core state.

use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;

use crate::clock::Clock;
use crate::config::{CoreConfig, secs_to_ms};
use crate::live_cache::{VehicleDataCache, VehicleSnapshot};
use crate::model::{ArrivalDeparture, Prediction, service_date_of};
use crate::predictions::ActivePredictionIndex;
use crate::store::{
    HistoricalAverage, HistoricalStatisticsStore, KalmanErrorCacheKey, StopArrivalDepartureCacheKey,
    StopPathCacheKey, TripKey,
};

pub struct PredictionsService {
    config: Arc<CoreConfig>,
    index: Arc<ActivePredictionIndex>,
    clock: Arc<dyn Clock>,
}

impl PredictionsService {
    pub fn new(config: Arc<CoreConfig>, index: Arc<ActivePredictionIndex>, clock: Arc<dyn Clock>) -> Self {
        Self { config, index, clock }
    }

    fn max_age_ms(&self) -> i64 {
        secs_to_ms(self.config.max_prediction_age_secs)
    }

    /// Predictions for a stop on a route, soonest first.
    pub fn for_stop(&self, route_id: &str, stop_id: &str) -> Vec<Prediction> {
        let (now_ms, max_age_ms) = (self.clock.now_ms(), self.max_age_ms());
        self.index
            .for_stop(route_id, stop_id)
            .into_iter()
            .filter(|p| now_ms.saturating_sub(p.avl_time_ms) <= max_age_ms)
            .collect()
    }

    pub fn for_vehicle(&self, vehicle_id: &str) -> Vec<Prediction> {
        let (now_ms, max_age_ms) = (self.clock.now_ms(), self.max_age_ms());
        self.index
            .for_vehicle(vehicle_id)
            .iter()
            .filter(|p| now_ms.saturating_sub(p.avl_time_ms) <= max_age_ms)
            .cloned()
            .collect()
    }

    /// Every usable prediction due within the prediction horizon.
    pub fn all(&self) -> Vec<Prediction> {
        let (now_ms, max_age_ms) = (self.clock.now_ms(), self.max_age_ms());
        let horizon_ms = now_ms.saturating_add(secs_to_ms(self.config.max_prediction_horizon_secs));
        self.index
            .all()
            .into_iter()
            .filter(|p| {
                p.predicted_time_ms <= horizon_ms
                    && now_ms.saturating_sub(p.avl_time_ms) <= max_age_ms
            })
            .collect()
    }
}

/// Entries per statistics cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheKeyCounts {
    pub schedule_based_averages: usize,
    pub frequency_based_averages: usize,
    pub kalman_errors: usize,
    pub trip_histories: usize,
    pub stop_histories: usize,
    pub stop_path_predictions: usize,
    pub dwell_models: usize,
}

/// Filter for [`CacheQueryService::trip_arrival_departures`]. Supported
/// combinations: trip + date + start time, trip + date, trip alone, and
/// date alone. Any other combination matches nothing.
#[derive(Debug, Clone, Default)]
pub struct TripHistoryQuery {
    pub trip_id: Option<String>,
    pub service_date: Option<NaiveDate>,
    pub start_time_secs: Option<u32>,
}

pub struct CacheQueryService {
    store: Arc<HistoricalStatisticsStore>,
    clock: Arc<dyn Clock>,
}

impl CacheQueryService {
    pub fn new(store: Arc<HistoricalStatisticsStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Schedule based travel time average for a stop path.
    pub fn historical_average(&self, trip_id: &str, stop_path_index: usize) -> Option<HistoricalAverage> {
        self.store
            .schedule_based_average(&StopPathCacheKey::travel(trip_id, stop_path_index))
    }

    pub fn historical_average_by_key(&self, key: &StopPathCacheKey) -> Option<HistoricalAverage> {
        if key.start_time_secs.is_some() {
            self.store.frequency_based_average(key)
        } else {
            self.store.schedule_based_average(key)
        }
    }

    pub fn kalman_error(&self, trip_id: &str, stop_path_index: usize) -> Option<f64> {
        self.store
            .kalman_error_by_key(&KalmanErrorCacheKey {
                trip_id: trip_id.to_string(),
                stop_path_index,
            })
            .map(|e| e.error())
    }

    pub fn schedule_based_average_keys(&self) -> Vec<StopPathCacheKey> {
        self.store.schedule_based_average_keys()
    }

    pub fn frequency_based_average_keys(&self) -> Vec<StopPathCacheKey> {
        self.store.frequency_based_average_keys()
    }

    pub fn kalman_error_keys(&self) -> Vec<KalmanErrorCacheKey> {
        self.store.kalman_error_keys()
    }

    pub fn trip_history_keys(&self) -> Vec<TripKey> {
        self.store.trip_history().keys()
    }

    pub fn stop_path_prediction_keys(&self) -> Vec<StopPathCacheKey> {
        self.store.stop_path_prediction_keys()
    }

    pub fn key_counts(&self) -> CacheKeyCounts {
        CacheKeyCounts {
            schedule_based_averages: self.store.schedule_based_average_keys().len(),
            frequency_based_averages: self.store.frequency_based_average_keys().len(),
            kalman_errors: self.store.kalman_error_keys().len(),
            trip_histories: self.store.trip_history().keys().len(),
            stop_histories: self.store.stop_history().keys().len(),
            stop_path_predictions: self.store.stop_path_prediction_keys().len(),
            dwell_models: self.store.dwell_models().keys().len(),
        }
    }

    /// Today's arrivals and departures at a stop, oldest first.
    pub fn stop_arrival_departures(&self, stop_id: &str) -> Vec<ArrivalDeparture> {
        let config = self.store.config();
        let key = StopArrivalDepartureCacheKey {
            stop_id: stop_id.to_string(),
            service_date: service_date_of(self.clock.now_ms(), config.service_utc_offset_secs),
        };
        self.store
            .stop_history()
            .get_stop_history(&key)
            .map(|h| h.snapshot())
            .unwrap_or_default()
    }

    /// Recorded arrivals and departures of trip runs, sorted by time.
    pub fn trip_arrival_departures(&self, query: &TripHistoryQuery) -> Vec<ArrivalDeparture> {
        let history = self.store.trip_history();
        let keys: Vec<TripKey> = match (&query.trip_id, query.service_date, query.start_time_secs) {
            (Some(trip_id), Some(service_date), Some(start_time_secs)) => vec![TripKey {
                trip_id: trip_id.clone(),
                service_date,
                start_time_secs,
            }],
            (Some(trip_id), Some(date), None) => history
                .keys()
                .into_iter()
                .filter(|k| &k.trip_id == trip_id && k.service_date == date)
                .collect(),
            (Some(trip_id), None, None) => history
                .keys()
                .into_iter()
                .filter(|k| &k.trip_id == trip_id)
                .collect(),
            (None, Some(date), None) => history
                .keys()
                .into_iter()
                .filter(|k| k.service_date == date)
                .collect(),
            _ => Vec::new(),
        };

        let mut events: Vec<ArrivalDeparture> = keys
            .iter()
            .filter_map(|k| history.get_trip_history(k))
            .flat_map(|h| h.snapshot())
            .collect();
        events.sort_by_key(|e| (e.time_ms, e.stop_path_index, !e.is_arrival));
        events
    }
}

pub struct VehiclesService {
    cache: Arc<dyn VehicleDataCache>,
}

impl VehiclesService {
    pub fn new(cache: Arc<dyn VehicleDataCache>) -> Self {
        Self { cache }
    }

    pub fn vehicle(&self, vehicle_id: &str) -> Option<VehicleSnapshot> {
        self.cache.get(vehicle_id)
    }

    pub fn vehicles(&self) -> Vec<VehicleSnapshot> {
        self.cache.all()
    }

    pub fn vehicles_for_route(&self, route_id: &str) -> Vec<VehicleSnapshot> {
        self.cache
            .all()
            .into_iter()
            .filter(|v| v.route_id.as_deref() == Some(route_id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::live_cache::LiveVehicleCache;
    use crate::store::fixtures::{DAY_START_MS, pass, service_date, store};

    fn prediction(vehicle_id: &str, stop_id: &str, avl_time_ms: i64, predicted_time_ms: i64) -> Prediction {
        Prediction {
            vehicle_id: vehicle_id.to_string(),
            route_id: "r1".to_string(),
            trip_id: "t1".to_string(),
            stop_id: stop_id.to_string(),
            stop_path_index: 1,
            predicted_time_ms,
            avl_time_ms,
            creation_time_ms: avl_time_ms,
            is_arrival: true,
            schedule_based: false,
        }
    }

    #[test]
    fn test_stale_predictions_are_not_served() {
        let mut config = CoreConfig::default();
        config.max_prediction_age_secs = 300;
        config.max_prediction_horizon_secs = 600;
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let index = Arc::new(ActivePredictionIndex::new());
        index.replace("fresh", Arc::new(vec![prediction("fresh", "s1", 900_000, 1_100_000)]));
        index.replace("stale", Arc::new(vec![prediction("stale", "s1", 600_000, 1_050_000)]));
        index.replace("far", Arc::new(vec![prediction("far", "s2", 990_000, 2_000_000)]));
        let service = PredictionsService::new(Arc::new(config), index, clock);

        let at_stop: Vec<_> = service.for_stop("r1", "s1").into_iter().map(|p| p.vehicle_id).collect();
        assert_eq!(at_stop, vec!["fresh"]);
        assert!(service.for_vehicle("stale").is_empty());
        assert_eq!(service.for_vehicle("far").len(), 1);
        assert_eq!(service.all().len(), 1);
        assert!(service.for_stop("r9", "s1").is_empty());
    }

    #[test]
    fn test_unbounded_age_and_horizon_keep_everything() {
        let mut config = CoreConfig::default();
        config.max_prediction_age_secs = u64::MAX;
        config.max_prediction_horizon_secs = u64::MAX;
        let clock = Arc::new(VirtualClock::new(1_000_000));
        let index = Arc::new(ActivePredictionIndex::new());
        index.replace("old", Arc::new(vec![prediction("old", "s1", i64::MIN, i64::MAX)]));
        let service = PredictionsService::new(Arc::new(config), index, clock);

        assert_eq!(service.for_vehicle("old").len(), 1);
        assert_eq!(service.all().len(), 1);
    }

    #[test]
    fn test_trip_history_query_combinations() {
        let (clock, store) = store(CoreConfig::default());
        for e in pass("v1", "t1", 0, 100, 20).into_iter().chain(pass("v2", "t2", 3600, 100, 20)) {
            store.put_arrival_departure(&e);
        }
        let service = CacheQueryService::new(Arc::new(store), clock);
        let start = 8 * 3600;

        let exact = service.trip_arrival_departures(&TripHistoryQuery {
            trip_id: Some("t1".into()),
            service_date: Some(service_date()),
            start_time_secs: Some(start),
        });
        assert!(!exact.is_empty());
        assert!(exact.windows(2).all(|w| w[0].time_ms <= w[1].time_ms));

        let by_trip = service.trip_arrival_departures(&TripHistoryQuery {
            trip_id: Some("t1".into()),
            ..Default::default()
        });
        assert_eq!(by_trip, exact);

        let by_date = service.trip_arrival_departures(&TripHistoryQuery {
            service_date: Some(service_date()),
            ..Default::default()
        });
        assert!(by_date.len() > exact.len());

        let unsupported = service.trip_arrival_departures(&TripHistoryQuery {
            start_time_secs: Some(start),
            ..Default::default()
        });
        assert!(unsupported.is_empty());
        assert!(service.historical_average("nope", 1).is_none());
        assert!(service.kalman_error("nope", 1).is_none());
    }

    #[test]
    fn test_key_counts_and_stop_history() {
        let (clock, store) = store(CoreConfig::default());
        for e in pass("v1", "t1", 0, 100, 20) {
            store.put_arrival_departure(&e);
        }
        clock.set(DAY_START_MS + 12 * 3600 * 1000);
        let service = CacheQueryService::new(Arc::new(store), clock);

        let counts = service.key_counts();
        assert_eq!(counts.trip_histories, 1);
        assert!(counts.stop_histories > 0);
        assert_eq!(counts.kalman_errors, 0);
        assert!(!service.stop_arrival_departures("s1").is_empty());
        assert!(service.stop_arrival_departures("unknown").is_empty());
    }

    #[test]
    fn test_vehicles_for_route() {
        let cache = Arc::new(LiveVehicleCache::new());
        cache.update(VehicleSnapshot {
            vehicle_id: "v1".into(),
            time_ms: 0,
            lat: 0.0,
            lon: 0.0,
            route_id: Some("r1".into()),
            trip_id: None,
            block_id: None,
            predictable: true,
            schedule_based: false,
            headway_ms: None,
        });
        let service = VehiclesService::new(cache);

        assert_eq!(service.vehicles_for_route("r1").len(), 1);
        assert!(service.vehicles_for_route("r2").is_empty());
        assert!(service.vehicle("v9").is_none());
    }
}
