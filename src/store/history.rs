//! Raw arrival/departure history, by trip run and by stop.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::cache::BoundedCache;
use super::keys::{StopArrivalDepartureCacheKey, TripKey};
use crate::clock::Clock;
use crate::model::ArrivalDeparture;

/// Time ordered events for one key, appended in place. Each append is one
/// write under the log's lock, so readers see every event or none of it.
#[derive(Debug, Default)]
pub struct EventLog {
    events: RwLock<Vec<ArrivalDeparture>>,
}

impl EventLog {
    fn read(&self) -> RwLockReadGuard<'_, Vec<ArrivalDeparture>> {
        self.events.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ArrivalDeparture>> {
        self.events.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Appends `event`, keeping time order. Amortized O(1) when events
    /// arrive in time order.
    fn push(&self, event: ArrivalDeparture) {
        let mut events = self.write();
        if events.last().is_none_or(|last| last.time_ms <= event.time_ms) {
            events.push(event);
        } else {
            let pos = events.partition_point(|e| e.time_ms <= event.time_ms);
            events.insert(pos, event);
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn snapshot(&self) -> Vec<ArrivalDeparture> {
        self.read().clone()
    }

    /// Newest event matching `pred`.
    pub fn latest_where(&self, pred: impl Fn(&ArrivalDeparture) -> bool) -> Option<ArrivalDeparture> {
        self.read().iter().rev().find(|e| pred(e)).cloned()
    }

    /// Departure that starts the stop path ending with `arrival`.
    pub fn previous_departure(&self, arrival: &ArrivalDeparture) -> Option<ArrivalDeparture> {
        let previous_index = arrival.stop_path_index.checked_sub(1)?;
        self.latest_where(|e| {
            e.time_ms <= arrival.time_ms && e.is_departure() && e.stop_path_index == previous_index
        })
    }

    /// Arrival at the stop `departure` is leaving.
    pub fn matching_arrival(&self, departure: &ArrivalDeparture) -> Option<ArrivalDeparture> {
        self.latest_where(|e| {
            e.time_ms <= departure.time_ms && e.is_arrival && e.stop_path_index == departure.stop_path_index
        })
    }
}

/// Adds `event` to the log under `key`, creating it on first use. The push
/// happens while the cache entry is held, so a concurrent eviction cannot
/// swallow it.
fn append<K>(cache: &BoundedCache<K, Arc<EventLog>>, key: K, event: ArrivalDeparture) -> Arc<EventLog>
where
    K: Eq + std::hash::Hash + Clone,
{
    cache.update(key, |current| {
        let log = current.unwrap_or_default();
        log.push(event);
        log
    })
}

pub struct TripDataHistoryCache {
    cache: BoundedCache<TripKey, Arc<EventLog>>,
}

impl TripDataHistoryCache {
    pub fn new(capacity: usize, ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: BoundedCache::new("arrivalDeparturesByTrip", capacity, ttl_ms, clock),
        }
    }

    pub fn put_arrival_departure(&self, key: TripKey, event: ArrivalDeparture) -> Arc<EventLog> {
        append(&self.cache, key, event)
    }

    pub fn get_trip_history(&self, key: &TripKey) -> Option<Arc<EventLog>> {
        self.cache.get(key)
    }

    pub fn keys(&self) -> Vec<TripKey> {
        self.cache.keys()
    }
}

pub struct StopArrivalDepartureCache {
    cache: BoundedCache<StopArrivalDepartureCacheKey, Arc<EventLog>>,
}

impl StopArrivalDepartureCache {
    pub fn new(capacity: usize, ttl_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: BoundedCache::new("arrivalDeparturesByStop", capacity, ttl_ms, clock),
        }
    }

    pub fn put_arrival_departure(&self, event: ArrivalDeparture) -> Arc<EventLog> {
        let key = StopArrivalDepartureCacheKey {
            stop_id: event.stop_id.clone(),
            service_date: event.service_date,
        };
        append(&self.cache, key, event)
    }

    pub fn get_stop_history(&self, key: &StopArrivalDepartureCacheKey) -> Option<Arc<EventLog>> {
        self.cache.get(key)
    }

    pub fn keys(&self) -> Vec<StopArrivalDepartureCacheKey> {
        self.cache.keys()
    }
}
