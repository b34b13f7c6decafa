//! Currently valid predictions, indexed by vehicle and by (route, stop).
//!
//! Both indexes live behind one lock, so replacing a vehicle's list is a
//! single write: readers see the whole old list or the whole new one.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::trace;

use crate::model::Prediction;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteStop {
    route_id: String,
    stop_id: String,
}

impl From<&Prediction> for RouteStop {
    fn from(p: &Prediction) -> Self {
        Self {
            route_id: p.route_id.clone(),
            stop_id: p.stop_id.clone(),
        }
    }
}

#[derive(Default)]
struct Indexes {
    by_vehicle: HashMap<String, Arc<Vec<Prediction>>>,
    by_route_stop: HashMap<RouteStop, HashMap<String, Vec<Prediction>>>,
}

impl Indexes {
    fn unlink(&mut self, vehicle_id: &str, old: &[Prediction]) {
        for p in old {
            let key = RouteStop::from(p);
            if let Some(vehicles) = self.by_route_stop.get_mut(&key) {
                vehicles.remove(vehicle_id);
                if vehicles.is_empty() {
                    self.by_route_stop.remove(&key);
                }
            }
        }
    }

    fn link(&mut self, vehicle_id: &str, new: &[Prediction]) {
        for p in new {
            self.by_route_stop
                .entry(RouteStop::from(p))
                .or_default()
                .entry(vehicle_id.to_string())
                .or_default()
                .push(p.clone());
        }
    }
}

#[derive(Default)]
pub struct ActivePredictionIndex {
    inner: RwLock<Indexes>,
}

impl ActivePredictionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Swaps in `predictions` for `vehicle_id`, returning the previous list.
    pub fn replace(&self, vehicle_id: &str, predictions: Arc<Vec<Prediction>>) -> Arc<Vec<Prediction>> {
        let mut indexes = self.write();
        let old = indexes
            .by_vehicle
            .remove(vehicle_id)
            .unwrap_or_default();
        indexes.unlink(vehicle_id, &old);
        indexes.link(vehicle_id, &predictions);
        if !predictions.is_empty() {
            indexes.by_vehicle.insert(vehicle_id.to_string(), predictions);
        }
        trace!(vehicle_id, old = old.len(), "Replaced predictions");
        old
    }

    pub fn remove_vehicle(&self, vehicle_id: &str) -> Arc<Vec<Prediction>> {
        self.replace(vehicle_id, Arc::new(Vec::new()))
    }

    pub fn for_vehicle(&self, vehicle_id: &str) -> Arc<Vec<Prediction>> {
        self.read()
            .by_vehicle
            .get(vehicle_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Predictions for one stop on one route, soonest first.
    pub fn for_stop(&self, route_id: &str, stop_id: &str) -> Vec<Prediction> {
        let key = RouteStop {
            route_id: route_id.to_string(),
            stop_id: stop_id.to_string(),
        };
        let mut predictions: Vec<Prediction> = self
            .read()
            .by_route_stop
            .get(&key)
            .map(|vehicles| vehicles.values().flatten().cloned().collect())
            .unwrap_or_default();
        predictions.sort_by_key(|p| p.predicted_time_ms);
        predictions
    }

    pub fn all(&self) -> Vec<Prediction> {
        let mut predictions: Vec<Prediction> = self
            .read()
            .by_vehicle
            .values()
            .flat_map(|list| list.iter().cloned())
            .collect();
        predictions.sort_by_key(|p| p.predicted_time_ms);
        predictions
    }

    pub fn vehicle_count(&self) -> usize {
        self.read().by_vehicle.len()
    }
}
