//! Authoritative per vehicle tracking state.
//!
//! Every [`VehicleState`] sits behind its own mutex. The ingestion path and
//! the timeout supervisor both take that lock before reading or changing
//! predictability, the match or the prediction list, and must re-check
//! predictability after acquiring it.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use crate::model::{AvlReport, Headway, Prediction, TemporalMatch, VehicleEvent, VehicleEventKind};
use crate::schedule::TripSchedule;

#[derive(Debug, Clone, Serialize)]
pub struct VehicleState {
    vehicle_id: String,
    temporal_match: Option<TemporalMatch>,
    previous_match: Option<TemporalMatch>,
    match_time_ms: Option<i64>,
    previous_match_time_ms: Option<i64>,
    #[serde(skip)]
    trip: Option<Arc<TripSchedule>>,
    predictable: bool,
    for_schedule_based_preds: bool,
    at_wait_stop: bool,
    last_avl_report: Option<AvlReport>,
    headway: Option<Headway>,
    #[serde(skip)]
    predictions: Arc<Vec<Prediction>>,
    last_event: Option<VehicleEvent>,
}

impl VehicleState {
    pub fn new(vehicle_id: &str) -> Self {
        Self {
            vehicle_id: vehicle_id.to_string(),
            temporal_match: None,
            previous_match: None,
            match_time_ms: None,
            previous_match_time_ms: None,
            trip: None,
            predictable: false,
            for_schedule_based_preds: false,
            at_wait_stop: false,
            last_avl_report: None,
            headway: None,
            predictions: Arc::new(Vec::new()),
            last_event: None,
        }
    }

    pub fn vehicle_id(&self) -> &str {
        &self.vehicle_id
    }

    pub fn temporal_match(&self) -> Option<&TemporalMatch> {
        self.temporal_match.as_ref()
    }

    /// The match before the current one, kept for arrival/departure
    /// generation.
    pub fn previous_match(&self) -> Option<&TemporalMatch> {
        self.previous_match.as_ref()
    }

    /// Report time of the previous match.
    pub fn previous_match_time_ms(&self) -> Option<i64> {
        self.previous_match_time_ms
    }

    pub fn trip(&self) -> Option<&Arc<TripSchedule>> {
        self.trip.as_ref()
    }

    pub fn is_predictable(&self) -> bool {
        self.predictable
    }

    pub fn is_for_schedule_based_preds(&self) -> bool {
        self.for_schedule_based_preds
    }

    pub fn set_for_schedule_based_preds(&mut self, value: bool) {
        self.for_schedule_based_preds = value;
    }

    pub fn is_at_wait_stop(&self) -> bool {
        self.at_wait_stop
    }

    pub fn set_at_wait_stop(&mut self, value: bool) {
        self.at_wait_stop = value;
    }

    pub fn last_avl_report(&self) -> Option<&AvlReport> {
        self.last_avl_report.as_ref()
    }

    pub fn headway(&self) -> Option<&Headway> {
        self.headway.as_ref()
    }

    pub fn set_headway(&mut self, headway: Option<Headway>) {
        self.headway = headway;
    }

    pub fn predictions(&self) -> Arc<Vec<Prediction>> {
        self.predictions.clone()
    }

    pub fn set_predictions(&mut self, predictions: Arc<Vec<Prediction>>) {
        self.predictions = predictions;
    }

    pub fn last_event(&self) -> Option<&VehicleEvent> {
        self.last_event.as_ref()
    }

    /// Stores a new report and match. The vehicle becomes predictable; the
    /// returned event is set when that is a transition.
    pub fn set_match(
        &mut self,
        report: AvlReport,
        temporal_match: TemporalMatch,
        trip: Arc<TripSchedule>,
    ) -> Option<VehicleEvent> {
        let time_ms = report.time_ms;
        self.previous_match = self.temporal_match.take();
        self.previous_match_time_ms = self.match_time_ms.replace(time_ms);
        self.temporal_match = Some(temporal_match);
        self.trip = Some(trip);
        self.last_avl_report = Some(report);

        if self.predictable {
            return None;
        }
        self.predictable = true;
        let event = VehicleEvent {
            vehicle_id: self.vehicle_id.clone(),
            time_ms,
            kind: VehicleEventKind::Predictable,
            description: "Vehicle matched to assignment".to_string(),
        };
        self.last_event = Some(event.clone());
        Some(event)
    }

    /// Stores a report that did not match; the vehicle keeps its previous
    /// match but stops predicting.
    pub fn set_unmatched_report(&mut self, report: AvlReport) -> Option<VehicleEvent> {
        let time_ms = report.time_ms;
        self.last_avl_report = Some(report);
        if !self.predictable {
            return None;
        }
        Some(self.make_unpredictable(
            VehicleEventKind::NoMatch,
            "No match for AVL report",
            time_ms,
        ))
    }

    /// Clears predictions and headway, keeps the match, records why.
    pub fn make_unpredictable(
        &mut self,
        kind: VehicleEventKind,
        description: &str,
        time_ms: i64,
    ) -> VehicleEvent {
        info!(vehicle_id = %self.vehicle_id, ?kind, description, "Vehicle made unpredictable");
        self.predictable = false;
        self.at_wait_stop = false;
        self.headway = None;
        self.predictions = Arc::new(Vec::new());

        let event = VehicleEvent {
            vehicle_id: self.vehicle_id.clone(),
            time_ms,
            kind,
            description: description.to_string(),
        };
        self.last_event = Some(event.clone());
        event
    }

    /// Administrative unassignment; also drops the match.
    pub fn unassign(&mut self, time_ms: i64) -> VehicleEvent {
        let event = self.make_unpredictable(VehicleEventKind::Unassigned, "Vehicle unassigned", time_ms);
        self.temporal_match = None;
        self.previous_match = None;
        self.match_time_ms = None;
        self.previous_match_time_ms = None;
        self.trip = None;
        self.for_schedule_based_preds = false;
        event
    }
}

pub type VehicleHandle = Arc<Mutex<VehicleState>>;

/// Locks one vehicle, recovering the state if a previous holder panicked.
pub fn lock_vehicle(handle: &Mutex<VehicleState>) -> MutexGuard<'_, VehicleState> {
    handle.lock().unwrap_or_else(|e| e.into_inner())
}

#[derive(Default)]
pub struct VehicleStateStore {
    vehicles: DashMap<String, VehicleHandle>,
}

impl VehicleStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for `vehicle_id`, created on first access.
    pub fn get(&self, vehicle_id: &str) -> VehicleHandle {
        if let Some(handle) = self.vehicles.get(vehicle_id) {
            return handle.clone();
        }
        self.vehicles
            .entry(vehicle_id.to_string())
            .or_insert_with(|| {
                debug!(vehicle_id, "New vehicle state");
                Arc::new(Mutex::new(VehicleState::new(vehicle_id)))
            })
            .clone()
    }

    pub fn find(&self, vehicle_id: &str) -> Option<VehicleHandle> {
        self.vehicles.get(vehicle_id).map(|h| h.clone())
    }

    /// Runs `f` inside the vehicle's exclusive section.
    pub fn with_vehicle<R>(&self, vehicle_id: &str, f: impl FnOnce(&mut VehicleState) -> R) -> R {
        let handle = self.get(vehicle_id);
        let mut state = lock_vehicle(&handle);
        f(&mut state)
    }

    /// Copies of every vehicle's state, each taken under its own lock.
    pub fn snapshot(&self) -> Vec<VehicleState> {
        let handles: Vec<VehicleHandle> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        handles.iter().map(|h| lock_vehicle(h).clone()).collect()
    }

    pub fn vehicle_ids(&self) -> Vec<String> {
        self.vehicles.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::schedule::fixtures as schedule_fixtures;
    use std::thread;

    fn trip() -> Arc<TripSchedule> {
        Arc::new(schedule_fixtures::trip("t1", "r1"))
    }

    #[test]
    fn test_get_creates_once() {
        let store = VehicleStateStore::new();
        let a = store.get("v1");
        let b = store.get("v1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        assert!(store.find("v2").is_none());
    }

    #[test]
    fn test_match_makes_predictable_once() {
        let mut state = VehicleState::new("v1");
        assert!(!state.is_predictable());

        let event = state.set_match(report("v1", 1_000), temporal_match("t1", 1, 10.0), trip());
        assert_eq!(event.unwrap().kind, VehicleEventKind::Predictable);
        assert!(state.is_predictable());

        let again = state.set_match(report("v1", 2_000), temporal_match("t1", 1, 60.0), trip());
        assert!(again.is_none());
        assert_eq!(state.previous_match().unwrap().distance_along_path_m, 10.0);
        assert_eq!(state.previous_match_time_ms(), Some(1_000));
    }

    #[test]
    fn test_unassign_clears_match_and_predictability() {
        let mut state = VehicleState::new("v1");
        state.set_match(report("v1", 1_000), temporal_match("t1", 1, 10.0), trip());
        state.set_predictions(Arc::new(vec![]));

        let event = state.unassign(5_000);
        assert_eq!(event.kind, VehicleEventKind::Unassigned);
        assert!(!state.is_predictable());
        assert!(state.temporal_match().is_none());
        assert_eq!(state.last_event(), Some(&event));
    }

    #[test]
    fn test_unmatched_report_demotes() {
        let mut state = VehicleState::new("v1");
        assert!(state.set_unmatched_report(report("v1", 500)).is_none());

        state.set_match(report("v1", 1_000), temporal_match("t1", 1, 10.0), trip());
        let event = state.set_unmatched_report(report("v1", 2_000)).unwrap();
        assert_eq!(event.kind, VehicleEventKind::NoMatch);
        assert!(!state.is_predictable());
        assert!(state.temporal_match().is_some());
    }

    #[test]
    fn test_concurrent_updates_serialize_per_vehicle() {
        let store = Arc::new(VehicleStateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        store.with_vehicle("v1", |state| {
                            let time = i64::from(i * 1000 + j);
                            state.set_match(report("v1", time), temporal_match("t1", 1, 0.0), trip());
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot[0].is_predictable());
        assert!(snapshot[0].last_avl_report().is_some());
    }
}
