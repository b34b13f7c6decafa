//! Latest known position and status of every vehicle, for the query layer.

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use crate::vehicle::VehicleState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleSnapshot {
    pub vehicle_id: String,
    pub time_ms: i64,
    pub lat: f64,
    pub lon: f64,
    pub route_id: Option<String>,
    pub trip_id: Option<String>,
    pub block_id: Option<String>,
    pub predictable: bool,
    pub schedule_based: bool,
    pub headway_ms: Option<i64>,
}

impl VehicleSnapshot {
    /// `None` until the vehicle has reported at least once.
    pub fn from_state(state: &VehicleState) -> Option<Self> {
        let report = state.last_avl_report()?;
        Some(Self {
            vehicle_id: state.vehicle_id().to_string(),
            time_ms: report.time_ms,
            lat: report.lat,
            lon: report.lon,
            route_id: state.trip().map(|t| t.route_id.clone()),
            trip_id: state.temporal_match().map(|m| m.trip_id.clone()),
            block_id: state.temporal_match().map(|m| m.block_id.clone()),
            predictable: state.is_predictable(),
            schedule_based: state.is_for_schedule_based_preds(),
            headway_ms: state.headway().map(|h| h.headway_ms),
        })
    }
}

pub trait VehicleDataCache: Send + Sync {
    fn update(&self, snapshot: VehicleSnapshot);

    fn remove(&self, vehicle_id: &str);

    fn get(&self, vehicle_id: &str) -> Option<VehicleSnapshot>;

    fn all(&self) -> Vec<VehicleSnapshot>;
}

#[derive(Default)]
pub struct LiveVehicleCache {
    vehicles: DashMap<String, VehicleSnapshot>,
}

impl LiveVehicleCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VehicleDataCache for LiveVehicleCache {
    fn update(&self, snapshot: VehicleSnapshot) {
        self.vehicles.insert(snapshot.vehicle_id.clone(), snapshot);
    }

    fn remove(&self, vehicle_id: &str) {
        if self.vehicles.remove(vehicle_id).is_some() {
            info!(vehicle_id, "Removed vehicle from live vehicle cache");
        }
    }

    fn get(&self, vehicle_id: &str) -> Option<VehicleSnapshot> {
        self.vehicles.get(vehicle_id).map(|v| v.clone())
    }

    fn all(&self) -> Vec<VehicleSnapshot> {
        let mut all: Vec<_> = self.vehicles.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.vehicle_id.cmp(&b.vehicle_id));
        all
    }
}
