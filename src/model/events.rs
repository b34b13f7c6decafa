use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// A vehicle arriving at or departing from a stop on a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalDeparture {
    pub vehicle_id: String,
    pub trip_id: String,
    pub route_id: String,
    pub direction_id: Option<String>,
    pub block_id: String,
    pub stop_id: String,
    pub stop_path_index: usize,
    pub time_ms: i64,
    pub is_arrival: bool,
    pub service_date: NaiveDate,
    pub trip_start_time_secs: u32,
    #[serde(default)]
    pub frequency_based: bool,
    pub scheduled_time_ms: Option<i64>,
}

impl ArrivalDeparture {
    pub fn is_departure(&self) -> bool {
        !self.is_arrival
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Headway {
    pub vehicle_id: String,
    pub other_vehicle_id: String,
    pub route_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub headway_ms: i64,
    pub creation_time_ms: i64,
}

/// A match between stops, kept for later travel time derivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialMatch {
    pub vehicle_id: String,
    pub time_ms: i64,
    pub trip_id: String,
    pub block_id: String,
    pub stop_path_index: usize,
    pub distance_along_path_m: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleEventKind {
    Predictable,
    Timeout,
    NoMatch,
    Unassigned,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleEvent {
    pub vehicle_id: String,
    pub time_ms: i64,
    pub kind: VehicleEventKind,
    pub description: String,
}
