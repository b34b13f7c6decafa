use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag of the estimator that produced a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    #[serde(rename = "SCHEDULED")]
    Schedule,
    #[serde(rename = "LAST VEHICLE")]
    LastVehicle,
    #[serde(rename = "HISTORICAL AVERAGE")]
    HistoricalAverage,
    #[serde(rename = "KALMAN")]
    Kalman,
    #[serde(rename = "RLS")]
    RlsDwell,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Schedule => "SCHEDULED",
            Algorithm::LastVehicle => "LAST VEHICLE",
            Algorithm::HistoricalAverage => "HISTORICAL AVERAGE",
            Algorithm::Kalman => "KALMAN",
            Algorithm::RlsDwell => "RLS",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Predicted arrival (or departure, for wait stops) of a vehicle at a stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub vehicle_id: String,
    pub route_id: String,
    pub trip_id: String,
    pub stop_id: String,
    pub stop_path_index: usize,
    pub predicted_time_ms: i64,
    /// Time of the AVL report the prediction was generated from.
    pub avl_time_ms: i64,
    pub creation_time_ms: i64,
    pub is_arrival: bool,
    pub schedule_based: bool,
}

/// One estimated travel or dwell time for a stop path. Never mutated; the
/// next prediction run for the same key supersedes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionForStopPath {
    pub vehicle_id: String,
    pub creation_time_ms: i64,
    pub prediction_time_ms: i64,
    pub trip_id: String,
    pub stop_path_index: usize,
    pub algorithm: Algorithm,
    /// Travel time when true, dwell time otherwise.
    pub travel_time: bool,
    pub scheduled: bool,
}
