//! Value types flowing through the core: reports, matches, events and
//! predictions.

mod avl;
mod events;
mod prediction;

pub use avl::{AvlReport, Indices, TemporalMatch};
pub use events::{ArrivalDeparture, Headway, SpatialMatch, VehicleEvent, VehicleEventKind};
pub use prediction::{Algorithm, Prediction, PredictionForStopPath};

use chrono::{DateTime, NaiveDate};

/// Calendar date of the service day that starts at `service_day_start_ms`.
pub fn service_date_of(service_day_start_ms: i64, utc_offset_secs: i32) -> NaiveDate {
    let local_ms = service_day_start_ms + i64::from(utc_offset_secs) * 1000;
    DateTime::from_timestamp_millis(local_ms)
        .unwrap_or_default()
        .date_naive()
}
