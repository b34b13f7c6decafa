//! Boundary to the persistence layer.
//!
//! Writes are fire-and-forget through a bounded [`QueuedDataLogger`]; a
//! writer task drains it into a [`RecordSink`]. When the queue is full the
//! lowest priority pending writes are dropped first, so producers never
//! block.

mod csv_sink;
mod monitor;
mod queue;

pub use csv_sink::{CsvArrivalDepartureSource, CsvRecordSink, append_records};
pub use monitor::QueueMonitor;
pub use queue::QueuedDataLogger;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

use crate::model::{
    ArrivalDeparture, Headway, Prediction, PredictionForStopPath, SpatialMatch, VehicleEvent,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    ArrivalDeparture(ArrivalDeparture),
    VehicleEvent(VehicleEvent),
    Headway(Headway),
    Match(SpatialMatch),
    Prediction(Prediction),
    PredictionForStopPath(PredictionForStopPath),
}

impl Record {
    /// Number of distinct values [`Record::priority`] returns.
    pub const PRIORITY_LEVELS: usize = 6;

    /// Higher survives longer when the queue is full.
    pub fn priority(&self) -> u8 {
        match self {
            Record::ArrivalDeparture(_) => 5,
            Record::VehicleEvent(_) => 4,
            Record::Headway(_) => 3,
            Record::Match(_) => 2,
            Record::Prediction(_) => 1,
            Record::PredictionForStopPath(_) => 0,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Record::ArrivalDeparture(_) => "arrival_departures",
            Record::VehicleEvent(_) => "vehicle_events",
            Record::Headway(_) => "headways",
            Record::Match(_) => "matches",
            Record::Prediction(_) => "predictions",
            Record::PredictionForStopPath(_) => "prediction_for_stop_paths",
        }
    }
}

/// Queued writes for matches, headways, predictions and arrival/departures.
pub trait DataLogger: Send + Sync {
    /// Never blocks; may drop low priority records under backpressure.
    fn append(&self, record: Record);

    /// Fill fraction of the queue, `0.0..=1.0`.
    fn queue_level(&self) -> f64;

    fn queue_size(&self) -> usize;
}

/// Historical arrival/departure records for cache warm-up.
#[async_trait]
pub trait ArrivalDepartureSource: Send + Sync {
    async fn query(&self, begin_ms: i64, end_ms: i64) -> Result<Vec<ArrivalDeparture>>;
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn write(&self, records: Vec<Record>) -> Result<()>;
}

/// Keeps everything in memory; used by `inspect` and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<Record>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Record> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write(&self, records: Vec<Record>) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(records);
        Ok(())
    }
}

impl DataLogger for MemorySink {
    fn append(&self, record: Record) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(record);
    }

    fn queue_level(&self) -> f64 {
        0.0
    }

    fn queue_size(&self) -> usize {
        0
    }
}
