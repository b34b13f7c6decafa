//! CSV file persistence: one append-only file per record kind.

use anyhow::{Context, Result};
use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::{ArrivalDepartureSource, Record, RecordSink};
use crate::model::{
    ArrivalDeparture, Headway, Prediction, PredictionForStopPath, SpatialMatch, VehicleEvent,
};

/// Appends rows to a CSV file, writing the header only when the file is new.
pub fn append_records<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, rows = rows.len(), "Appending CSV records");

    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;

    Ok(())
}

#[derive(Debug, Clone)]
pub struct CsvRecordSink {
    dir: PathBuf,
}

impl CsvRecordSink {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, kind: &str) -> PathBuf {
        self.dir.join(format!("{kind}.csv"))
    }
}

#[derive(Default)]
struct Batches {
    arrival_departures: Vec<ArrivalDeparture>,
    vehicle_events: Vec<VehicleEvent>,
    headways: Vec<Headway>,
    matches: Vec<SpatialMatch>,
    predictions: Vec<Prediction>,
    stop_path_predictions: Vec<PredictionForStopPath>,
}

#[async_trait]
impl RecordSink for CsvRecordSink {
    async fn write(&self, records: Vec<Record>) -> Result<()> {
        let mut b = Batches::default();
        for record in records {
            match record {
                Record::ArrivalDeparture(r) => b.arrival_departures.push(r),
                Record::VehicleEvent(r) => b.vehicle_events.push(r),
                Record::Headway(r) => b.headways.push(r),
                Record::Match(r) => b.matches.push(r),
                Record::Prediction(r) => b.predictions.push(r),
                Record::PredictionForStopPath(r) => b.stop_path_predictions.push(r),
            }
        }

        append_records(&self.path_for("arrival_departures"), &b.arrival_departures)?;
        append_records(&self.path_for("vehicle_events"), &b.vehicle_events)?;
        append_records(&self.path_for("headways"), &b.headways)?;
        append_records(&self.path_for("matches"), &b.matches)?;
        append_records(&self.path_for("predictions"), &b.predictions)?;
        append_records(&self.path_for("prediction_for_stop_paths"), &b.stop_path_predictions)?;
        Ok(())
    }
}

/// Reads arrival/departure history written by [`CsvRecordSink`].
#[derive(Debug, Clone)]
pub struct CsvArrivalDepartureSource {
    path: PathBuf,
}

impl CsvArrivalDepartureSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ArrivalDepartureSource for CsvArrivalDepartureSource {
    async fn query(&self, begin_ms: i64, end_ms: i64) -> Result<Vec<ArrivalDeparture>> {
        if !self.path.exists() {
            warn!(path = %self.path.display(), "No arrival/departure history found");
            return Ok(Vec::new());
        }

        let mut reader = ReaderBuilder::new()
            .from_path(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;

        let mut events = Vec::new();
        for row in reader.deserialize::<ArrivalDeparture>() {
            let event = row.with_context(|| format!("parsing {}", self.path.display()))?;
            if event.time_ms >= begin_ms && event.time_ms < end_ms {
                events.push(event);
            }
        }
        Ok(events)
    }
}
