//! Offline replay of matched AVL reports on a virtual clock.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

use crate::clock::VirtualClock;
use crate::config::secs_to_ms;
use crate::engine::{Engine, MatchedReport};
use crate::model::{AvlReport, TemporalMatch};

/// One line of a replay file. Rows with an empty `trip_id` are reports the
/// matcher could not place.
#[derive(Debug, Clone, Deserialize)]
pub struct ReportRow {
    pub vehicle_id: String,
    pub time_ms: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub trip_id: Option<String>,
    #[serde(default)]
    pub block_id: Option<String>,
    #[serde(default)]
    pub service_day_start_ms: Option<i64>,
    #[serde(default)]
    pub stop_path_index: Option<usize>,
    #[serde(default)]
    pub distance_along_path_m: Option<f64>,
    #[serde(default)]
    pub stop_path_length_m: Option<f64>,
    #[serde(default)]
    pub schedule_based: bool,
    #[serde(default)]
    pub ignore_because_in_consist: bool,
}

impl From<ReportRow> for MatchedReport {
    fn from(row: ReportRow) -> Self {
        let temporal_match = match (
            row.trip_id.filter(|t| !t.is_empty()),
            row.service_day_start_ms,
            row.stop_path_index,
        ) {
            (Some(trip_id), Some(service_day_start_ms), Some(stop_path_index)) => Some(TemporalMatch {
                block_id: row.block_id.unwrap_or_default(),
                trip_id,
                service_day_start_ms,
                stop_path_index,
                distance_along_path_m: row.distance_along_path_m.unwrap_or(0.0),
                stop_path_length_m: row.stop_path_length_m.unwrap_or(0.0),
            }),
            _ => None,
        };
        MatchedReport {
            report: AvlReport {
                vehicle_id: row.vehicle_id,
                time_ms: row.time_ms,
                lat: row.lat,
                lon: row.lon,
                ignore_because_in_consist: row.ignore_because_in_consist,
            },
            temporal_match,
            schedule_based: row.schedule_based,
        }
    }
}

/// Reads a replay file, oldest report first.
pub fn read_reports(path: &Path) -> Result<Vec<ReportRow>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut rdr = csv::Reader::from_reader(file);
    let mut rows = Vec::new();
    for result in rdr.deserialize() {
        let row: ReportRow = result.with_context(|| format!("parsing {}", path.display()))?;
        rows.push(row);
    }
    rows.sort_by_key(|r| r.time_ms);
    Ok(rows)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub reports: usize,
    pub matched: usize,
    pub rejected: usize,
    pub predictions: usize,
    pub arrivals_departures: usize,
    pub timeouts: usize,
    pub queue_backed_up: bool,
}

/// Feeds `rows` through `engine`, advancing `clock` to each report and
/// sweeping for timeouts every polling interval of virtual time.
#[tracing::instrument(skip_all, fields(reports = rows.len()))]
pub fn replay(engine: &Engine, clock: &VirtualClock, rows: Vec<ReportRow>) -> ReplaySummary {
    let poll_ms = secs_to_ms(engine.config().polling_rate_secs.max(1));
    let mut summary = ReplaySummary::default();
    let mut next_sweep_ms = rows.first().map(|r| r.time_ms.saturating_add(poll_ms));

    for row in rows {
        while let Some(sweep_ms) = next_sweep_ms.filter(|s| *s <= row.time_ms) {
            clock.advance_to(sweep_ms);
            summary.timeouts += engine.sweep_timeouts().len();
            summary.queue_backed_up |= engine.check_queue();
            next_sweep_ms = Some(sweep_ms.saturating_add(poll_ms));
        }
        clock.advance_to(row.time_ms);

        let input = MatchedReport::from(row);
        summary.reports += 1;
        if input.temporal_match.is_some() {
            summary.matched += 1;
        }
        let vehicle_id = input.report.vehicle_id.clone();
        match engine.process_report(input) {
            Ok(outcome) => {
                summary.predictions += outcome.predictions;
                summary.arrivals_departures += outcome.arrivals_departures.len();
            }
            Err(e) => {
                warn!(%vehicle_id, error = %e, "Report rejected");
                summary.rejected += 1;
            }
        }
    }

    if let Some(sweep_ms) = next_sweep_ms {
        clock.advance_to(sweep_ms);
        summary.timeouts += engine.sweep_timeouts().len();
    }
    info!(?summary, "Replay finished");
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::persistence::MemorySink;
    use crate::schedule::fixtures as schedule_fixtures;
    use crate::store::fixtures::DAY_START_MS;
    use std::fs;
    use std::sync::Arc;

    const HEADER: &str = "vehicle_id,time_ms,lat,lon,trip_id,block_id,service_day_start_ms,stop_path_index,distance_along_path_m,stop_path_length_m,schedule_based,ignore_because_in_consist";

    fn row(vehicle_id: &str, offset_secs: i64, index: usize, along: f64) -> String {
        format!(
            "{vehicle_id},{},42.35,-71.06,t1,block-t1,{DAY_START_MS},{index},{along},500,false,false",
            DAY_START_MS + (8 * 3600 + offset_secs) * 1000
        )
    }

    #[test]
    fn test_read_reports_sorts_and_parses_unmatched() {
        let path = std::env::temp_dir().join("transit_predictor_read_reports.csv");
        let unmatched = format!("v2,{},42.35,-71.06,,,,,,,false,false", DAY_START_MS);
        fs::write(&path, format!("{HEADER}\n{}\n{unmatched}\n", row("v1", 60, 1, 10.0))).unwrap();

        let rows = read_reports(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vehicle_id, "v2");
        assert!(MatchedReport::from(rows[0].clone()).temporal_match.is_none());
        assert_eq!(
            MatchedReport::from(rows[1].clone()).temporal_match.unwrap().stop_path_index,
            1
        );
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_replay_sweeps_on_virtual_time() {
        let path = std::env::temp_dir().join("transit_predictor_replay.csv");
        // v1 drives s0 -> s2, v2 reports once and goes silent
        let lines = [
            row("v1", 0, 1, 500.0),
            row("v2", 0, 1, 100.0),
            row("v1", 140, 2, 490.0),
            row("v1", 400, 3, 100.0),
            row("v1", 700, 3, 300.0),
        ];
        fs::write(&path, format!("{HEADER}\n{}\n", lines.join("\n"))).unwrap();

        let clock = Arc::new(VirtualClock::new(DAY_START_MS));
        let engine = Engine::new(
            CoreConfig::default(),
            Arc::new(schedule_fixtures::schedule()),
            Arc::new(MemorySink::new()),
            clock.clone(),
        );
        let summary = replay(&engine, &clock, read_reports(&path).unwrap());

        assert_eq!(summary.reports, 5);
        assert_eq!(summary.rejected, 0);
        assert!(summary.arrivals_departures >= 2);
        // v2 silent for more than 360 s by the sweep after 08:11:40
        assert_eq!(summary.timeouts, 1);
        assert!(!engine.vehicles().with_vehicle("v2", |s| s.is_predictable()));
        let _ = fs::remove_file(&path);
    }
}
