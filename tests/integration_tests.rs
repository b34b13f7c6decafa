use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use transit_predictor::clock::VirtualClock;
use transit_predictor::config::{CoreConfig, StrategyKind};
use transit_predictor::engine::{Engine, MatchedReport};
use transit_predictor::model::{Algorithm, ArrivalDeparture, AvlReport, TemporalMatch};
use transit_predictor::model::VehicleEventKind;
use transit_predictor::persistence::{ArrivalDepartureSource, MemorySink, Record};
use transit_predictor::schedule::{InMemorySchedule, StopPathSchedule, TripSchedule};
use transit_predictor::store::StopPathCacheKey;

const DAY_START_MS: i64 = 1_709_510_400_000; // 2024-03-04T00:00:00Z
const DAY_MS: i64 = 24 * 3600 * 1000;

fn secs(s: i64) -> i64 {
    DAY_START_MS + s * 1000
}

/// Four stops 120 s apart with 20 s dwells; s0 is a wait stop departing at
/// `first_departure_secs`.
fn trip(trip_id: &str, first_departure_secs: u32) -> TripSchedule {
    TripSchedule {
        trip_id: trip_id.to_string(),
        route_id: "r1".to_string(),
        direction_id: Some("0".to_string()),
        block_id: format!("block-{trip_id}"),
        service_id: "wk".to_string(),
        frequency_based: false,
        start_time_secs: first_departure_secs,
        stop_paths: (0..4)
            .map(|i| StopPathSchedule {
                stop_id: format!("s{i}"),
                travel_time_ms: if i == 0 { 0 } else { 120_000 },
                dwell_time_ms: 20_000,
                scheduled_time_secs: first_departure_secs + i * 140,
                wait_stop: i == 0,
                stop_radius_m: None,
            })
            .collect(),
    }
}

fn engine(config: CoreConfig, start_ms: i64) -> (Arc<VirtualClock>, Arc<MemorySink>, Engine) {
    let mut schedule = InMemorySchedule::new();
    schedule.add_trip(trip("t1", 8 * 3600));
    schedule.add_trip(trip("early", 1000));
    let clock = Arc::new(VirtualClock::new(start_ms));
    let sink = Arc::new(MemorySink::new());
    let engine = Engine::new(config, Arc::new(schedule), sink.clone(), clock.clone());
    (clock, sink, engine)
}

fn matched(vehicle_id: &str, time_ms: i64, trip_id: &str, index: usize, along: f64) -> MatchedReport {
    MatchedReport {
        report: AvlReport {
            vehicle_id: vehicle_id.to_string(),
            time_ms,
            lat: 42.35,
            lon: -71.06,
            ignore_because_in_consist: false,
        },
        temporal_match: Some(TemporalMatch {
            trip_id: trip_id.to_string(),
            block_id: format!("block-{trip_id}"),
            service_day_start_ms: DAY_START_MS,
            stop_path_index: index,
            distance_along_path_m: along,
            stop_path_length_m: 500.0,
        }),
        schedule_based: false,
    }
}

fn predictable(engine: &Engine, vehicle_id: &str) -> bool {
    engine
        .vehicles()
        .with_vehicle(vehicle_id, |state| state.is_predictable())
}

#[test]
fn test_silent_vehicle_times_out_on_next_sweep() {
    let mut config = CoreConfig::default();
    config.allowable_no_avl_secs = 300;
    let t0 = secs(8 * 3600);
    let (clock, _, engine) = engine(config, t0);
    engine.process_report(matched("v1", t0, "t1", 1, 250.0)).unwrap();

    clock.set(t0 + 299_000);
    assert!(engine.sweep_timeouts().is_empty());
    assert!(predictable(&engine, "v1"));

    clock.set(t0 + 301_000);
    assert_eq!(engine.sweep_timeouts().len(), 1);
    assert!(!predictable(&engine, "v1"));
    assert!(engine.predictions_service().for_vehicle("v1").is_empty());
}

#[test]
fn test_wait_stop_vehicle_kept_until_departure_grace() {
    let mut config = CoreConfig::default();
    config.allowable_no_avl_secs = 300;
    config.allowable_no_avl_after_sched_depart_secs = 120;
    let (clock, _, engine) = engine(config, secs(700));
    // laying over at s0 of "early", which departs at 1000 s
    engine
        .process_report(matched("v1", secs(700), "early", 1, 0.0))
        .unwrap();

    clock.set(secs(1119));
    assert!(engine.sweep_timeouts().is_empty());
    assert!(predictable(&engine, "v1"));

    clock.set(secs(1121));
    let events = engine.sweep_timeouts();
    assert_eq!(events.len(), 1);
    assert!(events[0].description.contains("wait stop"));
    assert!(!predictable(&engine, "v1"));
}

#[test]
fn test_matches_at_stops_are_not_persisted() {
    let t0 = secs(8 * 3600 + 60);
    let (_, sink, engine) = engine(CoreConfig::default(), t0);
    let stored = |sink: &MemorySink, vehicle_id: &str| {
        sink.records()
            .iter()
            .any(|r| matches!(r, Record::Match(m) if m.vehicle_id == vehicle_id))
    };

    // s1 radius is 25 m from the end of a 500 m path
    engine.process_report(matched("at", t0, "t1", 1, 475.0)).unwrap();
    engine.process_report(matched("before", t0, "t1", 1, 474.0)).unwrap();
    engine.process_report(matched("after", t0, "t1", 2, 26.0)).unwrap();

    assert!(!stored(&sink, "at"));
    assert!(stored(&sink, "before"));
    assert!(stored(&sink, "after"));
}

#[test]
fn test_stop_path_prediction_round_trip() {
    let mut config = CoreConfig::default();
    config.store_travel_time_stop_path_predictions = true;
    let t0 = secs(8 * 3600 + 60);
    let (_, sink, engine) = engine(config, t0);
    engine.process_report(matched("v1", t0, "t1", 1, 250.0)).unwrap();

    let written = sink
        .records()
        .into_iter()
        .find_map(|r| match r {
            Record::PredictionForStopPath(p) if p.travel_time && p.stop_path_index == 2 => Some(p),
            _ => None,
        })
        .unwrap();
    let read = engine
        .store()
        .stop_path_prediction(&StopPathCacheKey::travel("t1", 2))
        .unwrap();

    assert_eq!(read.algorithm, written.algorithm);
    assert_eq!(read.prediction_time_ms, written.prediction_time_ms);
    assert_eq!(read.algorithm, Algorithm::Schedule);
}

struct History(Vec<ArrivalDeparture>);

#[async_trait]
impl ArrivalDepartureSource for History {
    async fn query(&self, begin_ms: i64, end_ms: i64) -> Result<Vec<ArrivalDeparture>> {
        Ok(self
            .0
            .iter()
            .filter(|e| e.time_ms >= begin_ms && e.time_ms < end_ms)
            .cloned()
            .collect())
    }
}

/// One run of t1 on the service day `days_ago` before 2024-03-04, taking
/// 100 s from s0 to s1.
fn past_run(days_ago: i64) -> Vec<ArrivalDeparture> {
    let day_start = DAY_START_MS - days_ago * DAY_MS;
    let service_date = NaiveDate::from_ymd_opt(2024, 3, 4)
        .and_then(|d| d.checked_sub_days(chrono::Days::new(days_ago as u64)))
        .unwrap();
    let event = |index: usize, offset_secs: i64, is_arrival: bool| ArrivalDeparture {
        vehicle_id: format!("old{days_ago}"),
        trip_id: "t1".to_string(),
        route_id: "r1".to_string(),
        direction_id: Some("0".to_string()),
        block_id: "block-t1".to_string(),
        stop_id: format!("s{index}"),
        stop_path_index: index,
        time_ms: day_start + (8 * 3600 + offset_secs) * 1000,
        is_arrival,
        service_date,
        trip_start_time_secs: 8 * 3600,
        frequency_based: false,
        scheduled_time_ms: None,
    };
    vec![event(0, 0, false), event(1, 100, true), event(1, 120, false)]
}

async fn travel_algorithm_after_warm_up(days: i64) -> (Algorithm, i64) {
    let mut config = CoreConfig::default();
    config.prediction_strategy = StrategyKind::HistoricalAverage;
    config.min_historical_samples = 3;
    config.store_travel_time_stop_path_predictions = true;
    let t0 = secs(8 * 3600);
    let (_, _, engine) = engine(config, t0);

    let history = History((1..=days).flat_map(past_run).collect());
    engine.warm_up(&history).await.unwrap();
    // leaving s0
    engine.process_report(matched("v1", t0, "t1", 1, 0.0)).unwrap();

    let p = engine
        .store()
        .stop_path_prediction(&StopPathCacheKey::travel("t1", 1))
        .unwrap();
    (p.algorithm, p.prediction_time_ms)
}

#[tokio::test]
async fn test_historical_average_needs_min_samples() {
    assert_eq!(travel_algorithm_after_warm_up(2).await, (Algorithm::Schedule, 120_000));
    assert_eq!(
        travel_algorithm_after_warm_up(3).await,
        (Algorithm::HistoricalAverage, 100_000)
    );
}

#[test]
fn test_concurrent_ingestion_never_shows_partial_lists() {
    let t0 = secs(8 * 3600);
    let (_, _, engine) = engine(CoreConfig::default(), t0);
    let vehicles: Vec<String> = (0..8).map(|i| format!("v{i}")).collect();

    std::thread::scope(|scope| {
        for vehicle_id in &vehicles {
            let engine = &engine;
            scope.spawn(move || {
                for step in 0..50 {
                    let along = 10.0 + f64::from(step) * 8.0;
                    engine
                        .process_report(matched(vehicle_id, t0 + i64::from(step) * 1000, "t1", 1, along))
                        .unwrap();
                }
            });
        }

        let engine = &engine;
        scope.spawn(move || {
            let service = engine.predictions_service();
            for _ in 0..200 {
                let at_s3 = service.for_stop("r1", "s3");
                let mut ids: Vec<_> = at_s3.iter().map(|p| p.vehicle_id.as_str()).collect();
                let n = ids.len();
                ids.sort_unstable();
                ids.dedup();
                assert_eq!(ids.len(), n, "a vehicle appeared twice for one stop");
            }
        });
    });

    assert_eq!(engine.predictions_service().for_stop("r1", "s3").len(), vehicles.len());
}

#[test]
fn test_first_reports_racing_sweeps_are_never_orphaned() {
    let t0 = secs(8 * 3600);
    let (clock, _, engine) = engine(CoreConfig::default(), t0);
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        let ingesters: Vec<_> = (0..4)
            .map(|worker| {
                let engine = &engine;
                scope.spawn(move || {
                    for i in 0..500 {
                        let vehicle_id = format!("v{worker}-{i}");
                        engine
                            .process_report(matched(&vehicle_id, t0, "t1", 1, 250.0))
                            .unwrap();
                    }
                })
            })
            .collect();

        let (engine, done) = (&engine, &done);
        scope.spawn(move || {
            while !done.load(Ordering::Relaxed) {
                engine.sweep_timeouts();
            }
        });

        for handle in ingesters {
            handle.join().unwrap();
        }
        done.store(true, Ordering::Relaxed);
    });

    let ids = engine.vehicles().vehicle_ids();
    assert_eq!(ids.len(), 2000);
    for id in &ids {
        assert!(predictable(&engine, id));
        assert!(engine.supervisor().is_tracked(id), "{id} predictable but untracked");
    }

    clock.set(t0 + 3600 * 1000);
    assert_eq!(engine.sweep_timeouts().len(), 2000);
    assert!(ids.iter().all(|id| !predictable(&engine, id)));
}

#[test]
fn test_consist_follower_reports_change_nothing() {
    let t0 = secs(8 * 3600);
    let (clock, sink, engine) = engine(CoreConfig::default(), t0);
    let mut follower = matched("f1", t0, "t1", 1, 250.0);
    follower.report.ignore_because_in_consist = true;

    let outcome = engine.process_report(follower).unwrap();
    assert_eq!(outcome.predictions, 0);
    assert!(!engine.supervisor().is_tracked("f1"));

    clock.set(t0 + 3600 * 1000);
    assert!(engine.sweep_timeouts().is_empty());
    let events: Vec<VehicleEventKind> = sink
        .records()
        .into_iter()
        .filter_map(|r| match r {
            Record::VehicleEvent(e) => Some(e.kind),
            _ => None,
        })
        .collect();
    assert!(events.is_empty(), "{events:?}");
    assert!(engine.predictions_service().for_vehicle("f1").is_empty());
}

#[test]
fn test_excluded_route_events_persisted_but_not_learned() {
    let mut config = CoreConfig::default();
    config.excluded_routes = vec!["r1".to_string()];
    let t0 = secs(8 * 3600);
    let (_, sink, engine) = engine(config, t0);

    // at s1, then at s2
    engine.process_report(matched("v1", t0, "t1", 1, 500.0)).unwrap();
    let outcome = engine
        .process_report(matched("v1", t0 + 140_000, "t1", 2, 500.0))
        .unwrap();
    assert_eq!(outcome.arrivals_departures.len(), 2);

    let persisted = sink
        .records()
        .iter()
        .filter(|r| matches!(r, Record::ArrivalDeparture(_)))
        .count();
    assert_eq!(persisted, outcome.arrivals_departures.len());

    let store = engine.store();
    assert!(store.schedule_based_average_keys().is_empty());
    assert!(store.frequency_based_average_keys().is_empty());
    assert!(store.trip_history().keys().is_empty());
    assert!(store.stop_history().keys().is_empty());
}
