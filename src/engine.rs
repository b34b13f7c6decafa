//! Wires the stores, the processor and the supervisor together and exposes
//! the ingestion path.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::live_cache::LiveVehicleCache;
use crate::model::{AvlReport, TemporalMatch, VehicleEvent};
use crate::persistence::{ArrivalDepartureSource, DataLogger, QueueMonitor};
use crate::predictions::ActivePredictionIndex;
use crate::processor::{MatchResultProcessor, ProcessOutcome};
use crate::query::{CacheQueryService, PredictionsService, VehiclesService};
use crate::schedule::ScheduleProvider;
use crate::store::HistoricalStatisticsStore;
use crate::strategy::{PredictionGenerator, PredictionStrategy};
use crate::timeout::TimeoutSupervisor;
use crate::vehicle::{VehicleStateStore, lock_vehicle};

/// A report together with what the external matcher made of it.
#[derive(Debug, Clone)]
pub struct MatchedReport {
    pub report: AvlReport,
    /// `None` when the matcher could not place the vehicle.
    pub temporal_match: Option<TemporalMatch>,
    /// Assignment made by the auto-assigner without a real vehicle behind it.
    pub schedule_based: bool,
}

pub struct Engine {
    config: Arc<CoreConfig>,
    clock: Arc<dyn Clock>,
    schedule: Arc<dyn ScheduleProvider>,
    store: Arc<HistoricalStatisticsStore>,
    vehicles: Arc<VehicleStateStore>,
    index: Arc<ActivePredictionIndex>,
    live_cache: Arc<LiveVehicleCache>,
    logger: Arc<dyn DataLogger>,
    queue_monitor: QueueMonitor,
    processor: Arc<MatchResultProcessor>,
    supervisor: Arc<TimeoutSupervisor>,
}

impl Engine {
    pub fn new(
        config: CoreConfig,
        schedule: Arc<dyn ScheduleProvider>,
        logger: Arc<dyn DataLogger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(HistoricalStatisticsStore::new(config.clone(), clock.clone()));
        let vehicles = Arc::new(VehicleStateStore::new());
        let index = Arc::new(ActivePredictionIndex::new());
        let live_cache = Arc::new(LiveVehicleCache::new());

        let strategy = PredictionStrategy::from_kind(config.prediction_strategy);
        info!(chain = ?strategy.chain(), "Prediction strategy selected");
        let generator = PredictionGenerator::new(strategy, store.clone(), clock.clone());

        let processor = Arc::new(MatchResultProcessor::new(
            config.clone(),
            store.clone(),
            generator,
            index.clone(),
            logger.clone(),
            live_cache.clone(),
            clock.clone(),
        ));
        let supervisor = Arc::new(TimeoutSupervisor::new(
            config.clone(),
            vehicles.clone(),
            processor.clone(),
            clock.clone(),
        ));
        let queue_monitor = QueueMonitor::new(config.max_queue_fraction, config.max_queue_fraction_gap);

        Self {
            config,
            clock,
            schedule,
            store,
            vehicles,
            index,
            live_cache,
            logger,
            queue_monitor,
            processor,
            supervisor,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<HistoricalStatisticsStore> {
        &self.store
    }

    pub fn vehicles(&self) -> &Arc<VehicleStateStore> {
        &self.vehicles
    }

    pub fn supervisor(&self) -> &Arc<TimeoutSupervisor> {
        &self.supervisor
    }

    /// Replays the configured number of days of history into the caches.
    #[tracing::instrument(skip(self, source))]
    pub async fn warm_up(&self, source: &dyn ArrivalDepartureSource) -> Result<usize> {
        let end_ms = self.clock.now_ms();
        let begin_ms = end_ms - i64::from(self.config.warmup_days) * 24 * 3600 * 1000;
        let applied = self.store.populate_from(source, begin_ms, end_ms).await?;
        info!(applied, days = self.config.warmup_days, "Warm-up complete");
        Ok(applied)
    }

    /// Runs one report through the ingestion path.
    ///
    /// The vehicle lock is held for the whole match and processing cycle. The
    /// supervisor learns about the report only after that lock is released,
    /// so a sweep never sees the report before the state it produced.
    pub fn process_report(&self, input: MatchedReport) -> Result<ProcessOutcome, CoreError> {
        let MatchedReport {
            report,
            temporal_match,
            schedule_based,
        } = input;
        if report.ignore_because_in_consist {
            debug!(vehicle_id = %report.vehicle_id, "Non-lead vehicle of consist, ignoring report");
            return Ok(ProcessOutcome::default());
        }
        let trip = match &temporal_match {
            Some(m) => Some(
                self.schedule
                    .trip(&m.trip_id)
                    .ok_or_else(|| CoreError::UnknownTrip(m.trip_id.clone()))?,
            ),
            None => None,
        };

        let vehicle_id = report.vehicle_id.clone();
        let time_ms = report.time_ms;
        let handle = self.vehicles.get(&vehicle_id);
        let outcome = {
            let mut state = lock_vehicle(&handle);
            match (temporal_match, trip) {
                (Some(temporal_match), Some(trip)) => {
                    if let Some(event) = state.set_match(report, temporal_match, trip) {
                        self.processor.record_event(event);
                    }
                    state.set_for_schedule_based_preds(schedule_based);
                    self.processor.process(&mut state)
                }
                _ => {
                    debug!(%vehicle_id, "Report without match");
                    if let Some(event) = state.set_unmatched_report(report) {
                        self.processor.after_unpredictable(&state, event);
                    }
                    Ok(ProcessOutcome::default())
                }
            }
        };

        self.supervisor.record_report(&vehicle_id, time_ms);
        outcome
    }

    /// Administrative unassignment. `None` when the vehicle is unknown.
    pub fn unassign(&self, vehicle_id: &str) -> Option<VehicleEvent> {
        let handle = self.vehicles.find(vehicle_id)?;
        let event = {
            let mut state = lock_vehicle(&handle);
            self.processor.unassign(&mut state)
        };
        self.supervisor.remove(vehicle_id);
        Some(event)
    }

    /// One timeout sweep at the engine clock's current time.
    pub fn sweep_timeouts(&self) -> Vec<VehicleEvent> {
        self.supervisor.sweep()
    }

    /// Whether the persistence queue is past its fill threshold.
    pub fn check_queue(&self) -> bool {
        self.queue_monitor.check(self.logger.as_ref())
    }

    /// Starts the periodic timeout sweep on the runtime.
    pub fn spawn_supervisor(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.supervisor.clone().run(shutdown))
    }

    pub fn predictions_service(&self) -> PredictionsService {
        PredictionsService::new(self.config.clone(), self.index.clone(), self.clock.clone())
    }

    pub fn cache_query_service(&self) -> CacheQueryService {
        CacheQueryService::new(self.store.clone(), self.clock.clone())
    }

    pub fn vehicles_service(&self) -> VehiclesService {
        VehiclesService::new(self.live_cache.clone())
    }
}
