//! Periodic sweep that demotes vehicles which stopped reporting.
//!
//! The supervisor keeps its own last-report-time map, guarded by one mutex
//! that is held for the whole sweep. Vehicle locks are taken while that map
//! lock is held, so callers must never call [`TimeoutSupervisor::record_report`]
//! or [`TimeoutSupervisor::remove`] while holding a vehicle lock. Ingestion
//! records a report after updating the vehicle state: a sweep that forgets a
//! vehicle it found unpredictable is always followed by the re-insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::{CoreConfig, secs_to_ms};
use crate::model::{AvlReport, VehicleEvent, VehicleEventKind};
use crate::processor::MatchResultProcessor;
use crate::vehicle::{VehicleState, VehicleStateStore, lock_vehicle};

/// What the sweep decided for one tracked vehicle.
#[derive(Debug, PartialEq)]
enum Verdict {
    Keep,
    /// Stop tracking without touching the vehicle state.
    Forget,
    /// Stop tracking and drop it from the live vehicle cache.
    Evict,
    TimedOut(String),
}

pub struct TimeoutSupervisor {
    config: Arc<CoreConfig>,
    vehicles: Arc<VehicleStateStore>,
    processor: Arc<MatchResultProcessor>,
    clock: Arc<dyn Clock>,
    last_report_ms: Mutex<HashMap<String, i64>>,
}

impl TimeoutSupervisor {
    pub fn new(
        config: Arc<CoreConfig>,
        vehicles: Arc<VehicleStateStore>,
        processor: Arc<MatchResultProcessor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            vehicles,
            processor,
            clock,
            last_report_ms: Mutex::new(HashMap::new()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<String, i64>> {
        self.last_report_ms.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Starts or refreshes tracking of the reporting vehicle.
    pub fn store_avl_report(&self, report: &AvlReport) {
        self.record_report(&report.vehicle_id, report.time_ms);
    }

    /// Tracks `vehicle_id` as last heard from at `time_ms`. An older time
    /// never replaces a newer one.
    pub fn record_report(&self, vehicle_id: &str, time_ms: i64) {
        self.tracked()
            .entry(vehicle_id.to_string())
            .and_modify(|last| *last = (*last).max(time_ms))
            .or_insert(time_ms);
    }

    /// Stops tracking a vehicle. Unknown ids are ignored.
    pub fn remove(&self, vehicle_id: &str) {
        self.tracked().remove(vehicle_id);
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().len()
    }

    pub fn is_tracked(&self, vehicle_id: &str) -> bool {
        self.tracked().contains_key(vehicle_id)
    }

    /// One sweep against the supervisor's clock.
    pub fn sweep(&self) -> Vec<VehicleEvent> {
        self.handle_possible_timeouts(self.clock.now_ms())
    }

    /// One sweep as of `now_ms`. Returns the timeout events it recorded.
    #[tracing::instrument(skip(self))]
    pub fn handle_possible_timeouts(&self, now_ms: i64) -> Vec<VehicleEvent> {
        let mut events = Vec::new();
        let mut tracked = self.tracked();

        tracked.retain(|vehicle_id, last_report_ms| {
            let Some(handle) = self.vehicles.find(vehicle_id) else {
                debug!(%vehicle_id, "Tracked vehicle has no state, forgetting it");
                return false;
            };
            let mut state = lock_vehicle(&handle);
            // the state may hold a report the map has not caught up with yet
            if let Some(report) = state.last_avl_report() {
                *last_report_ms = (*last_report_ms).max(report.time_ms);
            }

            match self.verdict(&state, *last_report_ms, now_ms) {
                Verdict::Keep => true,
                Verdict::Forget => false,
                Verdict::Evict => {
                    self.processor.remove_from_vehicle_data_cache(vehicle_id);
                    false
                }
                Verdict::TimedOut(description) => {
                    events.push(self.time_out(&mut state, &description, now_ms));
                    false
                }
            }
        });

        if !events.is_empty() {
            info!(timed_out = events.len(), remaining = tracked.len(), "Timeout sweep");
        }
        events
    }

    fn verdict(&self, state: &VehicleState, last_report_ms: i64, now_ms: i64) -> Verdict {
        let config = &self.config;
        let silence_ms = secs_to_ms(config.allowable_no_avl_secs);
        let silent = now_ms > last_report_ms.saturating_add(silence_ms);

        if !state.is_predictable() {
            if !config.remove_timed_out_vehicles_from_vehicle_data_cache {
                return Verdict::Forget;
            }
            return if silent { Verdict::Evict } else { Verdict::Keep };
        }

        if state.is_for_schedule_based_preds() {
            let departure_ms = state.trip().zip(state.temporal_match()).and_then(|(trip, m)| {
                trip.scheduled_time_ms(0, m.service_day_start_ms)
            });
            let Some(departure_ms) = departure_ms else {
                return Verdict::Keep;
            };
            let limit_ms = departure_ms.saturating_add(secs_to_ms(config.sched_based_timeout_secs));
            return if now_ms > limit_ms {
                Verdict::TimedOut(format!(
                    "Schedule based vehicle {}s past its scheduled departure",
                    (now_ms - departure_ms) / 1000
                ))
            } else {
                Verdict::Keep
            };
        }

        if !silent {
            return Verdict::Keep;
        }
        let silence = format!("No AVL report for {}s", (now_ms - last_report_ms) / 1000);

        if !state.is_at_wait_stop() {
            return Verdict::TimedOut(silence);
        }

        let Some((trip, temporal_match)) = state.trip().zip(state.temporal_match()) else {
            return Verdict::TimedOut(silence);
        };
        if trip.frequency_based {
            return Verdict::TimedOut(silence);
        }
        let departure_ms = temporal_match
            .at_stop(trip, config.default_stop_radius_m)
            .and_then(|i| trip.scheduled_time_ms(i, temporal_match.service_day_start_ms));
        match departure_ms {
            Some(departure_ms)
                if now_ms
                    > departure_ms.saturating_add(secs_to_ms(
                        config.allowable_no_avl_after_sched_depart_secs,
                    )) =>
            {
                Verdict::TimedOut(format!(
                    "{silence} and {}s past scheduled wait stop departure",
                    (now_ms - departure_ms) / 1000
                ))
            }
            _ => Verdict::Keep,
        }
    }

    fn time_out(&self, state: &mut VehicleState, description: &str, now_ms: i64) -> VehicleEvent {
        let event = state.make_unpredictable(VehicleEventKind::Timeout, description, now_ms);
        let event = self.processor.after_unpredictable(state, event);
        if self.config.remove_timed_out_vehicles_from_vehicle_data_cache {
            self.processor.remove_from_vehicle_data_cache(state.vehicle_id());
        }
        event
    }

    /// Sweeps every `polling_rate_secs` until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.polling_rate_secs.max(1));
        info!(polling_rate_secs = period.as_secs(), "Timeout supervisor started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(period) => {
                    self.sweep();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Timeout supervisor stopped");
    }
}
