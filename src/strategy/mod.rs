//! Travel and dwell time estimators.
//!
//! Each estimator wraps the one it falls back to, the way a client wrapper
//! wraps its inner client. "No data" is never an error: an estimator that
//! cannot answer hands the question to `inner`, and the chain always ends in
//! [`Schedule`], which answers from the static timetable.

mod generator;
mod historical_average;
mod kalman;
mod last_vehicle;
mod rls_dwell;

pub use generator::{GeneratedPredictions, PredictionGenerator, PredictionInput};
pub use historical_average::HistoricalAverageEstimator;
pub use kalman::{KalmanEstimator, KalmanUpdate, kalman_update};
pub use last_vehicle::LastVehicleEstimator;
pub use rls_dwell::RlsDwellEstimator;

use chrono::NaiveDate;

use crate::config::StrategyKind;
use crate::model::{Algorithm, Indices};
use crate::store::{HistoricalStatisticsStore, LastVehicleQuery};

/// Everything an estimator may consult besides the segment itself.
#[derive(Clone, Copy)]
pub struct PredictionContext<'a> {
    pub store: &'a HistoricalStatisticsStore,
    pub vehicle_id: &'a str,
    pub avl_time_ms: i64,
    pub service_date: NaiveDate,
    pub headway_ms: Option<i64>,
}

impl PredictionContext<'_> {
    pub fn last_vehicle_query(&self) -> LastVehicleQuery<'_> {
        LastVehicleQuery {
            vehicle_id: self.vehicle_id,
            service_date: self.service_date,
            now_ms: self.avl_time_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Estimate {
    pub value_ms: i64,
    pub algorithm: Algorithm,
}

impl Estimate {
    pub fn new(value_ms: i64, algorithm: Algorithm) -> Self {
        Self {
            value_ms,
            algorithm,
        }
    }
}

pub trait Estimator: Send + Sync {
    fn algorithm(&self) -> Algorithm;

    /// The estimator consulted when this one has no data.
    fn fallback(&self) -> Option<&dyn Estimator>;

    fn travel_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match self.fallback() {
            Some(inner) => inner.travel_time(indices, ctx),
            None => Schedule.travel_time(indices, ctx),
        }
    }

    fn dwell_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match self.fallback() {
            Some(inner) => inner.dwell_time(indices, ctx),
            None => Schedule.dwell_time(indices, ctx),
        }
    }
}

/// Static timetable values; the end of every chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct Schedule;

impl Estimator for Schedule {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Schedule
    }

    fn fallback(&self) -> Option<&dyn Estimator> {
        None
    }

    fn travel_time(&self, indices: &Indices, _ctx: &PredictionContext<'_>) -> Estimate {
        let value = indices.stop_path().map(|sp| sp.travel_time_ms).unwrap_or(0);
        Estimate::new(value.max(0), Algorithm::Schedule)
    }

    fn dwell_time(&self, indices: &Indices, _ctx: &PredictionContext<'_>) -> Estimate {
        let value = indices.stop_path().map(|sp| sp.dwell_time_ms).unwrap_or(0);
        Estimate::new(value.max(0), Algorithm::Schedule)
    }
}

/// A configured estimator chain.
pub struct PredictionStrategy {
    kind: StrategyKind,
    head: Box<dyn Estimator>,
}

impl PredictionStrategy {
    pub fn from_kind(kind: StrategyKind) -> Self {
        let last_vehicle = LastVehicleEstimator { inner: Schedule };
        let head: Box<dyn Estimator> = match kind {
            StrategyKind::LastVehicle => Box::new(last_vehicle),
            StrategyKind::HistoricalAverage => Box::new(HistoricalAverageEstimator {
                inner: last_vehicle,
            }),
            StrategyKind::Kalman => Box::new(KalmanEstimator {
                inner: HistoricalAverageEstimator {
                    inner: last_vehicle,
                },
            }),
            StrategyKind::RlsDwell => Box::new(RlsDwellEstimator {
                inner: KalmanEstimator {
                    inner: HistoricalAverageEstimator {
                        inner: last_vehicle,
                    },
                },
            }),
        };
        Self { kind, head }
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    /// Consultation order, head first.
    pub fn chain(&self) -> Vec<Algorithm> {
        let mut chain = Vec::new();
        let mut current: Option<&dyn Estimator> = Some(self.head.as_ref());
        while let Some(estimator) = current {
            chain.push(estimator.algorithm());
            current = estimator.fallback();
        }
        if chain.last() != Some(&Algorithm::Schedule) {
            chain.push(Algorithm::Schedule);
        }
        chain
    }

    pub fn travel_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        self.head.travel_time(indices, ctx)
    }

    pub fn dwell_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        self.head.dwell_time(indices, ctx)
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::config::CoreConfig;
    use crate::store::fixtures::store;

    #[test]
    fn test_schedule_is_terminal() {
        let (_, store) = store(CoreConfig::default());
        let ctx = ctx(&store, "v2");
        let indices = indices("t1", 2);

        assert_eq!(
            Schedule.travel_time(&indices, &ctx),
            Estimate::new(120_000, Algorithm::Schedule)
        );
        assert_eq!(
            Schedule.dwell_time(&indices, &ctx),
            Estimate::new(20_000, Algorithm::Schedule)
        );
    }

    #[test]
    fn test_factory_chains() {
        assert_eq!(
            PredictionStrategy::from_kind(StrategyKind::Kalman).chain(),
            vec![
                Algorithm::Kalman,
                Algorithm::HistoricalAverage,
                Algorithm::LastVehicle,
                Algorithm::Schedule
            ]
        );
        assert_eq!(
            PredictionStrategy::from_kind(StrategyKind::LastVehicle).chain(),
            vec![Algorithm::LastVehicle, Algorithm::Schedule]
        );
        let rls = PredictionStrategy::from_kind(StrategyKind::RlsDwell);
        assert_eq!(rls.kind(), StrategyKind::RlsDwell);
        assert_eq!(rls.chain()[0], Algorithm::RlsDwell);
        assert_eq!(rls.chain().len(), 5);
    }

    #[test]
    fn test_chain_ends_in_schedule_exactly_once() {
        for kind in [
            StrategyKind::LastVehicle,
            StrategyKind::HistoricalAverage,
            StrategyKind::Kalman,
            StrategyKind::RlsDwell,
        ] {
            let chain = PredictionStrategy::from_kind(kind).chain();
            assert_eq!(chain.last(), Some(&Algorithm::Schedule), "{kind:?}");
            let schedules = chain.iter().filter(|a| **a == Algorithm::Schedule).count();
            assert_eq!(schedules, 1, "{kind:?}: {chain:?}");
        }
    }

    #[test]
    fn test_empty_store_falls_through_to_schedule() {
        let (_, store) = store(CoreConfig::default());
        let strategy = PredictionStrategy::from_kind(StrategyKind::RlsDwell);
        let ctx = ctx(&store, "v2");

        let travel = strategy.travel_time(&indices("t1", 1), &ctx);
        assert_eq!(travel.algorithm, Algorithm::Schedule);
        let dwell = strategy.dwell_time(&indices("t1", 1), &ctx);
        assert_eq!(dwell, Estimate::new(20_000, Algorithm::Schedule));
    }
}
