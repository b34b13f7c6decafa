use tracing::trace;

use super::{Estimate, Estimator, PredictionContext};
use crate::model::{Algorithm, Indices};

/// Conditions dwell time on the current headway for frequency based
/// service, using the per stop path RLS model. Travel times and every
/// case the model cannot serve go to `inner`.
#[derive(Debug, Clone, Copy)]
pub struct RlsDwellEstimator<E> {
    pub inner: E,
}

fn from_model(parent: Estimate, predicted_ms: Option<i64>) -> Estimate {
    match predicted_ms {
        Some(ms) => Estimate::new(ms.max(0), Algorithm::RlsDwell),
        None => parent,
    }
}

impl<E: Estimator> Estimator for RlsDwellEstimator<E> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::RlsDwell
    }

    fn fallback(&self) -> Option<&dyn Estimator> {
        Some(&self.inner)
    }

    fn dwell_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        let parent = self.inner.dwell_time(indices, ctx);
        if !indices.trip().frequency_based || parent.value_ms <= 0 {
            return parent;
        }
        let Some(headway_ms) = ctx.headway_ms else {
            trace!(%indices, "No headway, using parent dwell estimate");
            return parent;
        };

        let key = ctx.store.stop_path_key(
            indices.trip_id(),
            indices.stop_path_index(),
            false,
            true,
            ctx.avl_time_ms,
        );
        let predicted = ctx
            .store
            .dwell_models()
            .predict_dwell_time_ms(&key, headway_ms);
        from_model(parent, predicted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use crate::schedule::fixtures as schedule_fixtures;
    use crate::store::fixtures::{DAY_START_MS, pass, store};
    use crate::strategy::fixtures::ctx;
    use crate::strategy::{
        HistoricalAverageEstimator, KalmanEstimator, LastVehicleEstimator, Schedule,
    };
    use std::sync::Arc;

    type Chain =
        RlsDwellEstimator<KalmanEstimator<HistoricalAverageEstimator<LastVehicleEstimator<Schedule>>>>;

    fn estimator() -> Chain {
        RlsDwellEstimator {
            inner: KalmanEstimator {
                inner: HistoricalAverageEstimator {
                    inner: LastVehicleEstimator { inner: Schedule },
                },
            },
        }
    }

    fn frequency_indices(trip_id: &str, index: usize) -> Indices {
        let mut trip = schedule_fixtures::trip(trip_id, "r1");
        trip.frequency_based = true;
        Indices::new(Arc::new(trip), index)
    }

    fn seeded_store() -> crate::store::HistoricalStatisticsStore {
        let mut config = CoreConfig::default();
        config.dwell_model_min_samples = 1;
        let (_, store) = store(config);
        for (vehicle, trip, offset, dwell) in [("v1", "t1", 0, 20), ("v2", "t2", 600, 30)] {
            for mut e in pass(vehicle, trip, offset, 100, dwell) {
                e.frequency_based = true;
                store.put_arrival_departure(&e);
            }
        }
        store
    }

    #[test]
    fn test_headway_conditions_dwell() {
        let store = seeded_store();
        let mut ctx = ctx(&store, "v9");
        // same 180 s bucket as v2's departure at 08:12:10
        ctx.avl_time_ms = DAY_START_MS + (8 * 3600 + 780) * 1000;
        ctx.headway_ms = Some(600_000);

        let dwell = estimator().dwell_time(&frequency_indices("t2", 1), &ctx);
        assert_eq!(dwell.algorithm, Algorithm::RlsDwell);
        assert!((29_000..=30_000).contains(&dwell.value_ms), "{dwell:?}");
    }

    #[test]
    fn test_unknown_headway_degrades_to_parent() {
        let store = seeded_store();
        let mut ctx = ctx(&store, "v9");
        ctx.avl_time_ms = DAY_START_MS + (8 * 3600 + 780) * 1000;

        let dwell = estimator().dwell_time(&frequency_indices("t2", 1), &ctx);
        assert_eq!(dwell, Estimate::new(30_000, Algorithm::LastVehicle));
    }

    #[test]
    fn test_schedule_based_trip_is_not_conditioned() {
        let store = seeded_store();
        let mut ctx = ctx(&store, "v9");
        ctx.avl_time_ms = DAY_START_MS + (8 * 3600 + 780) * 1000;
        ctx.headway_ms = Some(600_000);

        let trip = Arc::new(schedule_fixtures::trip("t2", "r1"));
        let dwell = estimator().dwell_time(&Indices::new(trip, 1), &ctx);
        assert_eq!(dwell.algorithm, Algorithm::LastVehicle);
    }

    #[test]
    fn test_negative_model_result_clamped() {
        let parent = Estimate::new(20_000, Algorithm::Schedule);
        assert_eq!(
            from_model(parent, Some(-4_000)),
            Estimate::new(0, Algorithm::RlsDwell)
        );
        assert_eq!(from_model(parent, None), parent);
    }
}
