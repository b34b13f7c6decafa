use tracing::trace;

use super::{Estimate, Estimator, PredictionContext};
use crate::model::{Algorithm, Indices};

/// Carries forward what the most recent other vehicle experienced on the
/// same segment.
#[derive(Debug, Clone, Copy)]
pub struct LastVehicleEstimator<E> {
    pub inner: E,
}

impl<E: Estimator> Estimator for LastVehicleEstimator<E> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::LastVehicle
    }

    fn fallback(&self) -> Option<&dyn Estimator> {
        Some(&self.inner)
    }

    fn travel_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match ctx
            .store
            .last_vehicle_travel_time(indices, ctx.last_vehicle_query())
        {
            Some(ms) => Estimate::new(ms, Algorithm::LastVehicle),
            None => {
                trace!(%indices, "No last vehicle travel time");
                self.inner.travel_time(indices, ctx)
            }
        }
    }

    fn dwell_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match ctx
            .store
            .last_vehicle_dwell_time(indices, ctx.last_vehicle_query())
        {
            Some(ms) => Estimate::new(ms, Algorithm::LastVehicle),
            None => self.inner.dwell_time(indices, ctx),
        }
    }
}
