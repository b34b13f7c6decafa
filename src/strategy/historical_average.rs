use super::{Estimate, Estimator, PredictionContext};
use crate::model::{Algorithm, Indices};

/// Trusts the rolling average only once it has `min_historical_samples`
/// observations behind it.
#[derive(Debug, Clone, Copy)]
pub struct HistoricalAverageEstimator<E> {
    pub inner: E,
}

impl<E> HistoricalAverageEstimator<E> {
    fn trusted_average(
        &self,
        indices: &Indices,
        ctx: &PredictionContext<'_>,
        travel_time: bool,
    ) -> Option<i64> {
        let min = ctx.store.config().min_historical_samples;
        let average = ctx
            .store
            .historical_average(indices, travel_time, ctx.avl_time_ms)?;
        if average.count() < min {
            return None;
        }
        average.average().map(|avg| avg.round() as i64)
    }
}

impl<E: Estimator> Estimator for HistoricalAverageEstimator<E> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::HistoricalAverage
    }

    fn fallback(&self) -> Option<&dyn Estimator> {
        Some(&self.inner)
    }

    fn travel_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match self.trusted_average(indices, ctx, true) {
            Some(ms) => Estimate::new(ms, Algorithm::HistoricalAverage),
            None => self.inner.travel_time(indices, ctx),
        }
    }

    fn dwell_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        match self.trusted_average(indices, ctx, false) {
            Some(ms) => Estimate::new(ms, Algorithm::HistoricalAverage),
            None => self.inner.dwell_time(indices, ctx),
        }
    }
}
