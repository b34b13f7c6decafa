use tracing::debug;

use super::{Estimate, Estimator, PredictionContext};
use crate::model::{Algorithm, Indices};
use crate::store::KalmanError;

/// Result of one scalar Kalman step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KalmanUpdate {
    pub gain: f64,
    pub estimate: f64,
    pub error: f64,
}

/// `gain = E / (E + R)`, `estimate = prior + gain * (measurement - prior)`,
/// `error = (1 - gain) * E`.
pub fn kalman_update(
    prior: f64,
    prior_error: f64,
    measurement: f64,
    measurement_noise: f64,
) -> KalmanUpdate {
    let prior_error = prior_error.max(0.0);
    let denom = prior_error + measurement_noise.max(0.0);
    let gain = if denom > 0.0 {
        (prior_error / denom).clamp(0.0, 1.0)
    } else {
        0.0
    };

    KalmanUpdate {
        gain,
        estimate: prior + gain * (measurement - prior),
        error: (1.0 - gain) * prior_error,
    }
}

/// Filters the historical average (prior) with the last vehicle's travel
/// time (measurement). Dwell times pass straight through to `inner`.
#[derive(Debug, Clone, Copy)]
pub struct KalmanEstimator<E> {
    pub inner: E,
}

impl<E: Estimator> Estimator for KalmanEstimator<E> {
    fn algorithm(&self) -> Algorithm {
        Algorithm::Kalman
    }

    fn fallback(&self) -> Option<&dyn Estimator> {
        Some(&self.inner)
    }

    fn travel_time(&self, indices: &Indices, ctx: &PredictionContext<'_>) -> Estimate {
        let store = ctx.store;
        let config = store.config();

        let Some(error) = store.kalman_error(indices) else {
            let initial = config.kalman_initial_error_secs * 1000.0;
            debug!(%indices, initial, "Seeding Kalman error");
            store.put_kalman_error(indices, KalmanError::new(initial));
            return self.inner.travel_time(indices, ctx);
        };

        let prior = store
            .historical_average(indices, true, ctx.avl_time_ms)
            .filter(|avg| avg.count() >= config.min_historical_samples)
            .and_then(|avg| avg.average());
        let measurement = store.last_vehicle_travel_time(indices, ctx.last_vehicle_query());

        let (Some(prior), Some(measurement)) = (prior, measurement) else {
            return self.inner.travel_time(indices, ctx);
        };

        let update = kalman_update(
            prior,
            error.error(),
            measurement as f64,
            config.kalman_measurement_noise_secs * 1000.0,
        );
        debug!(
            %indices,
            prior,
            measurement,
            gain = update.gain,
            estimate = update.estimate,
            "Kalman update"
        );
        store.put_kalman_error(indices, KalmanError::new(update.error));

        Estimate::new(update.estimate.round().max(0.0) as i64, Algorithm::Kalman)
    }
}
