//! Headway conditioned dwell time models, one recursive least squares fit
//! per stop path (and time of day bucket for frequency based service).

use serde::Serialize;
use std::sync::Arc;

use super::cache::BoundedCache;
use super::keys::StopPathCacheKey;
use crate::clock::Clock;

const INITIAL_COVARIANCE: f64 = 1_000.0;

/// `dwell_secs = w0 + w1 * headway_secs`, fit with exponential forgetting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RlsModel {
    weights: [f64; 2],
    covariance: [[f64; 2]; 2],
    samples: u32,
}

impl Default for RlsModel {
    fn default() -> Self {
        Self {
            weights: [0.0, 0.0],
            covariance: [[INITIAL_COVARIANCE, 0.0], [0.0, INITIAL_COVARIANCE]],
            samples: 0,
        }
    }
}

impl RlsModel {
    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn predict_secs(&self, headway_secs: f64) -> f64 {
        self.weights[0] + self.weights[1] * headway_secs
    }

    pub fn with_sample(mut self, headway_secs: f64, dwell_secs: f64, forgetting: f64) -> Self {
        let x = [1.0, headway_secs];
        let p = self.covariance;

        let px = [
            p[0][0] * x[0] + p[0][1] * x[1],
            p[1][0] * x[0] + p[1][1] * x[1],
        ];
        let denom = forgetting + x[0] * px[0] + x[1] * px[1];
        if !denom.is_finite() || denom.abs() < f64::EPSILON {
            return self;
        }
        let gain = [px[0] / denom, px[1] / denom];

        let err = dwell_secs - self.predict_secs(headway_secs);
        self.weights[0] += gain[0] * err;
        self.weights[1] += gain[1] * err;

        // P is symmetric so x'P == (Px)'
        for (i, row) in self.covariance.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (p[i][j] - gain[i] * px[j]) / forgetting;
            }
        }

        self.samples += 1;
        self
    }
}

pub struct DwellModelCache {
    cache: BoundedCache<StopPathCacheKey, RlsModel>,
    forgetting: f64,
    min_samples: u32,
}

impl DwellModelCache {
    pub fn new(
        capacity: usize,
        ttl_ms: i64,
        clock: Arc<dyn Clock>,
        forgetting: f64,
        min_samples: u32,
    ) -> Self {
        Self {
            cache: BoundedCache::new("dwellTimeModel", capacity, ttl_ms, clock),
            forgetting: forgetting.clamp(0.5, 1.0),
            min_samples,
        }
    }

    pub fn add_sample(&self, key: StopPathCacheKey, headway_ms: i64, dwell_ms: i64) {
        let forgetting = self.forgetting;
        self.cache.update(key, |model| {
            model.unwrap_or_default().with_sample(
                headway_ms as f64 / 1000.0,
                dwell_ms as f64 / 1000.0,
                forgetting,
            )
        });
    }

    /// Predicted dwell in ms, or `None` while the model has too few samples.
    pub fn predict_dwell_time_ms(&self, key: &StopPathCacheKey, headway_ms: i64) -> Option<i64> {
        let model = self.cache.get(key)?;
        if model.samples() < self.min_samples {
            return None;
        }
        let secs = model.predict_secs(headway_ms as f64 / 1000.0);
        secs.is_finite().then(|| (secs * 1000.0).round() as i64)
    }

    pub fn keys(&self) -> Vec<StopPathCacheKey> {
        self.cache.keys()
    }
}
