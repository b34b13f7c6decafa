use serde::Serialize;
use std::fmt;

/// Running mean of observed durations (ms) for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct HistoricalAverage {
    count: u32,
    average: f64,
}

impl HistoricalAverage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// `None` until at least one sample was added.
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then_some(self.average)
    }

    pub fn with_sample(mut self, value: f64) -> Self {
        self.count += 1;
        self.average += (value - self.average) / f64::from(self.count);
        self
    }
}

impl fmt::Display for HistoricalAverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HistoricalAverage[count={}, average={:.0}]",
            self.count, self.average
        )
    }
}

/// Current Kalman error for a stop path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KalmanError {
    error: f64,
}

impl KalmanError {
    pub fn new(error: f64) -> Self {
        Self {
            error: error.max(0.0),
        }
    }

    pub fn error(&self) -> f64 {
        self.error
    }
}
