use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use super::DataLogger;

/// Watches the persistence queue level with hysteresis: trips once the level
/// exceeds `max_fraction`, clears once it drops below `max_fraction - gap`.
#[derive(Debug)]
pub struct QueueMonitor {
    max_fraction: f64,
    gap: f64,
    triggered: AtomicBool,
}

impl QueueMonitor {
    pub fn new(max_fraction: f64, gap: f64) -> Self {
        Self {
            max_fraction,
            gap: gap.max(0.0),
            triggered: AtomicBool::new(false),
        }
    }

    pub fn triggered(&self) -> bool {
        self.triggered.load(Ordering::Relaxed)
    }

    /// Samples `logger` and returns whether the alarm is active.
    pub fn check(&self, logger: &dyn DataLogger) -> bool {
        let level = logger.queue_level();
        let was = self.triggered();
        let threshold = if was {
            self.max_fraction - self.gap
        } else {
            self.max_fraction
        };
        let now = level > threshold;

        if now != was {
            self.triggered.store(now, Ordering::Relaxed);
            if now {
                warn!(
                    level,
                    size = logger.queue_size(),
                    max_fraction = self.max_fraction,
                    "Persistence queue level high"
                );
            } else {
                info!(level, "Persistence queue level back to normal");
            }
        }
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::Record;
    use std::sync::Mutex;

    struct FixedLevel(Mutex<f64>);

    impl DataLogger for FixedLevel {
        fn append(&self, _record: Record) {}
        fn queue_level(&self) -> f64 {
            *self.0.lock().unwrap()
        }
        fn queue_size(&self) -> usize {
            0
        }
    }

    #[test]
    fn test_hysteresis() {
        let monitor = QueueMonitor::new(0.4, 0.1);
        let logger = FixedLevel(Mutex::new(0.35));
        assert!(!monitor.check(&logger));

        *logger.0.lock().unwrap() = 0.45;
        assert!(monitor.check(&logger));

        // still above the lowered threshold
        *logger.0.lock().unwrap() = 0.35;
        assert!(monitor.check(&logger));

        *logger.0.lock().unwrap() = 0.25;
        assert!(!monitor.check(&logger));
        assert!(!monitor.triggered());
    }
}
