use crate::config::{CoreConfig, secs_to_ms};

/// Rejects implausible travel and dwell times before they reach any
/// statistic.
#[derive(Debug, Clone, Copy)]
pub struct DataFilter {
    min_travel_ms: i64,
    max_travel_ms: i64,
    max_dwell_ms: i64,
}

impl DataFilter {
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            min_travel_ms: secs_to_ms(config.min_travel_time_secs),
            max_travel_ms: secs_to_ms(config.max_travel_time_secs),
            max_dwell_ms: secs_to_ms(config.max_dwell_time_secs),
        }
    }

    pub fn travel_time_ok(&self, travel_ms: i64) -> bool {
        travel_ms >= self.min_travel_ms && travel_ms <= self.max_travel_ms
    }

    pub fn dwell_time_ok(&self, dwell_ms: i64) -> bool {
        (0..=self.max_dwell_ms).contains(&dwell_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let filter = DataFilter::from_config(&CoreConfig::default());

        assert!(filter.travel_time_ok(0));
        assert!(filter.travel_time_ok(3_600_000));
        assert!(!filter.travel_time_ok(-1));
        assert!(!filter.travel_time_ok(3_600_001));

        assert!(filter.dwell_time_ok(0));
        assert!(!filter.dwell_time_ok(-500));
        assert!(!filter.dwell_time_ok(1_800_001));
    }

    #[test]
    fn test_huge_limits_do_not_wrap() {
        let mut config = CoreConfig::default();
        config.max_travel_time_secs = u64::MAX;
        config.max_dwell_time_secs = u64::MAX;
        let filter = DataFilter::from_config(&config);

        assert!(filter.travel_time_ok(i64::MAX));
        assert!(filter.dwell_time_ok(86_400_000));
    }
}
