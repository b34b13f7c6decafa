//! Runtime configuration for the prediction core.
//!
//! Every option can be given as a command line flag or through a `TRANSIT_*`
//! environment variable (a `.env` file is honoured by the binary).

use clap::{Args, ValueEnum};

/// Which estimator chain generates travel and dwell times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyKind {
    /// Travel time of the most recent vehicle over the same segment.
    LastVehicle,
    /// Historical average, falling back to last vehicle.
    HistoricalAverage,
    /// Kalman filtered travel time, falling back to historical average.
    Kalman,
    /// Kalman travel times plus headway conditioned RLS dwell times.
    RlsDwell,
}

#[derive(Debug, Clone, Args)]
pub struct CoreConfig {
    /// Seconds without an AVL report before a predictable vehicle times out
    #[arg(long, env = "TRANSIT_ALLOWABLE_NO_AVL_SECS", default_value_t = 360)]
    pub allowable_no_avl_secs: u64,

    /// Seconds past the scheduled wait stop departure before a silent vehicle times out
    #[arg(
        long,
        env = "TRANSIT_ALLOWABLE_NO_AVL_AFTER_SCHED_DEPART_SECS",
        default_value_t = 600
    )]
    pub allowable_no_avl_after_sched_depart_secs: u64,

    /// Seconds past the scheduled departure before a schedule based vehicle is dropped
    #[arg(long, env = "TRANSIT_SCHED_BASED_TIMEOUT_SECS", default_value_t = 240)]
    pub sched_based_timeout_secs: u64,

    /// Also evict timed out vehicles from the live vehicle cache
    #[arg(long, env = "TRANSIT_REMOVE_TIMED_OUT_VEHICLES", default_value_t = false)]
    pub remove_timed_out_vehicles_from_vehicle_data_cache: bool,

    /// Interval between timeout sweeps
    #[arg(long, env = "TRANSIT_POLLING_RATE_SECS", default_value_t = 30)]
    pub polling_rate_secs: u64,

    /// Samples required before a historical average is trusted over the schedule
    #[arg(long, env = "TRANSIT_MIN_HISTORICAL_SAMPLES", default_value_t = 3)]
    pub min_historical_samples: u32,

    /// Time of day bucket width for frequency based cache keys
    #[arg(
        long,
        env = "TRANSIT_CACHE_INCREMENTS_FOR_FREQUENCY_SERVICE_SECS",
        default_value_t = 180
    )]
    pub cache_increments_for_frequency_service_secs: u32,

    /// Predictions further ahead of the AVL report than this are discarded
    #[arg(long, env = "TRANSIT_MAX_PREDICTION_HORIZON_SECS", default_value_t = 1800)]
    pub max_prediction_horizon_secs: u64,

    /// Predictions generated from reports older than this are not served
    #[arg(long, env = "TRANSIT_MAX_PREDICTION_AGE_SECS", default_value_t = 300)]
    pub max_prediction_age_secs: u64,

    /// Only predictions within this many seconds of the report are persisted (0 disables)
    #[arg(
        long,
        env = "TRANSIT_MAX_PREDICTIONS_TIME_FOR_DB_SECS",
        default_value_t = 1800
    )]
    pub max_predictions_time_for_db_secs: u64,

    /// Record per stop path estimates in the stop path prediction cache
    #[arg(long, env = "TRANSIT_STORE_STOP_PATH_PREDICTIONS", default_value_t = false)]
    pub store_travel_time_stop_path_predictions: bool,

    /// Skip predictions, headways and spatial matches; only emit arrivals/departures
    #[arg(long, env = "TRANSIT_ONLY_NEED_ARRIVAL_DEPARTURES", default_value_t = false)]
    pub only_need_arrival_departures: bool,

    #[arg(long, value_enum, env = "TRANSIT_PREDICTION_STRATEGY", default_value_t = StrategyKind::Kalman)]
    pub prediction_strategy: StrategyKind,

    /// Error assigned to a segment the first time the Kalman filter sees it
    #[arg(long, env = "TRANSIT_KALMAN_INITIAL_ERROR_SECS", default_value_t = 50.0)]
    pub kalman_initial_error_secs: f64,

    #[arg(long, env = "TRANSIT_KALMAN_MEASUREMENT_NOISE_SECS", default_value_t = 20.0)]
    pub kalman_measurement_noise_secs: f64,

    /// Oldest last-vehicle observation still used as a measurement
    #[arg(long, env = "TRANSIT_LAST_VEHICLE_MAX_AGE_SECS", default_value_t = 1800)]
    pub last_vehicle_max_age_secs: u64,

    #[arg(long, env = "TRANSIT_MIN_TRAVEL_TIME_SECS", default_value_t = 0)]
    pub min_travel_time_secs: u64,

    #[arg(long, env = "TRANSIT_MAX_TRAVEL_TIME_SECS", default_value_t = 3600)]
    pub max_travel_time_secs: u64,

    #[arg(long, env = "TRANSIT_MAX_DWELL_TIME_SECS", default_value_t = 1800)]
    pub max_dwell_time_secs: u64,

    /// Radius used for stops that do not carry their own
    #[arg(long, env = "TRANSIT_DEFAULT_STOP_RADIUS_M", default_value_t = 25.0)]
    pub default_stop_radius_m: f64,

    /// Entries kept per statistics cache
    #[arg(long, env = "TRANSIT_CACHE_CAPACITY", default_value_t = 200_000)]
    pub cache_capacity: usize,

    /// Days after its last write that a statistics entry expires
    #[arg(long, env = "TRANSIT_CACHE_TTL_DAYS", default_value_t = 8)]
    pub cache_ttl_days: u32,

    #[arg(long, env = "TRANSIT_DWELL_MODEL_MIN_SAMPLES", default_value_t = 3)]
    pub dwell_model_min_samples: u32,

    #[arg(long, env = "TRANSIT_RLS_FORGETTING_FACTOR", default_value_t = 0.98)]
    pub rls_forgetting_factor: f64,

    #[arg(long, env = "TRANSIT_PERSISTENCE_QUEUE_CAPACITY", default_value_t = 50_000)]
    pub persistence_queue_capacity: usize,

    /// Queue fill fraction that triggers the queue monitor
    #[arg(long, env = "TRANSIT_MAX_QUEUE_FRACTION", default_value_t = 0.4)]
    pub max_queue_fraction: f64,

    #[arg(long, env = "TRANSIT_MAX_QUEUE_FRACTION_GAP", default_value_t = 0.1)]
    pub max_queue_fraction_gap: f64,

    /// Routes ignored when replaying history into the caches
    #[arg(long, env = "TRANSIT_EXCLUDED_ROUTES", value_delimiter = ',')]
    pub excluded_routes: Vec<String>,

    /// Offset of the agency's local time from UTC, for time of day buckets
    #[arg(long, env = "TRANSIT_SERVICE_UTC_OFFSET_SECS", default_value_t = 0)]
    pub service_utc_offset_secs: i32,

    /// Days of arrival/departure history replayed at warm-up
    #[arg(long, env = "TRANSIT_WARMUP_DAYS", default_value_t = 7)]
    pub warmup_days: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            allowable_no_avl_secs: 360,
            allowable_no_avl_after_sched_depart_secs: 600,
            sched_based_timeout_secs: 240,
            remove_timed_out_vehicles_from_vehicle_data_cache: false,
            polling_rate_secs: 30,
            min_historical_samples: 3,
            cache_increments_for_frequency_service_secs: 180,
            max_prediction_horizon_secs: 1800,
            max_prediction_age_secs: 300,
            max_predictions_time_for_db_secs: 1800,
            store_travel_time_stop_path_predictions: false,
            only_need_arrival_departures: false,
            prediction_strategy: StrategyKind::Kalman,
            kalman_initial_error_secs: 50.0,
            kalman_measurement_noise_secs: 20.0,
            last_vehicle_max_age_secs: 1800,
            min_travel_time_secs: 0,
            max_travel_time_secs: 3600,
            max_dwell_time_secs: 1800,
            default_stop_radius_m: 25.0,
            cache_capacity: 200_000,
            cache_ttl_days: 8,
            dwell_model_min_samples: 3,
            rls_forgetting_factor: 0.98,
            persistence_queue_capacity: 50_000,
            max_queue_fraction: 0.4,
            max_queue_fraction_gap: 0.1,
            excluded_routes: Vec::new(),
            service_utc_offset_secs: 0,
            warmup_days: 7,
        }
    }
}

impl CoreConfig {
    /// Whether history for `route_id` should be loaded into the caches.
    pub fn route_not_filtered(&self, route_id: &str) -> bool {
        !self.excluded_routes.iter().any(|r| r == route_id)
    }

    pub fn cache_ttl_ms(&self) -> i64 {
        i64::from(self.cache_ttl_days) * 24 * 3600 * 1000
    }
}

/// Seconds to milliseconds, saturating at `i64::MAX`.
pub fn secs_to_ms(secs: u64) -> i64 {
    i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        config: CoreConfig,
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let parsed = Cli::parse_from(["test"]).config;
        let default = CoreConfig::default();

        assert_eq!(parsed.allowable_no_avl_secs, default.allowable_no_avl_secs);
        assert_eq!(parsed.min_historical_samples, default.min_historical_samples);
        assert_eq!(parsed.prediction_strategy, default.prediction_strategy);
        assert_eq!(parsed.cache_capacity, default.cache_capacity);
        assert!(parsed.excluded_routes.is_empty());
    }

    #[test]
    fn test_excluded_routes_are_filtered() {
        let parsed =
            Cli::parse_from(["test", "--excluded-routes", "r1,r2", "--prediction-strategy", "rls-dwell"])
                .config;

        assert!(!parsed.route_not_filtered("r1"));
        assert!(!parsed.route_not_filtered("r2"));
        assert!(parsed.route_not_filtered("r3"));
        assert_eq!(parsed.prediction_strategy, StrategyKind::RlsDwell);
    }

    #[test]
    fn test_secs_to_ms_saturates() {
        assert_eq!(secs_to_ms(360), 360_000);
        assert_eq!(secs_to_ms(u64::MAX), i64::MAX);
        assert_eq!(secs_to_ms(u64::MAX / 1000 + 1), i64::MAX);
    }
}
