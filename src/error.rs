use thiserror::Error;

/// Failures inside the prediction core. Missing statistics are not errors;
/// they are `None` and trigger a fallback.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invariant violated for vehicle {vehicle_id}: {detail}")]
    InvariantViolation { vehicle_id: String, detail: String },

    #[error("trip {0} is not in the schedule")]
    UnknownTrip(String),

    #[error("stop path index {index} out of range for trip {trip_id} with {len} stop paths")]
    StopPathOutOfRange {
        trip_id: String,
        index: usize,
        len: usize,
    },
}
