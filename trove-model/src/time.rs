//! API timestamps: float seconds since the Unix epoch.

use chrono::Utc;

/// Seconds since epoch, fractional part carries sub-second precision.
pub type Timestamp = f64;

/// Current server time.
pub fn now() -> Timestamp {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
