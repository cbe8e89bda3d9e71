//! Network-wide epoch clock.
//!
//! Epoch 0 starts at 2017-06-01T00:00:00Z and every epoch lasts [`PERIOD`].

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Length of one epoch.
pub const PERIOD: Duration = Duration::from_secs(3 * 60 * 60);

/// 2017-06-01T00:00:00Z as seconds since the Unix epoch.
pub const EPOCH_BASE_UNIX: u64 = 1_496_275_200;

/// Current epoch, time elapsed in it and time until the next one.
pub fn now() -> (u64, Duration, Duration) {
    let since_unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    at(since_unix)
}

/// Same as [`now`] for an arbitrary instant given as time since the Unix epoch.
pub fn at(since_unix: Duration) -> (u64, Duration, Duration) {
    let since_base = since_unix.saturating_sub(Duration::from_secs(EPOCH_BASE_UNIX));
    let period = PERIOD.as_secs();
    let epoch = since_base.as_secs() / period;
    let elapsed = since_base - Duration::from_secs(epoch * period);
    (epoch, elapsed, PERIOD - elapsed)
}

/// Whether descriptors uploaded now still make it into the next epoch's vote.
///
/// Uploads for the next epoch are only taken during the first hour of the current one.
pub fn next_epoch_publishable(till: Duration) -> bool {
    till >= PERIOD - Duration::from_secs(60 * 60)
}
