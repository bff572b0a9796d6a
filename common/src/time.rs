// Wall-clock helpers.
//
// These use SystemTime::now() and are therefore non-deterministic. That is
// fine for logging, metrics, TTL bookkeeping, and backoff scheduling — the
// things this module is for. It is NOT fine for anything that needs to be
// reproduced exactly in a test: services that branch on "now" should take a
// `Clock` (see clock.rs) instead of calling these directly.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub type TimestampMillis = u64;
pub type TimestampSeconds = u64;

#[inline]
pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before unix epoch")
}

pub fn get_current_time_in_seconds() -> TimestampSeconds {
    get_current_time().as_secs()
}

pub fn get_current_time_in_millis() -> TimestampMillis {
    get_current_time().as_millis() as TimestampMillis
}
