//! Fixed-interval polling.

use std::thread;
use std::time::Duration;

use tracing::trace;

use crate::error::Result;

/// Call `predicate` up to `attempts` times, sleeping `interval` between calls.
///
/// `Ok(Some(v))` stops with the value, `Ok(None)` asks for another check and
/// `Err` aborts immediately. Returns `Ok(None)` once the attempts run out.
pub fn retry_with_interval<T, F>(
    interval: Duration,
    attempts: u32,
    mut predicate: F,
) -> Result<Option<T>>
where
    F: FnMut() -> Result<Option<T>>,
{
    for attempt in 1..=attempts {
        if let Some(value) = predicate()? {
            return Ok(Some(value));
        }
        if attempt < attempts && !interval.is_zero() {
            thread::sleep(interval);
        }
    }
    trace!(attempts, interval_ms = interval.as_millis() as u64, "Poll budget exhausted");
    Ok(None)
}
