//! Randomised, capped exponential backoff.

use std::time::Duration;

use rand::Rng;

/// Delay before re-queueing a command after `retry` doublings.
///
/// The upper bound is `min << retry`, clamped to `max` when it exceeds `max`
/// or the shift overflows. The returned delay is drawn uniformly from
/// `[0, bound)` (full jitter). A zero bound means no wait.
pub fn exp_backoff(retry: u32, min: Duration, max: Duration) -> Duration {
    let bound = backoff_bound(retry, min, max);
    if bound == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(rand::rng().random_range(0..bound))
}

/// Exclusive upper bound, in nanoseconds, of [`exp_backoff`].
fn backoff_bound(retry: u32, min: Duration, max: Duration) -> u64 {
    let min_ns = as_nanos(min);
    let max_ns = as_nanos(max);

    if min_ns == 0 {
        return 0;
    }

    1u64.checked_shl(retry)
        .and_then(|factor| min_ns.checked_mul(factor))
        .filter(|bound| *bound <= max_ns)
        .unwrap_or(max_ns)
}

fn as_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
