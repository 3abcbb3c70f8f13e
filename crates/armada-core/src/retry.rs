use std::time::Duration;

/// Exponential backoff schedule: `base` doubled per attempt, capped.
///
/// Attempt numbering starts at 0 (first retry). The cap keeps requeue
/// delays bounded when a task fails repeatedly on a flapping node.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
    base.checked_mul(factor).map_or(cap, |d| d.min(cap))
}
