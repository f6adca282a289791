//! Reconnect delay computation.
//!
//! Exponential backoff with a cap and bounded jitter. Attempts beyond the
//! configured maximum keep retrying at the capped delay; connectivity loss is
//! never a dead end.

use crate::models::ConnectionOptions;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Largest exponent we ever raise 2 to. Past this the delay is capped anyway
/// and `saturating_pow` would just burn cycles.
const MAX_EXPONENT: u32 = 16;

/// Compute the reconnect delay for the given attempt number (0-based).
///
/// The base delay doubles per attempt up to `reconnect_max_delay_ms`, then
/// stays there. Bounded jitter (±20% of the pre-jitter delay) is applied so
/// many clients recovering from the same outage do not retry in lockstep.
pub(crate) fn reconnect_delay(options: &ConnectionOptions, attempt: u32) -> Duration {
    apply_jitter(base_delay(options, attempt), attempt)
}

/// Pre-jitter delay for the given attempt.
fn base_delay(options: &ConnectionOptions, attempt: u32) -> Duration {
    let exponent = attempt
        .min(options.max_reconnect_attempts.unwrap_or(MAX_EXPONENT))
        .min(MAX_EXPONENT);
    let raw = options
        .reconnect_delay_ms
        .saturating_mul(2u64.saturating_pow(exponent));
    Duration::from_millis(raw.min(options.max_reconnect_delay_ms))
}

/// Apply a ±20% jitter window to `base`, seeded from the attempt number and
/// the current clock so repeated attempts land on different offsets.
fn apply_jitter(base: Duration, attempt: u32) -> Duration {
    let base_ms = base.as_millis() as u64;
    if base_ms <= 1 {
        return base;
    }

    let jitter_span = (base_ms / 5).max(1);
    let mut hasher = DefaultHasher::new();
    attempt.hash(&mut hasher);
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos()
        .hash(&mut hasher);
    let hashed = hasher.finish();

    let offset = (hashed % (2 * jitter_span + 1)) as i64 - jitter_span as i64;
    let jittered_ms = if offset >= 0 {
        base_ms.saturating_add(offset as u64)
    } else {
        base_ms.saturating_sub((-offset) as u64).max(1)
    };
    Duration::from_millis(jittered_ms)
}
