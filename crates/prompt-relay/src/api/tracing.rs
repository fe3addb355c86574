//! Correlation ids for logical requests and their attempts.
//!
//! Each logical request gets a `request_id`; each attempt within it gets an
//! `attempt_id` derived from it. Both appear in log events and the
//! `X-Request-Id` header so server logs can be matched to client logs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime};

/// Generate a unique id for a logical request.
pub fn generate_request_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    // Counter disambiguates calls within the same nanosecond.
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("rq-{ts:x}-{count:04x}")
}

/// Id for attempt `attempt` (1-based) of a request.
pub fn attempt_id(request_id: &str, attempt: u32) -> String {
    format!("{request_id}:a{attempt}")
}

/// Milliseconds elapsed since `start`, saturating.
pub fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
