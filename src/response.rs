//! Client-facing rendering of verdicts.
//!
//! Framework adapters use these to build 429 responses and rate-limit
//! headers. Nothing here depends on a particular HTTP stack.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::admission::Rejection;
use crate::ratelimit::Ratelimited;

/// Status code for both limited and jailed clients.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

pub const HEADER_LIMIT: &str = "X-Ratelimit-Limit";
pub const HEADER_REMAINING: &str = "X-Ratelimit-Remaining";
pub const HEADER_RESET: &str = "X-Ratelimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

const JAILED_DETAIL: &str =
    "Banned from the API for exceeding allowed limits. Contact system administrators.";

/// JSON body for a limited client.
pub fn limited_body(verdict: &Ratelimited) -> Value {
    json!({
        "detail": format!(
            "Rate limit exceeded: {} per {} seconds",
            verdict.limit.requests, verdict.limit.window
        ),
        "retry_after": verdict.retry_after_ms(),
    })
}

/// JSON body for a jailed client.
pub fn jailed_body() -> Value {
    json!({ "detail": JAILED_DETAIL })
}

/// JSON body for any rejection.
pub fn rejection_body(rejection: &Rejection) -> Value {
    match rejection {
        Rejection::Limited(verdict) => limited_body(verdict),
        Rejection::Jailed => jailed_body(),
    }
}

/// Rate-limit headers for a verdict, as of `now`.
///
/// `X-Ratelimit-Reset` is the epoch-millisecond instant the window clears;
/// `Retry-After` is the wait in milliseconds.
pub fn headers(verdict: &Ratelimited, now: DateTime<Utc>) -> Vec<(&'static str, String)> {
    let reset_after_ms = verdict.retry_after_ms();
    let reset_at_ms = now
        .timestamp_millis()
        .saturating_add(i64::try_from(reset_after_ms).unwrap_or(i64::MAX));

    vec![
        (HEADER_LIMIT, verdict.limit.requests.to_string()),
        (HEADER_REMAINING, verdict.remaining.to_string()),
        (HEADER_RESET, reset_at_ms.to_string()),
        (HEADER_RETRY_AFTER, reset_after_ms.to_string()),
    ]
}
