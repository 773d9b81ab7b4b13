//! Admission decisions and their header representation.

use axum::http::{HeaderMap, HeaderName, HeaderValue};
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::store::WindowState;

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// The outcome of one admission check. Not persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is admitted
    pub allowed: bool,
    /// Requests admitted per window
    pub limit: u64,
    /// Requests left in the current window after this one
    pub remaining: u64,
    /// When the current window ends, as epoch seconds
    pub reset: i64,
    /// Whole seconds until the current window ends, at least 1
    pub retry_after: u64,
}

impl Decision {
    /// Build a decision from the window state reported by the store.
    pub fn from_window(state: WindowState, limit: u64, now: DateTime<Utc>) -> Self {
        let retry_after = ceil_secs(state.ttl).max(1);
        let remaining = if state.allowed {
            limit.saturating_sub(state.count)
        } else {
            0
        };

        Self {
            allowed: state.allowed,
            limit,
            remaining,
            reset: now.timestamp() + retry_after as i64,
            retry_after,
        }
    }

    /// Write the `X-RateLimit-*` headers.
    pub fn apply_headers(&self, headers: &mut HeaderMap, include_reset: bool) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        if include_reset {
            headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset));
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(epoch: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(epoch, 0).unwrap()
    }

    #[test]
    fn test_admitted_decision() {
        let state = WindowState {
            allowed: true,
            count: 1,
            ttl: Duration::from_secs(60),
        };
        let decision = Decision::from_window(state, 10, at(1_700_000_000));

        assert!(decision.allowed);
        assert_eq!(decision.remaining, 9);
        assert_eq!(decision.retry_after, 60);
        assert_eq!(decision.reset, 1_700_000_060);
    }

    #[test]
    fn test_rejected_decision_has_no_remaining() {
        let state = WindowState {
            allowed: false,
            count: 10,
            ttl: Duration::from_millis(12_300),
        };
        let decision = Decision::from_window(state, 10, at(1_700_000_000));

        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, 13);
    }

    #[test]
    fn test_remaining_saturates_on_overshoot() {
        // A racing decomposed store may admit past the limit
        let state = WindowState {
            allowed: true,
            count: 11,
            ttl: Duration::from_secs(5),
        };
        let decision = Decision::from_window(state, 10, at(0));
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn test_retry_after_is_at_least_one_second() {
        let state = WindowState {
            allowed: false,
            count: 3,
            ttl: Duration::ZERO,
        };
        let decision = Decision::from_window(state, 3, at(0));
        assert_eq!(decision.retry_after, 1);
    }

    #[test]
    fn test_apply_headers() {
        let decision = Decision {
            allowed: true,
            limit: 50,
            remaining: 49,
            reset: 1_700_003_600,
            retry_after: 3600,
        };

        let mut headers = HeaderMap::new();
        decision.apply_headers(&mut headers, false);
        assert_eq!(headers[&X_RATELIMIT_LIMIT], "50");
        assert_eq!(headers[&X_RATELIMIT_REMAINING], "49");
        assert!(!headers.contains_key(&X_RATELIMIT_RESET));

        decision.apply_headers(&mut headers, true);
        assert_eq!(headers[&X_RATELIMIT_RESET], "1700003600");
    }
}
