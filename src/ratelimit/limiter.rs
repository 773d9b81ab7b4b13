//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, trace};

use super::decision::Decision;
use super::identity::ClientIdentity;
use crate::store::{CounterStore, StoreError};

/// Default key prefix for counters.
const DEFAULT_KEY_PREFIX: &str = "ratelimit";

/// Fixed-window rate limiter over a shared counter store.
///
/// Each identity has one counter, keyed by identity alone. The counter's
/// expiry is set on its first increment and the store drops it when the
/// window ends; nothing here sweeps state. A request is admitted iff fewer
/// than `max_requests` requests were admitted earlier in the window, and
/// rejected requests are not counted.
///
/// Windows are fixed, not sliding: up to `2 * max_requests` requests can be
/// admitted within one window length if they straddle a boundary.
///
/// The limiter holds no per-request state, so any number of instances may
/// share one store.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    max_requests: u64,
    window: Duration,
    key_prefix: String,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("max_requests", &self.max_requests)
            .field("window", &self.window)
            .field("key_prefix", &self.key_prefix)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` per identity.
    pub fn new(store: Arc<dyn CounterStore>, max_requests: u64, window: Duration) -> Self {
        Self {
            store,
            max_requests,
            window,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Use a different counter key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Decide whether a request from `identity` is admitted.
    ///
    /// One round trip to the store. A store failure is returned as-is and
    /// never treated as an empty window.
    pub async fn check(&self, identity: &ClientIdentity) -> Result<Decision, StoreError> {
        let key = identity.counter_key(&self.key_prefix);

        trace!(key = %key, limit = self.max_requests, "Checking rate limit");

        let state = self.store.hit(&key, self.max_requests, self.window).await?;
        let decision = Decision::from_window(state, self.max_requests, Utc::now());

        if !decision.allowed {
            debug!(
                identity = %identity,
                count = state.count,
                limit = self.max_requests,
                retry_after = decision.retry_after,
                "Rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Current counter value for `identity`, zero when no window is open.
    pub async fn current_count(&self, identity: &ClientIdentity) -> Result<u64, StoreError> {
        let key = identity.counter_key(&self.key_prefix);
        Ok(self.store.get(&key).await?.unwrap_or(0))
    }

    /// Requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.max_requests
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}
