//! Counter store clients.
//!
//! The counter store is the sole owner of rate-limit state. Every call is a
//! remote round trip that may fail; failures surface as [`StoreError`] and
//! are never folded into a zero count.

mod memory;
mod upstash;

pub use memory::MemoryStore;
pub use upstash::UpstashStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// The counter store could not serve a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The call did not complete within the configured timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection refused, DNS failure, TLS failure and similar.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The store answered with a non-success status.
    #[error("store answered {status}: {message}")]
    Status { status: u16, message: String },

    /// The store answered with a body we could not interpret.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl StoreError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::Timeout(_) => "timeout",
            StoreError::Transport(_) => "transport",
            StoreError::Status { .. } => "status",
            StoreError::Malformed(_) => "malformed",
        }
    }
}

/// State of one fixed window after a check-and-increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Whether this hit was admitted (and therefore counted).
    pub allowed: bool,
    /// Counter value after the hit. Rejected hits are not counted.
    pub count: u64,
    /// Time until the window's key expires.
    pub ttl: Duration,
}

/// A remote key-value counter service.
///
/// Implementations are shared across concurrent requests and hold no
/// per-request state.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read a counter. `None` when the key does not exist or has expired.
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError>;

    /// Atomically increment a counter, returning the post-increment value.
    async fn incr(&self, key: &str) -> Result<u64, StoreError>;

    /// Set a counter's time to live.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Fixed-window check-and-increment.
    ///
    /// A hit is admitted iff the counter is below `limit`; admitted hits are
    /// counted and rejected hits are not. The expiry is set on the first
    /// increment of the key's lifetime.
    ///
    /// This default composes `get`, `incr` and `expire` as three separate
    /// calls. Two concurrent callers may both observe the same count and
    /// both be admitted, and a failed `expire` leaves a key without a TTL.
    /// Stores that can evaluate the whole step atomically override it.
    async fn hit(&self, key: &str, limit: u64, window: Duration) -> Result<WindowState, StoreError> {
        let current = self.get(key).await?.unwrap_or(0);
        if current >= limit {
            return Ok(WindowState {
                allowed: false,
                count: current,
                ttl: window,
            });
        }

        let count = self.incr(key).await?;
        if current == 0 {
            self.expire(key, window).await?;
        }

        Ok(WindowState {
            allowed: true,
            count,
            ttl: window,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exposes only the decomposed primitives of a memory store so the
    /// provided `hit` is exercised.
    struct Decomposed(MemoryStore);

    #[async_trait]
    impl CounterStore for Decomposed {
        async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
            self.0.get(key).await
        }

        async fn incr(&self, key: &str) -> Result<u64, StoreError> {
            self.0.incr(key).await
        }

        async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
            self.0.expire(key, ttl).await
        }
    }

    struct Unreachable;

    #[async_trait]
    impl CounterStore for Unreachable {
        async fn get(&self, _key: &str) -> Result<Option<u64>, StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }

        async fn incr(&self, _key: &str) -> Result<u64, StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }

        async fn expire(&self, _key: &str, _ttl: Duration) -> Result<(), StoreError> {
            Err(StoreError::Transport("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_decomposed_hit_admits_up_to_limit() {
        let store = Decomposed(MemoryStore::new());
        let window = Duration::from_secs(60);

        for expected in 1..=3 {
            let state = store.hit("k", 3, window).await.unwrap();
            assert!(state.allowed);
            assert_eq!(state.count, expected);
        }

        let state = store.hit("k", 3, window).await.unwrap();
        assert!(!state.allowed);
        assert_eq!(state.count, 3);

        // Rejected hits are not counted
        assert_eq!(store.get("k").await.unwrap(), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_decomposed_hit_sets_expiry_on_first_increment() {
        let store = Decomposed(MemoryStore::new());
        let window = Duration::from_secs(10);

        store.hit("k", 5, window).await.unwrap();
        store.hit("k", 5, window).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_decomposed_hit_over_admission_is_bounded() {
        let store = std::sync::Arc::new(Decomposed(MemoryStore::new()));
        let window = Duration::from_secs(60);

        let hits = (0..200).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.hit("k", 10, window).await.unwrap() })
        });
        let admitted = futures::future::join_all(hits)
            .await
            .into_iter()
            .filter(|state| state.as_ref().unwrap().allowed)
            .count() as u64;

        // Racing get-then-incr may admit extra requests, never a second window's worth
        assert!(admitted >= 10, "admitted {}", admitted);
        assert!(admitted <= 20, "admitted {}", admitted);

        // Only admitted hits are counted
        assert_eq!(store.get("k").await.unwrap(), Some(admitted));
    }

    #[tokio::test]
    async fn test_failure_is_never_zero() {
        let store = Unreachable;
        let result = store.hit("k", 10, Duration::from_secs(60)).await;
        assert_eq!(
            result,
            Err(StoreError::Transport("connection refused".to_string()))
        );
    }

    #[test]
    fn test_error_kind_labels() {
        assert_eq!(StoreError::Timeout(Duration::from_millis(5)).kind(), "timeout");
        assert_eq!(
            StoreError::Status {
                status: 401,
                message: "unauthorized".to_string()
            }
            .kind(),
            "status"
        );
        assert_eq!(StoreError::Malformed("x".to_string()).kind(), "malformed");
    }
}
