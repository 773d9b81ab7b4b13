//! In-process counter store.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::trace;

use super::{CounterStore, StoreError, WindowState};

/// A counter with an optional expiry deadline.
#[derive(Debug, Clone, Copy, Default)]
struct Counter {
    count: u64,
    expires_at: Option<Instant>,
}

impl Counter {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }

    fn ttl(&self, now: Instant) -> Option<Duration> {
        self.expires_at.map(|deadline| deadline.saturating_duration_since(now))
    }
}

/// Counter store held in process memory.
///
/// Keys expire lazily: an expired counter is treated as absent the next time
/// it is touched, the way Redis treats keys past their TTL. Time is measured
/// with `tokio::time::Instant`, so a paused runtime clock drives expiry.
///
/// Every operation holds the key's shard lock for its whole duration, which
/// makes [`CounterStore::hit`] atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    counters: DashMap<String, Counter>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let expired = match self.counters.get(key) {
            Some(counter) if !counter.is_expired(now) => return Ok(Some(counter.count)),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.counters.remove_if(key, |_, counter| counter.is_expired(now));
        }
        Ok(None)
    }

    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_default();
        if counter.is_expired(now) {
            *counter = Counter::default();
        }
        counter.count += 1;
        Ok(counter.count)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        if let Some(mut counter) = self.counters.get_mut(key) {
            if !counter.is_expired(now) {
                counter.expires_at = Some(now + ttl);
            }
        }
        Ok(())
    }

    async fn hit(&self, key: &str, limit: u64, window: Duration) -> Result<WindowState, StoreError> {
        let now = Instant::now();
        let mut counter = self.counters.entry(key.to_string()).or_default();

        if counter.is_expired(now) {
            *counter = Counter::default();
        }

        if counter.count >= limit {
            // A key that lost its expiry would otherwise block forever
            if counter.expires_at.is_none() {
                counter.expires_at = Some(now + window);
            }
            trace!(key = %key, count = counter.count, "Memory store rejected hit");
            return Ok(WindowState {
                allowed: false,
                count: counter.count,
                ttl: counter.ttl(now).unwrap_or(window),
            });
        }

        counter.count += 1;
        if counter.count == 1 || counter.expires_at.is_none() {
            counter.expires_at = Some(now + window);
        }

        Ok(WindowState {
            allowed: true,
            count: counter.count,
            ttl: counter.ttl(now).unwrap_or(window),
        })
    }
}
