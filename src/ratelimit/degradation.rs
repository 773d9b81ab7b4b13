//! Behaviour when the counter store fails.
//!
//! A failed check is handled by [`DegradationPolicy::on_failure`], which
//! always records the failure and then either lets the request through
//! unchecked or blocks it, depending on [`StoreErrorPolicy`].
//!
//! Logging is per outage, not per request: the first failure after a
//! success (or after start) logs one warning and counts one outage; further
//! failures while the store stays down log at debug. The next successful
//! check logs the recovery.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::identity::ClientIdentity;
use crate::metrics::AdmissionMetrics;
use crate::store::StoreError;

/// Configured reaction to a counter store failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreErrorPolicy {
    /// Forward the request without rate-limit headers (fail-open)
    #[default]
    Allow,
    /// Answer 500 (fail-closed)
    Block,
}

/// What the middleware should do with a request whose check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degraded {
    Forward,
    Block,
}

/// Applies [`StoreErrorPolicy`] and keeps the outage bookkeeping.
#[derive(Debug)]
pub struct DegradationPolicy {
    policy: StoreErrorPolicy,
    metrics: Arc<AdmissionMetrics>,
    last_error: Mutex<Option<StoreError>>,
}

impl DegradationPolicy {
    pub fn new(policy: StoreErrorPolicy, metrics: Arc<AdmissionMetrics>) -> Self {
        Self {
            policy,
            metrics,
            last_error: Mutex::new(None),
        }
    }

    pub fn policy(&self) -> StoreErrorPolicy {
        self.policy
    }

    /// Record a failed check and decide the request's fate.
    pub fn on_failure(&self, identity: &ClientIdentity, error: &StoreError) -> Degraded {
        self.metrics.record_store_failure();

        // The outage flag and the recorded error change together.
        let started = {
            let mut last_error = self.last_error.lock();
            *last_error = Some(error.clone());
            self.metrics.enter_outage()
        };

        if started {
            warn!(
                identity = %identity,
                kind = error.kind(),
                error = %error,
                policy = ?self.policy,
                "Counter store unavailable, rate limiting degraded"
            );
        } else {
            debug!(
                identity = %identity,
                kind = error.kind(),
                error = %error,
                "Counter store still unavailable"
            );
        }

        match self.policy {
            StoreErrorPolicy::Allow => {
                self.metrics.record_degraded_allow();
                Degraded::Forward
            }
            StoreErrorPolicy::Block => {
                self.metrics.record_degraded_block();
                Degraded::Block
            }
        }
    }

    /// Record a successful check, ending any outage in progress.
    pub fn on_success(&self) {
        if !self.metrics.is_store_degraded() {
            return;
        }

        let last = {
            let mut last_error = self.last_error.lock();
            if !self.metrics.leave_outage() {
                return;
            }
            last_error.take()
        };
        info!(
            last_error = last.as_ref().map(|e| e.to_string()).as_deref().unwrap_or("unknown"),
            "Counter store recovered, rate limiting restored"
        );
    }

    /// The most recent store failure of the current outage, if any.
    pub fn last_error(&self) -> Option<StoreError> {
        self.last_error.lock().clone()
    }
}
