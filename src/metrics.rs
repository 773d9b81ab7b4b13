//! Process-local admission counters.

use serde::Serialize;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Counters updated by the admission middleware and degradation policy.
#[derive(Debug, Default)]
pub struct AdmissionMetrics {
    admitted: AtomicU64,
    rejected: AtomicU64,
    bypassed: AtomicU64,
    store_failures: AtomicU64,
    store_outages: AtomicU64,
    degraded_allow: AtomicU64,
    degraded_block: AtomicU64,
    store_degraded: AtomicBool,
}

/// A point-in-time copy of [`AdmissionMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub bypassed: u64,
    pub store_failures: u64,
    pub store_outages: u64,
    pub degraded_allow: u64,
    pub degraded_block: u64,
    pub store_degraded: bool,
}

impl AdmissionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bypassed(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_failure(&self) {
        self.store_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_allow(&self) {
        self.degraded_allow.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_block(&self) {
        self.degraded_block.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the store as failing. Returns `true` if this starts a new outage.
    pub fn enter_outage(&self) -> bool {
        let started = !self.store_degraded.swap(true, Ordering::AcqRel);
        if started {
            self.store_outages.fetch_add(1, Ordering::Relaxed);
        }
        started
    }

    /// Mark the store as healthy. Returns `true` if this ends an outage.
    pub fn leave_outage(&self) -> bool {
        self.store_degraded.load(Ordering::Acquire)
            && self.store_degraded.swap(false, Ordering::AcqRel)
    }

    /// Whether an outage is in progress.
    pub fn is_store_degraded(&self) -> bool {
        self.store_degraded.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            store_outages: self.store_outages.load(Ordering::Relaxed),
            degraded_allow: self.degraded_allow.load(Ordering::Relaxed),
            degraded_block: self.degraded_block.load(Ordering::Relaxed),
            store_degraded: self.store_degraded.load(Ordering::Acquire),
        }
    }
}

impl MetricsSnapshot {
    /// Render in the Prometheus text exposition format.
    pub fn to_prometheus(&self) -> String {
        let counters = [
            ("chatgate_requests_admitted_total", "Requests admitted by the limiter", self.admitted),
            ("chatgate_requests_rejected_total", "Requests rejected with 429", self.rejected),
            ("chatgate_requests_bypassed_total", "Requests on unmatched paths", self.bypassed),
            ("chatgate_store_failures_total", "Admission checks that failed on the counter store", self.store_failures),
            ("chatgate_store_outages_total", "Distinct counter store outages", self.store_outages),
            ("chatgate_degraded_allow_total", "Requests forwarded unchecked during a store failure", self.degraded_allow),
            ("chatgate_degraded_block_total", "Requests blocked because of a store failure", self.degraded_block),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            let _ = writeln!(out, "# HELP {} {}", name, help);
            let _ = writeln!(out, "# TYPE {} counter", name);
            let _ = writeln!(out, "{} {}", name, value);
        }
        let _ = writeln!(out, "# HELP chatgate_store_degraded Whether the counter store is currently failing");
        let _ = writeln!(out, "# TYPE chatgate_store_degraded gauge");
        let _ = writeln!(out, "chatgate_store_degraded {}", u8::from(self.store_degraded));
        out
    }
}
