//! Counters for bus activity.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Metrics {
    events_published: AtomicU64,
    deliveries: AtomicU64,
    subscriber_faults: AtomicU64,
    cycles_processed: AtomicU64,
    requests_fulfilled: AtomicU64,
    requests_timed_out: AtomicU64,
}

impl Metrics {
    pub(crate) fn record_published(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fault(&self) {
        self.subscriber_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cycle(&self) {
        self.cycles_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request(&self, timed_out: bool) {
        let counter = if timed_out {
            &self.requests_timed_out
        } else {
            &self.requests_fulfilled
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BusStats {
        BusStats {
            events_published: self.events_published.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            subscriber_faults: self.subscriber_faults.load(Ordering::Relaxed),
            cycles_processed: self.cycles_processed.load(Ordering::Relaxed),
            requests_fulfilled: self.requests_fulfilled.load(Ordering::Relaxed),
            requests_timed_out: self.requests_timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the bus counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub events_published: u64,
    /// Handler invocations, faulty ones included.
    pub deliveries: u64,
    pub subscriber_faults: u64,
    pub cycles_processed: u64,
    pub requests_fulfilled: u64,
    pub requests_timed_out: u64,
}
