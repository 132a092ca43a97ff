use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::worker_status::WorkerStatus;

/// Pipeline wide counters, updated by the ingest path, the dispatcher and the merger.
#[derive(Debug, Default)]
pub struct FinderMetrics {
    frames_received: AtomicU64,
    frames_rejected: AtomicU64,
    frames_malformed: AtomicU64,
    frames_decoded: AtomicU64,
    windows_dispatched: AtomicU64,
    windows_processed: AtomicU64,
    hits_found: AtomicU64,
    latency_last_ns: AtomicU64,
    latency_max_ns: AtomicU64,
    latency_total_ns: AtomicU64,
    lagging_items: AtomicU64,
    timestamp_gaps: AtomicU64,
    worker_faults: AtomicU64,
}

impl FinderMetrics {
    pub fn record_accepted(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.frames_malformed.fetch_add(1, Ordering::Relaxed);
    }

    /// A superchunk left the queue after `latency`
    pub fn record_dequeued(&self, latency: Duration, lagging: bool) {
        let ns = latency.as_nanos().min(u64::MAX as u128) as u64;
        self.latency_last_ns.store(ns, Ordering::Relaxed);
        self.latency_max_ns.fetch_max(ns, Ordering::Relaxed);
        self.latency_total_ns.fetch_add(ns, Ordering::Relaxed);
        if lagging {
            self.lagging_items.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// A superchunk was decoded and appended (or dropped as undecodable)
    pub fn record_consumed(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Release);
    }

    pub fn record_gap(&self) {
        self.timestamp_gaps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.windows_dispatched.fetch_add(1, Ordering::Release);
    }

    pub fn record_merged(&self, n_hits: usize, n_faults: usize) {
        self.hits_found.fetch_add(n_hits as u64, Ordering::Relaxed);
        self.worker_faults.fetch_add(n_faults as u64, Ordering::Relaxed);
        self.windows_processed.fetch_add(1, Ordering::Release);
    }

    /// True once everything accepted so far has been assembled and every dispatched
    /// window has been merged
    pub fn is_idle(&self) -> bool {
        let consumed = self.frames_decoded.load(Ordering::Acquire);
        let dispatched = self.windows_dispatched.load(Ordering::Acquire);
        let merged = self.windows_processed.load(Ordering::Acquire);
        consumed == self.frames_received.load(Ordering::Acquire) && merged == dispatched
    }

    pub fn snapshot(
        &self,
        queue_occupancy: usize,
        queue_capacity: usize,
        workers: Vec<WorkerStatus>,
    ) -> MetricsSnapshot {
        let decoded = self.frames_decoded.load(Ordering::Relaxed);
        let total = self.latency_total_ns.load(Ordering::Relaxed);
        let mean = if decoded > 0 { total / decoded } else { 0 };
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_malformed: self.frames_malformed.load(Ordering::Relaxed),
            frames_decoded: decoded,
            windows_dispatched: self.windows_dispatched.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            hits_found: self.hits_found.load(Ordering::Relaxed),
            queue_occupancy,
            queue_capacity,
            last_queue_latency: Duration::from_nanos(self.latency_last_ns.load(Ordering::Relaxed)),
            max_queue_latency: Duration::from_nanos(self.latency_max_ns.load(Ordering::Relaxed)),
            mean_queue_latency: Duration::from_nanos(mean),
            lagging_items: self.lagging_items.load(Ordering::Relaxed),
            timestamp_gaps: self.timestamp_gaps.load(Ordering::Relaxed),
            worker_faults: self.worker_faults.load(Ordering::Relaxed),
            workers,
        }
    }
}

/// Point in time copy of the finder counters, for external monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_malformed: u64,
    pub frames_decoded: u64,
    pub windows_dispatched: u64,
    pub windows_processed: u64,
    pub hits_found: u64,
    pub queue_occupancy: usize,
    pub queue_capacity: usize,
    pub last_queue_latency: Duration,
    pub max_queue_latency: Duration,
    pub mean_queue_latency: Duration,
    pub lagging_items: u64,
    pub timestamp_gaps: u64,
    pub worker_faults: u64,
    pub workers: Vec<WorkerStatus>,
}
