use serde::Serialize;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters of one worker, shared with whoever reports metrics
#[derive(Debug, Default)]
pub struct WorkerCounters {
    windows_processed: AtomicU64,
    hits_found: AtomicU64,
    faults: AtomicU64,
}

impl WorkerCounters {
    pub fn record_window(&self, n_hits: usize) {
        self.windows_processed.fetch_add(1, Ordering::Relaxed);
        self.hits_found.fetch_add(n_hits as u64, Ordering::Relaxed);
    }

    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self, worker_id: usize, registers: &Range<usize>) -> WorkerStatus {
        WorkerStatus::new(
            worker_id,
            registers.start,
            registers.end,
            self.windows_processed.load(Ordering::Relaxed),
            self.hits_found.load(Ordering::Relaxed),
            self.faults.load(Ordering::Relaxed),
        )
    }
}

/// Snapshot of a worker's progress
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub worker_id: usize,
    pub first_register: usize,
    /// One past the last register handled by the worker
    pub last_register: usize,
    pub windows_processed: u64,
    pub hits_found: u64,
    pub faults: u64,
}

impl WorkerStatus {
    pub fn new(
        worker_id: usize,
        first_register: usize,
        last_register: usize,
        windows_processed: u64,
        hits_found: u64,
        faults: u64,
    ) -> Self {
        Self {
            worker_id,
            first_register,
            last_register,
            windows_processed,
            hits_found,
            faults,
        }
    }
}
