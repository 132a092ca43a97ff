use crossbeam_channel::Receiver;
use std::sync::{Arc, RwLock};

use super::hit_store::HitStore;
use super::kernel::Hit;
use super::metrics::FinderMetrics;
use super::worker::WorkerResult;

/// Collect worker results in window order and append them to the hit store.
///
/// The k-th result of every worker belongs to window k, so receiving one result per worker
/// in turn lines the partitions of a window up regardless of which worker finished first.
/// Partitions are contiguous and ascending, so concatenating in worker order keeps hits
/// sorted by channel. Returns once any worker hangs up.
pub fn run_merger(
    results: Vec<Receiver<WorkerResult>>,
    store: Arc<RwLock<HitStore>>,
    metrics: Arc<FinderMetrics>,
) {
    let mut batch: Vec<WorkerResult> = Vec::with_capacity(results.len());
    let mut hits: Vec<Hit> = Vec::new();
    'merge: loop {
        batch.clear();
        for rx in results.iter() {
            match rx.recv() {
                Ok(result) => batch.push(result),
                Err(_) => break 'merge,
            }
        }
        let Some(first) = batch.first() else {
            break;
        };
        let (sequence, timestamp) = (first.sequence, first.timestamp);
        if batch.iter().any(|r| r.sequence != sequence) {
            spdlog::error!("Worker results for window {sequence} are out of step!");
        }

        let faults = batch.iter().filter(|r| r.faulted).count();
        hits.clear();
        for result in batch.iter_mut() {
            hits.append(&mut result.hits);
        }

        match store.write() {
            Ok(mut store) => store.push_batch(timestamp, &hits),
            Err(_) => {
                spdlog::error!("Hit store lock was poisoned; merger is stopping");
                break;
            }
        }
        metrics.record_merged(hits.len(), faults);
    }
    spdlog::debug!("Merger stopped");
}
