use crossbeam_channel::Sender;
use std::sync::Arc;
use std::time::Duration;

use super::constants::{FRAMES_PER_SUPERCHUNK, TICKS_PER_SAMPLE};
use super::metrics::FinderMetrics;
use super::superchunk::decode_superchunk;
use super::task_queue::{LagMonitor, LagTransition, QueueItem, QueuedSuperchunk, TaskReceiver};
use super::window::{Window, WindowAssembler};
use super::worker::WorkerMessage;

/// Timestamp distance between two consecutive superchunks of a link
const SUPERCHUNK_TICKS: u64 = FRAMES_PER_SUPERCHUNK as u64 * TICKS_PER_SAMPLE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestPhase {
    /// No window has been assembled yet; the first one seeds the baselines
    AwaitingFirstWindow,
    Steady,
}

/// Outcome of comparing a superchunk timestamp against the previous one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Continuity {
    First,
    Contiguous,
    Gap { expected: u64, found: u64 },
}

/// Tracks the expected timestamp of the next superchunk
#[derive(Debug, Clone, Default)]
pub struct ContinuityCheck {
    last: Option<u64>,
}

impl ContinuityCheck {
    pub fn observe(&mut self, timestamp: u64) -> Continuity {
        let result = match self.last {
            None => Continuity::First,
            Some(last) => {
                let expected = last.wrapping_add(SUPERCHUNK_TICKS);
                if expected == timestamp {
                    Continuity::Contiguous
                } else {
                    Continuity::Gap {
                        expected,
                        found: timestamp,
                    }
                }
            }
        };
        self.last = Some(timestamp);
        result
    }
}

/// The single consumer of the task queue.
///
/// Decodes superchunks, assembles them into windows and fans each window out to every
/// worker. Owns the assembly buffer; nothing else touches it.
pub struct Dispatcher {
    receiver: TaskReceiver,
    workers: Vec<Sender<WorkerMessage>>,
    assembler: WindowAssembler,
    phase: IngestPhase,
    continuity: ContinuityCheck,
    lag: LagMonitor,
    metrics: Arc<FinderMetrics>,
}

impl Dispatcher {
    pub fn new(
        receiver: TaskReceiver,
        workers: Vec<Sender<WorkerMessage>>,
        superchunks_per_window: usize,
        max_queue_latency: Duration,
        metrics: Arc<FinderMetrics>,
    ) -> Self {
        Self {
            receiver,
            workers,
            assembler: WindowAssembler::new(superchunks_per_window),
            phase: IngestPhase::AwaitingFirstWindow,
            continuity: ContinuityCheck::default(),
            lag: LagMonitor::new(max_queue_latency),
            metrics,
        }
    }

    /// Consume the queue until the shutdown sentinel, then stop every worker
    pub fn run(mut self) {
        loop {
            match self.receiver.recv() {
                (QueueItem::Superchunk(chunk), latency) => self.handle(chunk, latency),
                (QueueItem::Shutdown, _) => break,
            }
        }

        if self.assembler.pending() > 0 {
            spdlog::warn!(
                "Discarding partial window of {} superchunks at shutdown",
                self.assembler.pending()
            );
        }
        for (idx, worker) in self.workers.iter().enumerate() {
            if worker.send(WorkerMessage::Shutdown).is_err() {
                spdlog::warn!("Worker {idx} was already gone at shutdown");
            }
        }
        spdlog::debug!("Dispatcher stopped");
    }

    fn handle(&mut self, chunk: QueuedSuperchunk, latency: Duration) {
        let lagging = match self.lag.observe(latency) {
            LagTransition::FellBehind => {
                spdlog::warn!(
                    "Finder is falling behind: superchunk waited {:?} in the queue",
                    latency
                );
                true
            }
            LagTransition::CaughtUp => {
                spdlog::info!("Finder caught up with the input");
                false
            }
            LagTransition::Steady => self.lag.is_lagging(),
        };
        self.metrics.record_dequeued(latency, lagging);

        if let Continuity::Gap { expected, found } = self.continuity.observe(chunk.timestamp) {
            self.metrics.record_gap();
            spdlog::warn!("Timestamp discontinuity: expected {expected}, found {found}");
        }

        match decode_superchunk(&chunk.buffer) {
            Ok(decoded) => {
                if let Some(window) = self.assembler.push(&decoded) {
                    self.dispatch(window);
                }
            }
            Err(e) => {
                self.metrics.record_malformed();
                spdlog::error!("Dropping superchunk at {}: {e}", chunk.timestamp);
            }
        }
        self.metrics.record_consumed();
    }

    fn dispatch(&mut self, window: Window) {
        let window = Arc::new(window);
        if self.phase == IngestPhase::AwaitingFirstWindow {
            for worker in self.workers.iter() {
                // a missing worker is reported below when the window itself is sent
                let _ = worker.send(WorkerMessage::Seed(window.clone()));
            }
            self.phase = IngestPhase::Steady;
            spdlog::info!(
                "Seeded channel baselines from window at timestamp {}",
                window.timestamp
            );
        }

        self.metrics.record_dispatched();
        for (idx, worker) in self.workers.iter().enumerate() {
            if worker.send(WorkerMessage::Window(window.clone())).is_err() {
                spdlog::error!(
                    "Worker {idx} hung up; window {} will not be merged",
                    window.sequence
                );
            }
        }
    }
}
