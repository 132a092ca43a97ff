use crossbeam_channel::{bounded, Receiver, RecvError, SendTimeoutError, Sender, TrySendError};
use std::time::{Duration, Instant};

use super::config::SubmitPolicy;

/// A raw superchunk waiting to be decoded
#[derive(Debug)]
pub struct QueuedSuperchunk {
    pub timestamp: u64,
    pub buffer: Vec<u8>,
    pub enqueued_at: Instant,
}

#[derive(Debug)]
pub enum QueueItem {
    Superchunk(QueuedSuperchunk),
    /// Sentinel: everything queued before it is processed, then the pipeline exits
    Shutdown,
}

/// Create a bounded task queue of the given capacity
pub fn task_queue(capacity: usize, policy: SubmitPolicy) -> (TaskSender, TaskReceiver) {
    let (tx, rx) = bounded(capacity);
    (
        TaskSender {
            tx,
            policy,
            capacity,
        },
        TaskReceiver { rx },
    )
}

/// Producer side of the task queue. Cloneable; safe to use from several threads.
#[derive(Debug, Clone)]
pub struct TaskSender {
    tx: Sender<QueueItem>,
    policy: SubmitPolicy,
    capacity: usize,
}

impl TaskSender {
    /// Queue a superchunk following the submit policy.
    ///
    /// If the queue stayed full (or the consumer is gone) the buffer is handed back so the
    /// caller can resend it.
    pub fn submit(&self, timestamp: u64, buffer: Vec<u8>) -> Result<(), Vec<u8>> {
        let item = QueueItem::Superchunk(QueuedSuperchunk {
            timestamp,
            buffer,
            enqueued_at: Instant::now(),
        });
        let refused = match self.policy {
            SubmitPolicy::FailFast => match self.tx.try_send(item) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(item)) | Err(TrySendError::Disconnected(item)) => item,
            },
            SubmitPolicy::Block { timeout_ms } => {
                match self.tx.send_timeout(item, Duration::from_millis(timeout_ms)) {
                    Ok(()) => return Ok(()),
                    Err(SendTimeoutError::Timeout(item))
                    | Err(SendTimeoutError::Disconnected(item)) => item,
                }
            }
        };
        match refused {
            QueueItem::Superchunk(chunk) => Err(chunk.buffer),
            QueueItem::Shutdown => Err(Vec::new()),
        }
    }

    /// Push the shutdown sentinel, waiting for space. Returns false if the consumer is gone.
    pub fn send_shutdown(&self) -> bool {
        self.tx.send(QueueItem::Shutdown).is_ok()
    }

    /// Items currently queued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Consumer side of the task queue
#[derive(Debug)]
pub struct TaskReceiver {
    rx: Receiver<QueueItem>,
}

impl TaskReceiver {
    /// Block for the next item. Superchunks come back with their time spent in the queue.
    /// A disconnected queue is reported as Shutdown.
    pub fn recv(&self) -> (QueueItem, Duration) {
        match self.rx.recv() {
            Ok(QueueItem::Superchunk(chunk)) => {
                let latency = chunk.enqueued_at.elapsed();
                (QueueItem::Superchunk(chunk), latency)
            }
            Ok(QueueItem::Shutdown) | Err(RecvError) => (QueueItem::Shutdown, Duration::ZERO),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LagTransition {
    Steady,
    FellBehind,
    CaughtUp,
}

/// Watches queueing latency for signs that the consumer is falling behind
#[derive(Debug, Clone)]
pub struct LagMonitor {
    threshold: Duration,
    lagging: bool,
}

impl LagMonitor {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            lagging: false,
        }
    }

    pub fn is_lagging(&self) -> bool {
        self.lagging
    }

    /// Record the latency of a dequeued item; reports changes of the lagging state
    pub fn observe(&mut self, latency: Duration) -> LagTransition {
        let over = latency > self.threshold;
        let transition = match (self.lagging, over) {
            (false, true) => LagTransition::FellBehind,
            (true, false) => LagTransition::CaughtUp,
            _ => LagTransition::Steady,
        };
        self.lagging = over;
        transition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_fast_rejects_when_full() {
        let (tx, rx) = task_queue(2, SubmitPolicy::FailFast);
        assert!(tx.submit(0, vec![1]).is_ok());
        assert!(tx.submit(1, vec![2]).is_ok());
        assert_eq!(tx.submit(2, vec![3]), Err(vec![3]));
        assert_eq!(tx.len(), 2);

        // draining one item makes room again
        match rx.recv() {
            (QueueItem::Superchunk(chunk), _) => assert_eq!(chunk.timestamp, 0),
            other => panic!("unexpected {other:?}"),
        }
        assert!(tx.submit(3, vec![4]).is_ok());
    }

    #[test]
    fn test_blocking_policy_times_out() {
        let (tx, _rx) = task_queue(1, SubmitPolicy::Block { timeout_ms: 20 });
        assert!(tx.submit(0, vec![]).is_ok());
        let start = Instant::now();
        assert_eq!(tx.submit(1, vec![5, 6]), Err(vec![5, 6]));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_items_carry_queue_latency() {
        let (tx, rx) = task_queue(4, SubmitPolicy::FailFast);
        assert!(tx.submit(7, vec![]).is_ok());
        std::thread::sleep(Duration::from_millis(15));
        let (item, latency) = rx.recv();
        assert!(matches!(item, QueueItem::Superchunk(QueuedSuperchunk { timestamp: 7, .. })));
        assert!(latency >= Duration::from_millis(15));
    }

    #[test]
    fn test_shutdown_after_pending_items() {
        let (tx, rx) = task_queue(4, SubmitPolicy::FailFast);
        assert!(tx.submit(1, vec![]).is_ok());
        assert!(tx.send_shutdown());
        assert!(matches!(rx.recv().0, QueueItem::Superchunk(_)));
        assert!(matches!(rx.recv().0, QueueItem::Shutdown));
        drop(tx);
        assert!(matches!(rx.recv().0, QueueItem::Shutdown));
    }

    #[test]
    fn test_lag_monitor_transitions() {
        let mut monitor = LagMonitor::new(Duration::from_millis(10));
        assert_eq!(monitor.observe(Duration::from_millis(1)), LagTransition::Steady);
        assert_eq!(monitor.observe(Duration::from_millis(20)), LagTransition::FellBehind);
        assert!(monitor.is_lagging());
        assert_eq!(monitor.observe(Duration::from_millis(30)), LagTransition::Steady);
        assert_eq!(monitor.observe(Duration::from_millis(2)), LagTransition::CaughtUp);
    }
}
