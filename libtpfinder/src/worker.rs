use crossbeam_channel::{Receiver, Sender};
use std::ops::Range;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use super::channel_state::ChannelState;
use super::constants::{LANES_PER_REGISTER, REGISTERS_PER_FRAME};
use super::kernel::{Hit, KernelParams, ProcessingKernel};
use super::window::Window;
use super::worker_status::WorkerCounters;

/// Divide the registers of a frame into `n_workers` contiguous ranges whose sizes differ by
/// at most one. Workers beyond the register count get nothing, so the result never holds
/// more than REGISTERS_PER_FRAME ranges.
pub fn partition_registers(n_workers: usize) -> Vec<Range<usize>> {
    let n_parts = n_workers.clamp(1, REGISTERS_PER_FRAME);
    let base = REGISTERS_PER_FRAME / n_parts;
    let extra = REGISTERS_PER_FRAME % n_parts;
    let mut parts = Vec::with_capacity(n_parts);
    let mut start = 0;
    for idx in 0..n_parts {
        let len = base + usize::from(idx < extra);
        parts.push(start..start + len);
        start += len;
    }
    parts
}

/// Messages from the dispatcher to a worker
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Set the baseline estimates from the first tick of this window (not processed)
    Seed(Arc<Window>),
    Window(Arc<Window>),
    Shutdown,
}

/// What a worker produced for one window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResult {
    pub worker_id: usize,
    pub sequence: u64,
    pub timestamp: u64,
    pub hits: Vec<Hit>,
    /// The kernel failed on this window; `hits` is empty
    pub faulted: bool,
}

/// One partition of the channels together with the state it owns
pub struct Worker {
    id: usize,
    registers: Range<usize>,
    kernel: Arc<dyn ProcessingKernel>,
    params: Arc<KernelParams>,
    states: Vec<ChannelState>,
    counters: Arc<WorkerCounters>,
}

impl Worker {
    pub fn new(
        id: usize,
        registers: Range<usize>,
        kernel: Arc<dyn ProcessingKernel>,
        params: Arc<KernelParams>,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        let states = params.new_states(registers.len());
        Self {
            id,
            registers,
            kernel,
            params,
            states,
            counters,
        }
    }

    pub fn registers(&self) -> &Range<usize> {
        &self.registers
    }

    pub fn states(&self) -> &[ChannelState] {
        &self.states
    }

    /// Initialize every lane's pedestal and quartiles from the window's first tick
    pub fn seed(&mut self, window: &Window) {
        if window.n_ticks() == 0 {
            return;
        }
        let first_channel = self.registers.start * LANES_PER_REGISTER;
        for (idx, state) in self.states.iter_mut().enumerate() {
            state.seed(window.sample(first_channel + idx, 0));
        }
    }

    /// Run the kernel over one window.
    ///
    /// A kernel error or panic marks the result as faulted and discards whatever hits the
    /// kernel had produced; the worker stays usable for the next window.
    pub fn process(&mut self, window: &Window) -> WorkerResult {
        let mut hits = Vec::new();
        let kernel = self.kernel.as_ref();
        let registers = self.registers.clone();
        let params = self.params.as_ref();
        let states = &mut self.states;
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            kernel.process_window(window, registers, states, params, &mut hits)
        }));

        let faulted = match outcome {
            Ok(Ok(())) => false,
            Ok(Err(e)) => {
                spdlog::error!(
                    "Worker {} kernel {} failed on window {}: {e}",
                    self.id,
                    kernel.name(),
                    window.sequence
                );
                true
            }
            Err(_) => {
                spdlog::error!(
                    "Worker {} kernel {} panicked on window {}",
                    self.id,
                    kernel.name(),
                    window.sequence
                );
                true
            }
        };

        if faulted {
            hits.clear();
            self.counters.record_fault();
        } else {
            self.counters.record_window(hits.len());
        }

        WorkerResult {
            worker_id: self.id,
            sequence: window.sequence,
            timestamp: window.timestamp,
            hits,
            faulted,
        }
    }

    /// The worker thread body: process windows in arrival order until shutdown.
    ///
    /// Returns the final channel states of the partition.
    pub fn run(
        mut self,
        rx: Receiver<WorkerMessage>,
        tx: Sender<WorkerResult>,
    ) -> Vec<ChannelState> {
        spdlog::debug!(
            "Worker {} started on registers {}..{}",
            self.id,
            self.registers.start,
            self.registers.end
        );
        while let Ok(message) = rx.recv() {
            match message {
                WorkerMessage::Seed(window) => self.seed(&window),
                WorkerMessage::Window(window) => {
                    let result = self.process(&window);
                    if tx.send(result).is_err() {
                        spdlog::error!("Worker {} lost its result channel!", self.id);
                        break;
                    }
                }
                WorkerMessage::Shutdown => break,
            }
        }
        spdlog::debug!("Worker {} stopped", self.id);
        self.states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHANNELS_PER_FRAME;
    use crate::error::KernelError;
    use crate::kernel::tests::delay_params;
    use crate::kernel::ScalarKernel;
    use crossbeam_channel::unbounded;

    struct PanickingKernel;

    impl ProcessingKernel for PanickingKernel {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn process_window(
            &self,
            window: &Window,
            registers: Range<usize>,
            states: &mut [ChannelState],
            params: &KernelParams,
            hits: &mut Vec<Hit>,
        ) -> Result<(), KernelError> {
            ScalarKernel.process_window(window, registers, states, params, hits)?;
            if window.sequence == 1 {
                panic!("injected fault");
            }
            Ok(())
        }
    }

    fn flat_window(sequence: u64, value: u16) -> Window {
        let mut channels = vec![vec![value; 24]; CHANNELS_PER_FRAME];
        // a pulse on channel 0 so every window yields a hit there
        for t in 4..8 {
            channels[0][t] = value + 100;
        }
        Window::from_channels(sequence, sequence * 600, &channels)
    }

    #[test]
    fn test_partition_sizes() {
        for n in 1..=REGISTERS_PER_FRAME {
            let parts = partition_registers(n);
            assert_eq!(parts.len(), n);
            assert_eq!(parts[0].start, 0);
            assert_eq!(parts[n - 1].end, REGISTERS_PER_FRAME);
            for pair in parts.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
            }
            let min = parts.iter().map(|p| p.len()).min().unwrap();
            let max = parts.iter().map(|p| p.len()).max().unwrap();
            assert!(max - min <= 1);
        }
        assert_eq!(partition_registers(3), vec![0..6, 6..11, 11..16]);
    }

    #[test]
    fn test_seed_uses_first_tick() {
        let params = Arc::new(delay_params(5, 10));
        let mut worker = Worker::new(
            0,
            2..4,
            Arc::new(ScalarKernel),
            params,
            Arc::new(WorkerCounters::default()),
        );
        let channels: Vec<Vec<u16>> = (0..CHANNELS_PER_FRAME)
            .map(|ch| vec![ch as u16 + 7, 0, 0])
            .collect();
        worker.seed(&Window::from_channels(0, 0, &channels));
        assert_eq!(worker.states().len(), 32);
        assert_eq!(worker.states()[0].pedestal, 32 + 7);
        assert_eq!(worker.states()[31].quantile75, 63 + 7);
    }

    #[test]
    fn test_fault_is_isolated() {
        let params = Arc::new(delay_params(5, 1_000_000));
        let counters = Arc::new(WorkerCounters::default());
        let mut worker = Worker::new(0, 0..1, Arc::new(PanickingKernel), params, counters.clone());
        worker.seed(&flat_window(0, 100));

        let first = worker.process(&flat_window(0, 100));
        assert!(!first.faulted);
        assert_eq!(first.hits.len(), 1);

        let second = worker.process(&flat_window(1, 100));
        assert!(second.faulted);
        assert!(second.hits.is_empty());

        let third = worker.process(&flat_window(2, 100));
        assert!(!third.faulted);
        assert_eq!(third.hits.len(), 1);

        let status = counters.status(0, worker.registers());
        assert_eq!(status.faults, 1);
        assert_eq!(status.windows_processed, 2);
        assert_eq!(status.hits_found, 2);
    }

    #[test]
    fn test_run_until_shutdown() {
        let params = Arc::new(delay_params(5, 1_000_000));
        let worker = Worker::new(
            3,
            15..16,
            Arc::new(ScalarKernel),
            params,
            Arc::new(WorkerCounters::default()),
        );
        let (msg_tx, msg_rx) = unbounded();
        let (res_tx, res_rx) = unbounded();
        let window = Arc::new(flat_window(0, 250));
        msg_tx.send(WorkerMessage::Seed(window.clone())).unwrap();
        msg_tx.send(WorkerMessage::Window(window.clone())).unwrap();
        msg_tx.send(WorkerMessage::Window(Arc::new(flat_window(1, 250)))).unwrap();
        msg_tx.send(WorkerMessage::Shutdown).unwrap();

        let states = std::thread::spawn(move || worker.run(msg_rx, res_tx))
            .join()
            .unwrap();
        let results: Vec<WorkerResult> = res_rx.iter().collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].sequence, 0);
        assert_eq!(results[1].sequence, 1);
        assert!(results.iter().all(|r| r.worker_id == 3 && r.hits.is_empty()));
        assert_eq!(states.len(), LANES_PER_REGISTER);
        assert!(states.iter().all(|s| s.pedestal == 250));
    }
}
