use crossbeam_channel::bounded;
use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::channel_state::ChannelState;
use super::config::Config;
use super::dispatcher::Dispatcher;
use super::error::FinderError;
use super::hit_store::{HitStore, TriggerPrimitive};
use super::kernel::{KernelParams, ProcessingKernel};
use super::merger::run_merger;
use super::metrics::{FinderMetrics, MetricsSnapshot};
use super::superchunk::validate_superchunk_size;
use super::task_queue::{task_queue, TaskSender};
use super::wib_frame::WibHeader;
use super::worker::{partition_registers, Worker};
use super::worker_status::WorkerCounters;

/// Join handles of the long-lived pipeline threads
struct Pipeline {
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<Vec<ChannelState>>>,
    merger: JoinHandle<()>,
}

impl Pipeline {
    /// Wait for every thread to drain and exit. The shutdown sentinel must already be queued.
    fn join(self) -> Result<Vec<ChannelState>, FinderError> {
        let mut panicked: Option<String> = None;
        if self.dispatcher.join().is_err() {
            panicked = Some(String::from("dispatcher"));
        }
        let mut states = Vec::new();
        for (idx, worker) in self.workers.into_iter().enumerate() {
            match worker.join() {
                Ok(partition) => states.extend(partition),
                Err(_) => panicked = Some(format!("worker {idx}")),
            }
        }
        if self.merger.join().is_err() {
            panicked = Some(String::from("merger"));
        }
        match panicked {
            Some(name) => Err(FinderError::ThreadPanic(name)),
            None => Ok(states),
        }
    }
}

/// The streaming trigger primitive finder.
///
/// Raw superchunks go in through [`submit_frame`](Self::submit_frame); trigger primitives
/// come out through the range queries. In between runs a pipeline of threads: one
/// dispatcher which decodes and assembles windows, `n_workers` workers each owning a
/// contiguous slice of the channels, and one merger which appends results to the hit store
/// in window order.
pub struct TriggerPrimitiveFinder {
    config: Config,
    kernel_name: &'static str,
    sender: TaskSender,
    store: Arc<RwLock<HitStore>>,
    metrics: Arc<FinderMetrics>,
    workers: Vec<(Range<usize>, Arc<WorkerCounters>)>,
    pipeline: Option<Pipeline>,
}

impl TriggerPrimitiveFinder {
    /// Validate the config and start the pipeline with the configured kernel
    pub fn new(config: Config) -> Result<Self, FinderError> {
        let kernel = config.kernel.build();
        Self::with_kernel(config, kernel)
    }

    /// Start the pipeline with an explicit kernel implementation
    pub fn with_kernel(
        config: Config,
        kernel: Arc<dyn ProcessingKernel>,
    ) -> Result<Self, FinderError> {
        config.validate()?;
        let params = Arc::new(KernelParams::from_config(&config));
        let store = Arc::new(RwLock::new(HitStore::new(config.hit_store_capacity)));
        let metrics = Arc::new(FinderMetrics::default());
        let (sender, receiver) = task_queue(config.queue_capacity, config.submit_policy);

        let partitions = partition_registers(config.n_workers);
        let mut workers = Vec::with_capacity(partitions.len());
        let mut worker_handles = Vec::with_capacity(partitions.len());
        let mut worker_txs = Vec::with_capacity(partitions.len());
        let mut result_rxs = Vec::with_capacity(partitions.len());
        for (idx, registers) in partitions.into_iter().enumerate() {
            let (msg_tx, msg_rx) = bounded(config.worker_queue_depth);
            let (res_tx, res_rx) = bounded(config.worker_queue_depth);
            let counters = Arc::new(WorkerCounters::default());
            let worker = Worker::new(
                idx,
                registers.clone(),
                kernel.clone(),
                params.clone(),
                counters.clone(),
            );
            let handle = std::thread::Builder::new()
                .name(format!("tpfinder-worker-{idx}"))
                .spawn(move || worker.run(msg_rx, res_tx))
                .map_err(FinderError::Spawn)?;
            worker_handles.push(handle);
            worker_txs.push(msg_tx);
            result_rxs.push(res_rx);
            workers.push((registers, counters));
        }

        let merger_store = store.clone();
        let merger_metrics = metrics.clone();
        let merger = std::thread::Builder::new()
            .name(String::from("tpfinder-merger"))
            .spawn(move || run_merger(result_rxs, merger_store, merger_metrics))
            .map_err(FinderError::Spawn)?;

        let dispatcher = Dispatcher::new(
            receiver,
            worker_txs,
            config.superchunks_per_window(),
            config.max_queue_latency(),
            metrics.clone(),
        );
        let dispatcher = std::thread::Builder::new()
            .name(String::from("tpfinder-dispatcher"))
            .spawn(move || dispatcher.run())
            .map_err(FinderError::Spawn)?;

        spdlog::info!(
            "Started trigger primitive finder: {} workers, {} kernel, {} frames per window",
            workers.len(),
            kernel.name(),
            config.window_size_in_frames
        );

        Ok(Self {
            kernel_name: kernel.name(),
            config,
            sender,
            store,
            metrics,
            workers,
            pipeline: Some(Pipeline {
                dispatcher,
                workers: worker_handles,
                merger,
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn kernel_name(&self) -> &'static str {
        self.kernel_name
    }

    pub fn is_shut_down(&self) -> bool {
        self.pipeline.is_none()
    }

    /// Hand one raw superchunk to the pipeline.
    ///
    /// Returns `Ok(true)` once queued and `Ok(false)` if the queue stayed full under the
    /// submit policy; a rejected buffer is dropped. Buffers of the wrong size are refused
    /// with an error and nothing is queued.
    pub fn submit_frame(&self, buffer: Vec<u8>) -> Result<bool, FinderError> {
        Ok(self.offer_frame(buffer)?.is_ok())
    }

    /// Like [`submit_frame`](Self::submit_frame), but a rejected buffer comes back as
    /// `Ok(Err(buffer))` so it can be resent without a copy.
    pub fn offer_frame(&self, buffer: Vec<u8>) -> Result<Result<(), Vec<u8>>, FinderError> {
        if self.is_shut_down() {
            return Err(FinderError::ShutDown);
        }
        if let Err(e) = validate_superchunk_size(&buffer) {
            self.metrics.record_malformed();
            return Err(FinderError::Frame(e));
        }
        let header = WibHeader::read(&buffer)?;

        let queued = self.sender.submit(header.timestamp, buffer);
        match queued {
            Ok(()) => self.metrics.record_accepted(),
            Err(_) => self.metrics.record_rejected(),
        }
        Ok(queued)
    }

    /// Every stored primitive whose window timestamp lies in `[start, end]`
    pub fn hits_in_range(
        &self,
        start: u64,
        end: u64,
    ) -> Result<Vec<TriggerPrimitive>, FinderError> {
        if self.is_shut_down() {
            return Err(FinderError::ShutDown);
        }
        let store = self.store.read().map_err(|_| FinderError::PoisonedStore)?;
        Ok(store.in_range(start, end))
    }

    /// Primitives within the readout window radius of `timestamp`
    pub fn hits_around(&self, timestamp: u64) -> Result<Vec<TriggerPrimitive>, FinderError> {
        let radius = self.config.readout_window_radius;
        self.hits_in_range(
            timestamp.saturating_sub(radius),
            timestamp.saturating_add(radius),
        )
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let workers = self
            .workers
            .iter()
            .enumerate()
            .map(|(idx, (registers, counters))| counters.status(idx, registers))
            .collect();
        self.metrics
            .snapshot(self.sender.len(), self.sender.capacity(), workers)
    }

    /// Block until everything submitted so far has been processed and merged, or until
    /// `timeout` elapses. Returns whether the pipeline went idle.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool, FinderError> {
        if self.is_shut_down() {
            return Err(FinderError::ShutDown);
        }
        let start = Instant::now();
        loop {
            if self.metrics.is_idle() {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drain the queue, stop and join every thread.
    ///
    /// Superchunks queued before the call are processed first; a partially assembled
    /// window is discarded. Returns the final state of every channel, in channel order.
    pub fn shutdown(&mut self) -> Result<Vec<ChannelState>, FinderError> {
        let pipeline = self.pipeline.take().ok_or(FinderError::ShutDown)?;
        if !self.sender.send_shutdown() {
            spdlog::warn!("Dispatcher exited before the shutdown request");
        }
        let states = pipeline.join()?;
        let snapshot = self.metrics.snapshot(0, self.sender.capacity(), vec![]);
        spdlog::info!(
            "Trigger primitive finder stopped after {} windows with {} hits",
            snapshot.windows_processed,
            snapshot.hits_found
        );
        Ok(states)
    }
}

impl Drop for TriggerPrimitiveFinder {
    fn drop(&mut self) {
        if self.pipeline.is_some() {
            if let Err(e) = self.shutdown() {
                spdlog::error!("Failed to shut down the finder cleanly: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use crate::config::KernelKind;
    use crate::constants::*;
    use crate::error::{FrameError, KernelError};
    use crate::generator::{build_superchunk, GeneratorSettings, SuperchunkGenerator};
    use crate::kernel::{Hit, ScalarKernel};
    use crate::superchunk::decode_superchunk;
    use crate::wib_frame::LinkId;
    use crate::window::{Window, WindowAssembler};

    const SUPERCHUNK_TICKS: u64 = FRAMES_PER_SUPERCHUNK as u64 * TICKS_PER_SAMPLE;
    const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

    fn submit_all(finder: &TriggerPrimitiveFinder, chunks: &[Vec<u8>]) {
        for chunk in chunks {
            let mut buffer = chunk.clone();
            while let Err(returned) = finder.offer_frame(buffer).unwrap() {
                buffer = returned;
                std::thread::sleep(Duration::from_millis(1));
            }
        }
    }

    fn flat_chunks(n: usize, value: u16) -> Vec<Vec<u8>> {
        (0..n as u64)
            .map(|i| {
                build_superchunk(LinkId::default(), i * SUPERCHUNK_TICKS, |_, _| value).unwrap()
            })
            .collect()
    }

    /// Everything on one thread: assemble, seed from the first window, one scalar kernel
    /// over all registers
    fn sequential_reference(
        config: &Config,
        chunks: &[Vec<u8>],
    ) -> (Vec<TriggerPrimitive>, Vec<ChannelState>) {
        let params = KernelParams::from_config(config);
        let mut assembler = WindowAssembler::new(config.superchunks_per_window());
        let mut states = params.new_states(REGISTERS_PER_FRAME);
        let mut store = HitStore::new(config.hit_store_capacity);
        let mut seeded = false;
        for raw in chunks {
            let decoded = decode_superchunk(raw).unwrap();
            if let Some(window) = assembler.push(&decoded) {
                if !seeded {
                    for (channel, state) in states.iter_mut().enumerate() {
                        state.seed(window.sample(channel, 0));
                    }
                    seeded = true;
                }
                let mut hits = Vec::new();
                let registers = 0..REGISTERS_PER_FRAME;
                ScalarKernel
                    .process_window(&window, registers, &mut states, &params, &mut hits)
                    .unwrap();
                store.push_batch(window.timestamp, &hits);
            }
        }
        (store.in_range(0, u64::MAX), states)
    }

    #[test]
    fn test_all_zero_stream() {
        let mut finder = TriggerPrimitiveFinder::new(Config::default()).unwrap();
        submit_all(&finder, &flat_chunks(1000, 0));
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());

        assert!(finder.hits_in_range(0, u64::MAX).unwrap().is_empty());
        let metrics = finder.metrics();
        assert_eq!(metrics.frames_received, 1000);
        assert_eq!(metrics.windows_processed, 250);
        assert_eq!(metrics.hits_found, 0);
        assert_eq!(metrics.timestamp_gaps, 0);
        assert_eq!(metrics.workers.len(), 2);

        let states = finder.shutdown().unwrap();
        assert_eq!(states.len(), CHANNELS_PER_FRAME);
        assert!(states.iter().all(|s| s.pedestal.abs() <= 1));
    }

    #[test]
    fn test_pipeline_matches_sequential_processing() {
        let settings = GeneratorSettings {
            pulse_probability: 0.002,
            ..Default::default()
        };
        let chunks: Vec<Vec<u8>> = SuperchunkGenerator::new(settings, 2024)
            .unwrap()
            .take(40)
            .collect::<Result<_, _>>()
            .unwrap();

        let layouts = [
            (3, KernelKind::Vector),
            (16, KernelKind::Scalar),
            (1, KernelKind::Vector),
        ];
        for (n_workers, kernel) in layouts {
            let config = Config {
                n_workers,
                kernel,
                ..Default::default()
            };
            let (expected_hits, expected_states) = sequential_reference(&config, &chunks);
            assert!(!expected_hits.is_empty());

            let mut finder = TriggerPrimitiveFinder::new(config).unwrap();
            submit_all(&finder, &chunks);
            assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());
            let hits = finder.hits_in_range(0, u64::MAX).unwrap();
            assert_eq!(hits, expected_hits, "{n_workers} workers");
            assert!(hits.windows(2).all(|p| p[0].window_timestamp <= p[1].window_timestamp));

            let states = finder.shutdown().unwrap();
            assert_eq!(states, expected_states, "{n_workers} workers");
        }
    }

    #[test]
    fn test_hits_around_a_trigger() {
        let config = Config {
            window_size_in_frames: FRAMES_PER_SUPERCHUNK,
            fir_tap_count: 4,
            fir_taps: Some(vec![0, 0, 0, 64]),
            ..Default::default()
        };
        let finder = TriggerPrimitiveFinder::new(config).unwrap();
        let chunks: Vec<Vec<u8>> = (0..5u64)
            .map(|i| {
                build_superchunk(LinkId::default(), i * SUPERCHUNK_TICKS, |ch, t| {
                    if i == 3 && ch == 9 && (2..5).contains(&t) {
                        150
                    } else {
                        100
                    }
                })
                .unwrap()
            })
            .collect();
        submit_all(&finder, &chunks);
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());

        let trigger = 3 * SUPERCHUNK_TICKS;
        let around = finder.hits_around(trigger).unwrap();
        assert_eq!(
            around,
            vec![TriggerPrimitive {
                window_timestamp: trigger,
                channel: 9,
                end_index: 6,
                charge: 150,
                time_over_threshold: 3,
            }]
        );
        assert!(finder.hits_in_range(trigger + 1, u64::MAX).unwrap().is_empty());
        let radius = finder.config().readout_window_radius;
        assert!(finder.hits_around(trigger + radius + 1).unwrap().is_empty());
        // queries do not consume
        assert_eq!(finder.hits_in_range(0, u64::MAX).unwrap().len(), 1);
    }

    struct FaultyKernel;

    impl ProcessingKernel for FaultyKernel {
        fn name(&self) -> &'static str {
            "faulty"
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
                panic!("injected kernel fault");
            }
            Ok(())
        }
    }

    #[test]
    fn test_kernel_fault_does_not_stop_the_pipeline() {
        let config = Config {
            window_size_in_frames: FRAMES_PER_SUPERCHUNK,
            ..Default::default()
        };
        let mut finder =
            TriggerPrimitiveFinder::with_kernel(config, Arc::new(FaultyKernel)).unwrap();
        assert_eq!(finder.kernel_name(), "faulty");
        submit_all(&finder, &flat_chunks(4, 200));
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());

        let metrics = finder.metrics();
        assert_eq!(metrics.windows_processed, 4);
        assert_eq!(metrics.worker_faults, 2);
        assert!(metrics.workers.iter().all(|w| w.faults == 1 && w.windows_processed == 3));

        // the finder still accepts work after the fault
        assert!(finder.submit_frame(flat_chunks(5, 200).pop().unwrap()).unwrap());
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());
        assert_eq!(finder.metrics().windows_processed, 5);
        assert_eq!(finder.shutdown().unwrap().len(), CHANNELS_PER_FRAME);
    }

    /// Holds every window until the sending side of `release` is dropped
    struct GatedKernel {
        release: Receiver<()>,
    }

    impl ProcessingKernel for GatedKernel {
        fn name(&self) -> &'static str {
            "gated"
        }

        fn process_window(
            &self,
            window: &Window,
            registers: Range<usize>,
            states: &mut [ChannelState],
            params: &KernelParams,
            hits: &mut Vec<Hit>,
        ) -> Result<(), KernelError> {
            let _ = self.release.recv();
            ScalarKernel.process_window(window, registers, states, params, hits)
        }
    }

    #[test]
    fn test_full_queue_rejects_submissions() {
        let config = Config {
            window_size_in_frames: FRAMES_PER_SUPERCHUNK,
            n_workers: 1,
            queue_capacity: 1,
            worker_queue_depth: 1,
            ..Default::default()
        };
        let (gate_tx, release) = bounded::<()>(0);
        let mut finder =
            TriggerPrimitiveFinder::with_kernel(config, Arc::new(GatedKernel { release })).unwrap();
        // declared after the finder so it is dropped first if an assertion fails
        let gate = gate_tx;

        // the stalled worker backs up its window queue, then the dispatcher, then the task
        // queue; a superchunk refused for 100 ms means the pipeline is full
        let chunks = flat_chunks(32, 100);
        let mut accepted = 0;
        'submit: for chunk in chunks.iter() {
            let refused_since = Instant::now();
            while !finder.submit_frame(chunk.clone()).unwrap() {
                if refused_since.elapsed() >= Duration::from_millis(100) {
                    break 'submit;
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            accepted += 1;
        }
        assert!(accepted < chunks.len(), "the queue never filled up");

        let pending = chunks[accepted].clone();
        assert_eq!(finder.offer_frame(pending.clone()).unwrap(), Err(pending));
        let metrics = finder.metrics();
        assert!(metrics.frames_rejected > 0);
        assert_eq!(metrics.frames_received, accepted as u64);
        assert_eq!(metrics.queue_occupancy, 1);

        drop(gate);
        submit_all(&finder, &chunks[accepted..]);
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());
        assert_eq!(finder.metrics().windows_processed, chunks.len() as u64);
        finder.shutdown().unwrap();
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        let finder = TriggerPrimitiveFinder::new(Config::default()).unwrap();
        assert!(matches!(
            finder.submit_frame(vec![0u8; 100]),
            Err(FinderError::Frame(FrameError::IncorrectSize(100)))
        ));
        assert_eq!(finder.metrics().frames_malformed, 1);
        assert!(finder.submit_frame(flat_chunks(1, 0).pop().unwrap()).unwrap());
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());
        assert_eq!(finder.metrics().frames_received, 1);
    }

    #[test]
    fn test_timestamp_gaps_are_counted() {
        let finder = TriggerPrimitiveFinder::new(Config::default()).unwrap();
        for ts in [0, SUPERCHUNK_TICKS, 5 * SUPERCHUNK_TICKS, 6 * SUPERCHUNK_TICKS] {
            let chunk = build_superchunk(LinkId::default(), ts, |_, _| 10).unwrap();
            assert!(finder.submit_frame(chunk).unwrap());
        }
        assert!(finder.wait_idle(IDLE_TIMEOUT).unwrap());
        let metrics = finder.metrics();
        assert_eq!(metrics.timestamp_gaps, 1);
        // state is not reset by the gap
        assert_eq!(metrics.windows_processed, 1);
    }

    #[test]
    fn test_use_after_shutdown() {
        let mut finder = TriggerPrimitiveFinder::new(Config::default()).unwrap();
        submit_all(&finder, &flat_chunks(6, 50));
        // the pending partial window is discarded, the full one is processed
        let states = finder.shutdown().unwrap();
        assert!(states.iter().all(|s| s.pedestal == 50));
        assert_eq!(finder.metrics().windows_processed, 1);

        assert!(finder.is_shut_down());
        assert!(matches!(
            finder.submit_frame(flat_chunks(1, 0).pop().unwrap()),
            Err(FinderError::ShutDown)
        ));
        assert!(matches!(finder.hits_in_range(0, 10), Err(FinderError::ShutDown)));
        assert!(matches!(finder.wait_idle(IDLE_TIMEOUT), Err(FinderError::ShutDown)));
        assert!(matches!(finder.shutdown(), Err(FinderError::ShutDown)));
    }

    #[test]
    fn test_invalid_config_fails_construction() {
        let config = Config {
            n_workers: 0,
            ..Default::default()
        };
        assert!(matches!(
            TriggerPrimitiveFinder::new(config),
            Err(FinderError::ConfigError(_))
        ));
    }
}
