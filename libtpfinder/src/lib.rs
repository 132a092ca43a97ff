//! # tpfinder
//!
//! tpfinder is a streaming trigger primitive finder for liquid argon TPC readout, written
//! in Rust. It takes the raw WIB frame stream of one front-end link, 256 channels of 12-bit
//! ADC samples per tick, and finds the charge deposits ("hits") on every channel in real
//! time. Hits are kept in a bounded, time ordered store which can be queried around a
//! trigger timestamp.
//!
//! ## Installation
//!
//! The only method of install is from source. If you have not used Rust before, you will
//! most likely need to install the Rust tool chain. See the
//! [Rust docs](https://www.rust-lang.org/tools/install) for installation instructions.
//!
//! To build and install the CLI use `cargo install --path ./tpfinder_cli` from the top
//! level tpfinder repository.
//!
//! ## How it works
//!
//! Frames arrive in superchunks of 12 consecutive ticks. A superchunk is validated and put
//! on a bounded queue by the caller; everything after that runs on pipeline threads:
//!
//! - The dispatcher decodes each superchunk into a register-major layout (16 registers of
//!   16 lanes) and assembles `window_size_in_frames` ticks into a window. The first window
//!   seeds every channel's pedestal and quartile estimates.
//! - Each worker owns a contiguous range of registers and the rolling state of their
//!   channels. For every tick it updates the pedestal and quartiles with the frugal
//!   streaming estimator, subtracts the pedestal, runs an integer FIR low-pass filter and
//!   compares the result against `threshold_factor` times the interquartile spread. An
//!   over-threshold excursion becomes a hit when it ends.
//! - The merger lines up the results of all workers for each window and appends them to
//!   the hit store in window order.
//!
//! Two kernels implement the per-window processing: a scalar reference and a vectorized
//! one which processes the 16 lanes of a register in lockstep. Both find the same hits.
//!
//! ## Configuration
//!
//! The finder is configured with a YAML file. Missing keys take their default value. The
//! default configuration is:
//!
//! ```yml
//! window_size_in_frames: 48
//! n_workers: 2
//! queue_capacity: 1024
//! worker_queue_depth: 4
//! fir_tap_count: 16
//! tap_exponent: 6
//! fir_cutoff: 0.1
//! fir_taps: null
//! threshold_factor: 5
//! frugal_step_limit: 10
//! hit_store_capacity: 100000
//! readout_window_radius: 12500
//! max_queue_latency_ms: 100
//! submit_policy: FailFast
//! kernel: Vector
//! ```
//!
//! `window_size_in_frames` must be a multiple of 12 and `fir_tap_count` a power of two.
//! Setting `fir_taps` to a list of `fir_tap_count` integers replaces the designed low-pass
//! filter. `submit_policy` can also be `!Block { timeout_ms: 50 }` to wait for queue space
//! instead of rejecting a superchunk immediately.
//!
//! ## Output
//!
//! Each trigger primitive records the timestamp of the window it was found in, the
//! channel, the tick at which the signal fell back under threshold, the integrated filtered
//! charge and the time over threshold in ticks. The CLI can dump the stored primitives as
//! YAML and writes a log file, `tpfinder.log`, with the status of the run.
pub mod channel_state;
pub mod config;
pub mod constants;
pub mod dispatcher;
pub mod error;
pub mod finder;
pub mod fir;
pub mod frame_file;
pub mod generator;
pub mod hit_store;
pub mod kernel;
pub mod merger;
pub mod metrics;
pub mod superchunk;
pub mod task_queue;
pub mod wib_frame;
pub mod window;
pub mod worker;
pub mod worker_status;
