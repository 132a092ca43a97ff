//! The windowed hit-finding kernels.
//!
//! A kernel takes one [`Window`], the register range of a worker partition and the
//! [`ChannelState`] of every lane in that range. For each lane it walks the window tick by
//! tick: update the pedestal and quartile estimates, subtract the pedestal, run the FIR
//! filter, compare against `sigma * multiplier * threshold_factor` and emit a [`Hit`] when an
//! over-threshold excursion ends.
//!
//! Two implementations exist: [`ScalarKernel`], one channel at a time, and
//! [`VectorKernel`], one 16-lane register at a time. They produce identical hits (ascending
//! channel, then ascending tick) and identical channel state.
mod lanes;
mod scalar;
mod vector;

pub use scalar::ScalarKernel;
pub use vector::VectorKernel;

use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;

use super::channel_state::ChannelState;
use super::config::{Config, KernelKind};
use super::constants::{LANES_PER_REGISTER, REGISTERS_PER_FRAME};
use super::error::KernelError;
use super::fir::FirFilter;
use super::window::Window;

/// A trigger primitive as found by a kernel, relative to its window.
///
/// Hits are recorded at their end: `end_index` is the first tick back under threshold, so
/// the hit started at `end_index - time_over_threshold` (possibly in a previous window).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hit {
    pub channel: u16,
    pub end_index: u32,
    pub charge: i32,
    pub time_over_threshold: i32,
}

/// Parameters shared by every kernel invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelParams {
    pub fir: FirFilter,
    pub threshold_factor: i32,
    pub frugal_step_limit: i32,
}

impl KernelParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            fir: config.fir_filter(),
            threshold_factor: config.threshold_factor,
            frugal_step_limit: config.frugal_step_limit,
        }
    }

    /// Fresh channel states for a partition of `n_registers` registers
    pub fn new_states(&self, n_registers: usize) -> Vec<ChannelState> {
        vec![ChannelState::new(self.fir.n_taps()); n_registers * LANES_PER_REGISTER]
    }
}

/// The contract shared by the scalar and vectorized hit finders.
pub trait ProcessingKernel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process the registers `registers` of `window`, appending any hits to `hits`.
    ///
    /// `states[i]` belongs to channel `registers.start * 16 + i`.
    fn process_window(
        &self,
        window: &Window,
        registers: Range<usize>,
        states: &mut [ChannelState],
        params: &KernelParams,
        hits: &mut Vec<Hit>,
    ) -> Result<(), KernelError>;
}

impl KernelKind {
    pub fn build(&self) -> Arc<dyn ProcessingKernel> {
        match self {
            KernelKind::Scalar => Arc::new(ScalarKernel),
            KernelKind::Vector => Arc::new(VectorKernel),
        }
    }
}

/// Reject register ranges and state slices which do not line up
pub(crate) fn check_shapes(
    registers: &Range<usize>,
    states: &[ChannelState],
    params: &KernelParams,
) -> Result<(), KernelError> {
    if registers.start > registers.end || registers.end > REGISTERS_PER_FRAME {
        return Err(KernelError::RegisterOutOfRange(registers.start, registers.end));
    }
    if states.len() != registers.len() * LANES_PER_REGISTER {
        return Err(KernelError::StateCountMismatch(states.len(), registers.len()));
    }
    let n_taps = params.fir.n_taps();
    for (idx, state) in states.iter().enumerate() {
        if state.delay_line.len() != n_taps || state.phase >= n_taps {
            return Err(KernelError::DelayLineMismatch(
                registers.start * LANES_PER_REGISTER + idx,
                state.delay_line.len(),
                n_taps,
            ));
        }
    }
    Ok(())
}
