use std::ops::Range;

use super::{check_shapes, Hit, KernelParams, ProcessingKernel};
use crate::channel_state::ChannelState;
use crate::constants::LANES_PER_REGISTER;
use crate::error::KernelError;
use crate::window::Window;

/// Reference kernel: walks one channel at a time through the whole window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScalarKernel;

impl ScalarKernel {
    /// Run one channel through every tick of the window
    fn process_channel(
        window: &Window,
        channel: usize,
        state: &mut ChannelState,
        params: &KernelParams,
        hits: &mut Vec<Hit>,
    ) {
        let taps = &params.fir.taps;
        let n_taps = taps.len();
        let tap_exponent = params.fir.tap_exponent;
        let multiplier = params.fir.multiplier();
        let adc_max = params.fir.adc_max();

        for tick in 0..window.n_ticks() {
            let sample = window.sample(channel, tick) as i32;
            state.update_baseline(sample, params.frugal_step_limit);

            let subtracted = (sample - state.pedestal).min(adc_max);

            let mut filt = 0;
            for (i, tap) in taps.iter().enumerate() {
                filt += tap * state.delay_line[(i + state.phase) % n_taps];
            }
            state.delay_line[state.phase] = subtracted;
            state.phase = (state.phase + 1) % n_taps;

            let threshold = state
                .sigma()
                .saturating_mul(multiplier)
                .saturating_mul(params.threshold_factor);
            let is_over = filt > threshold;

            if is_over {
                state.hit_charge = state.hit_charge.saturating_add(filt >> tap_exponent);
                state.hit_tover += 1;
            } else if state.prev_was_over {
                hits.push(Hit {
                    channel: channel as u16,
                    end_index: tick as u32,
                    charge: state.hit_charge,
                    time_over_threshold: state.hit_tover,
                });
                state.hit_charge = 0;
                state.hit_tover = 0;
            }
            state.prev_was_over = is_over;
        }
    }
}

impl ProcessingKernel for ScalarKernel {
    fn name(&self) -> &'static str {
        "scalar"
    }

    fn process_window(
        &self,
        window: &Window,
        registers: Range<usize>,
        states: &mut [ChannelState],
        params: &KernelParams,
        hits: &mut Vec<Hit>,
    ) -> Result<(), KernelError> {
        check_shapes(&registers, states, params)?;
        let first_channel = registers.start * LANES_PER_REGISTER;
        for (idx, state) in states.iter_mut().enumerate() {
            Self::process_channel(window, first_channel + idx, state, params, hits);
        }
        Ok(())
    }
}
