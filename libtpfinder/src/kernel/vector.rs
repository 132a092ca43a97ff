use std::ops::Range;

use super::lanes::{I32x16, Mask16};
use super::{check_shapes, Hit, KernelParams, ProcessingKernel};
use crate::channel_state::ChannelState;
use crate::constants::LANES_PER_REGISTER;
use crate::error::KernelError;
use crate::window::Window;

/// Frugal update of 16 estimates at once, applied only where `active` is set
#[inline(always)]
fn frugal_update(
    estimate: &mut I32x16,
    accum: &mut I32x16,
    sample: I32x16,
    limit: I32x16,
    neg_limit: I32x16,
    active: Mask16,
) {
    *accum = accum
        .increment(active & sample.gt(*estimate))
        .decrement(active & sample.lt(*estimate));
    let up = active & accum.ge(limit);
    let down = active & accum.le(neg_limit);
    *estimate = estimate.increment(up).decrement(down);
    *accum = accum.replace(up | down, I32x16::splat(0));
}

/// Lane-parallel kernel: one register (16 channels) moves through the window in lockstep.
///
/// The per-lane state is loaded into vectors once per window and written back at the end.
/// The FIR delay line is kept as a ring of vectors with a single shared phase; each lane's
/// own phase is applied when loading and storing.
#[derive(Debug, Clone, Copy, Default)]
pub struct VectorKernel;

impl VectorKernel {
    fn process_register(
        window: &Window,
        register: usize,
        states: &mut [ChannelState],
        params: &KernelParams,
        lane_hits: &mut [Vec<Hit>; LANES_PER_REGISTER],
    ) {
        let taps = &params.fir.taps;
        let n_taps = taps.len();
        let tap_exponent = params.fir.tap_exponent;
        let adc_max = I32x16::splat(params.fir.adc_max());
        let multiplier = I32x16::splat(params.fir.multiplier());
        let factor = I32x16::splat(params.threshold_factor);
        let limit = I32x16::splat(params.frugal_step_limit);
        let neg_limit = I32x16::splat(-params.frugal_step_limit);
        let tap_vectors: Vec<I32x16> = taps.iter().map(|t| I32x16::splat(*t)).collect();

        let mut pedestal = I32x16::gather(|l| states[l].pedestal);
        let mut quantile25 = I32x16::gather(|l| states[l].quantile25);
        let mut quantile75 = I32x16::gather(|l| states[l].quantile75);
        let mut accum = I32x16::gather(|l| states[l].accum);
        let mut accum25 = I32x16::gather(|l| states[l].accum25);
        let mut accum75 = I32x16::gather(|l| states[l].accum75);
        let mut charge = I32x16::gather(|l| states[l].hit_charge);
        let mut tover = I32x16::gather(|l| states[l].hit_tover);
        let mut prev_over = Mask16::from_bools(|l| states[l].prev_was_over);
        let mut ring: Vec<I32x16> = (0..n_taps)
            .map(|k| I32x16::gather(|l| states[l].delay_line[(k + states[l].phase) % n_taps]))
            .collect();
        let mut phase = 0usize;

        let first_channel = register * LANES_PER_REGISTER;
        for tick in 0..window.n_ticks() {
            let sample = I32x16::from_u16(window.register_tick(register, tick));

            frugal_update(&mut pedestal, &mut accum, sample, limit, neg_limit, Mask16::all());
            let below = sample.lt(pedestal);
            let above = sample.gt(pedestal);
            frugal_update(&mut quantile25, &mut accum25, sample, limit, neg_limit, below);
            frugal_update(&mut quantile75, &mut accum75, sample, limit, neg_limit, above);

            let subtracted = (sample - pedestal).min(adc_max);

            let mut filt = I32x16::splat(0);
            for (i, tap) in tap_vectors.iter().enumerate() {
                filt = filt + *tap * ring[(i + phase) % n_taps];
            }
            ring[phase] = subtracted;
            phase = (phase + 1) % n_taps;

            let threshold = (quantile75 - quantile25)
                .saturating_mul(multiplier)
                .saturating_mul(factor);
            let over = filt.gt(threshold);

            charge = charge.replace(over, charge.saturating_add(filt >> tap_exponent));
            tover = tover.increment(over);

            let falling = prev_over & !over;
            if falling.any() {
                for (lane, hits) in lane_hits.iter_mut().enumerate() {
                    if falling.test(lane) {
                        hits.push(Hit {
                            channel: (first_channel + lane) as u16,
                            end_index: tick as u32,
                            charge: charge.0[lane],
                            time_over_threshold: tover.0[lane],
                        });
                    }
                }
                charge = charge.replace(falling, I32x16::splat(0));
                tover = tover.replace(falling, I32x16::splat(0));
            }
            prev_over = over;
        }

        for (l, state) in states.iter_mut().enumerate() {
            state.pedestal = pedestal.0[l];
            state.quantile25 = quantile25.0[l];
            state.quantile75 = quantile75.0[l];
            state.accum = accum.0[l];
            state.accum25 = accum25.0[l];
            state.accum75 = accum75.0[l];
            state.hit_charge = charge.0[l];
            state.hit_tover = tover.0[l];
            state.prev_was_over = prev_over.test(l);
            let lane_phase = (state.phase + window.n_ticks()) % n_taps;
            for (k, slot) in ring.iter().cycle().skip(phase).take(n_taps).enumerate() {
                state.delay_line[(k + lane_phase) % n_taps] = slot.0[l];
            }
            state.phase = lane_phase;
        }
    }
}

impl ProcessingKernel for VectorKernel {
    fn name(&self) -> &'static str {
        "vector"
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
        let mut lane_hits: [Vec<Hit>; LANES_PER_REGISTER] = std::array::from_fn(|_| Vec::new());
        let per_register = states.chunks_exact_mut(LANES_PER_REGISTER);
        for (register, register_states) in registers.zip(per_register) {
            Self::process_register(window, register, register_states, params, &mut lane_hits);
            // canonical order: channel first, then tick
            for lane in lane_hits.iter_mut() {
                hits.append(lane);
            }
        }
        Ok(())
    }
}
