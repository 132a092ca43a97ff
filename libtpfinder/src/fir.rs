use std::f64::consts::PI;

use super::constants::ADC_MASK;

/// Hamming window coefficients of length `n`
pub fn hamming(n: usize) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f64 / (n as f64 - 1.0)).cos())
        .collect()
}

/// Windowed-sinc low-pass prototype, normalized to unit DC gain.
///
/// - `n_taps`: filter length
/// - `cutoff`: cutoff frequency as a fraction of the sampling rate (0, 0.5]
pub fn lowpass_float(n_taps: usize, cutoff: f64) -> Vec<f64> {
    let window = hamming(n_taps);
    let half = (n_taps as f64 - 1.0) / 2.0;
    let mut taps: Vec<f64> = window
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let t = i as f64 - half;
            let sinc = if t.abs() < 1e-12 {
                2.0 * cutoff
            } else {
                (2.0 * PI * cutoff * t).sin() / (PI * t)
            };
            sinc * w
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    if sum.abs() > 1e-12 {
        taps.iter_mut().for_each(|t| *t /= sum);
    }
    taps
}

/// Fixed-point low-pass taps scaled by `2^tap_exponent`
pub fn lowpass_taps(n_taps: usize, cutoff: f64, tap_exponent: u32) -> Vec<i32> {
    let multiplier = (1i32 << tap_exponent) as f64;
    lowpass_float(n_taps, cutoff)
        .iter()
        .map(|t| (t * multiplier).round() as i32)
        .collect()
}

/// The integer FIR filter shared by every kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirFilter {
    pub taps: Vec<i32>,
    pub tap_exponent: u32,
}

impl FirFilter {
    pub fn new(taps: Vec<i32>, tap_exponent: u32) -> Self {
        Self { taps, tap_exponent }
    }

    pub fn lowpass(n_taps: usize, cutoff: f64, tap_exponent: u32) -> Self {
        Self::new(lowpass_taps(n_taps, cutoff, tap_exponent), tap_exponent)
    }

    pub fn n_taps(&self) -> usize {
        self.taps.len()
    }

    /// Fixed-point scale of the taps
    pub fn multiplier(&self) -> i32 {
        1 << self.tap_exponent
    }

    /// Largest pedestal subtracted sample fed into the delay line
    pub fn adc_max(&self) -> i32 {
        i16::MAX as i32 / self.multiplier()
    }

    /// Sum of the absolute tap values
    pub fn abs_tap_sum(&self) -> i64 {
        self.taps.iter().map(|t| (*t as i64).abs()).sum()
    }

    /// Largest absolute sum of taps for which no filter output can leave the `i32` range.
    ///
    /// Delay line entries lie in `-ADC_MASK..=adc_max` since the pedestal never leaves the
    /// ADC range.
    pub fn max_abs_tap_sum(&self) -> i64 {
        let peak_sample = (self.adc_max() as i64).max(ADC_MASK as i64);
        i32::MAX as i64 / peak_sample
    }
}
