/// Nudge a streaming estimate towards a sample ("frugal" quantile estimation).
///
/// The accumulator counts how often the sample lands above or below the estimate; once it
/// reaches `limit` in either direction the estimate moves by one ADC count.
#[inline]
pub fn frugal_update(estimate: &mut i32, accum: &mut i32, sample: i32, limit: i32) {
    if sample > *estimate {
        *accum += 1;
    }
    if sample < *estimate {
        *accum -= 1;
    }
    if *accum >= limit {
        *estimate += 1;
        *accum = 0;
    }
    if *accum <= -limit {
        *estimate -= 1;
        *accum = 0;
    }
}

/// The rolling state of one channel lane, carried from window to window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub pedestal: i32,
    pub quantile25: i32,
    pub quantile75: i32,
    pub accum: i32,
    pub accum25: i32,
    pub accum75: i32,
    /// Circular FIR delay line of pedestal subtracted samples
    pub delay_line: Vec<i32>,
    /// Slot of the delay line written next
    pub phase: usize,
    pub prev_was_over: bool,
    pub hit_charge: i32,
    pub hit_tover: i32,
}

impl ChannelState {
    pub fn new(n_taps: usize) -> Self {
        Self {
            delay_line: vec![0; n_taps],
            ..Default::default()
        }
    }

    /// Seed the baseline estimates from a first observed sample
    pub fn seed(&mut self, sample: u16) {
        self.pedestal = sample as i32;
        self.quantile25 = sample as i32;
        self.quantile75 = sample as i32;
        self.accum = 0;
        self.accum25 = 0;
        self.accum75 = 0;
    }

    /// Feed one raw sample through the median and quartile estimators
    #[inline]
    pub fn update_baseline(&mut self, sample: i32, limit: i32) {
        frugal_update(&mut self.pedestal, &mut self.accum, sample, limit);
        if sample < self.pedestal {
            frugal_update(&mut self.quantile25, &mut self.accum25, sample, limit);
        }
        if sample > self.pedestal {
            frugal_update(&mut self.quantile75, &mut self.accum75, sample, limit);
        }
    }

    /// Noise estimate from the interquartile spread
    pub fn sigma(&self) -> i32 {
        self.quantile75 - self.quantile25
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frugal_steps_after_limit() {
        let mut estimate = 100;
        let mut accum = 0;
        for _ in 0..9 {
            frugal_update(&mut estimate, &mut accum, 200, 10);
        }
        assert_eq!(estimate, 100);
        assert_eq!(accum, 9);
        frugal_update(&mut estimate, &mut accum, 200, 10);
        assert_eq!(estimate, 101);
        assert_eq!(accum, 0);
        for _ in 0..10 {
            frugal_update(&mut estimate, &mut accum, 0, 10);
        }
        assert_eq!(estimate, 100);
    }

    #[test]
    fn test_equal_sample_leaves_accumulator() {
        let mut estimate = 42;
        let mut accum = 3;
        frugal_update(&mut estimate, &mut accum, 42, 10);
        assert_eq!((estimate, accum), (42, 3));
    }

    #[test]
    fn test_median_tracks_a_shifted_baseline() {
        let mut state = ChannelState::new(16);
        state.seed(500);
        for i in 0..20_000 {
            // alternate around 520 so the median has to climb
            let sample = if i % 2 == 0 { 518 } else { 522 };
            state.update_baseline(sample, 10);
        }
        assert!((state.pedestal - 520).abs() <= 2, "pedestal {}", state.pedestal);
        assert!(state.quantile25 <= state.pedestal);
        assert!(state.quantile75 >= state.pedestal);
    }
}
