use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::constants::{
    FRAMES_PER_SUPERCHUNK, MAX_FIR_TAP_COUNT, MAX_WINDOW_SIZE_IN_FRAMES, REGISTERS_PER_FRAME,
};
use super::error::ConfigError;
use super::fir::FirFilter;

/// What `submit_frame` does when the task queue is full
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmitPolicy {
    /// Reject immediately
    #[default]
    FailFast,
    /// Wait up to `timeout_ms` for space, then reject
    Block { timeout_ms: u64 },
}

/// Which processing kernel the workers run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KernelKind {
    Scalar,
    #[default]
    Vector,
}

/// Structure representing the finder configuration.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml. Missing
/// keys take their default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub window_size_in_frames: usize,
    pub n_workers: usize,
    pub queue_capacity: usize,
    pub worker_queue_depth: usize,
    pub fir_tap_count: usize,
    pub tap_exponent: u32,
    pub fir_cutoff: f64,
    pub fir_taps: Option<Vec<i32>>,
    pub threshold_factor: i32,
    pub frugal_step_limit: i32,
    pub hit_store_capacity: usize,
    pub readout_window_radius: u64,
    pub max_queue_latency_ms: u64,
    pub submit_policy: SubmitPolicy,
    pub kernel: KernelKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            window_size_in_frames: 4 * FRAMES_PER_SUPERCHUNK,
            n_workers: 2,
            queue_capacity: 1024,
            worker_queue_depth: 4,
            fir_tap_count: 16,
            tap_exponent: 6,
            fir_cutoff: 0.1,
            fir_taps: None,
            threshold_factor: 5,
            frugal_step_limit: 10,
            hit_store_capacity: 100_000,
            readout_window_radius: 12_500,
            max_queue_latency_ms: 100,
            submit_policy: SubmitPolicy::FailFast,
            kernel: KernelKind::Vector,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a validated Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    /// Check every option against the limits the pipeline relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size_in_frames == 0
            || self.window_size_in_frames > MAX_WINDOW_SIZE_IN_FRAMES
            || self.window_size_in_frames % FRAMES_PER_SUPERCHUNK != 0
        {
            return Err(ConfigError::BadWindowSize(self.window_size_in_frames));
        }
        if !self.is_n_workers_valid() {
            return Err(ConfigError::BadWorkerCount(self.n_workers));
        }
        if !self.fir_tap_count.is_power_of_two() || self.fir_tap_count > MAX_FIR_TAP_COUNT {
            return Err(ConfigError::BadTapCount(self.fir_tap_count));
        }
        if let Some(taps) = &self.fir_taps {
            if taps.len() != self.fir_tap_count {
                return Err(ConfigError::TapListMismatch(taps.len(), self.fir_tap_count));
            }
        }
        // 2^15 would leave no headroom below i16::MAX
        if self.tap_exponent > 14 {
            return Err(ConfigError::BadTapExponent(self.tap_exponent));
        }
        if !(self.fir_cutoff > 0.0 && self.fir_cutoff <= 0.5) {
            return Err(ConfigError::BadCutoff(self.fir_cutoff));
        }
        let fir = self.fir_filter();
        if fir.abs_tap_sum() > fir.max_abs_tap_sum() {
            return Err(ConfigError::TapOverflow(fir.abs_tap_sum(), fir.max_abs_tap_sum()));
        }
        if self.frugal_step_limit < 1 {
            return Err(ConfigError::BadStepLimit(self.frugal_step_limit));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("queue_capacity"));
        }
        if self.worker_queue_depth == 0 {
            return Err(ConfigError::ZeroCapacity("worker_queue_depth"));
        }
        if self.hit_store_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("hit_store_capacity"));
        }
        Ok(())
    }

    pub fn is_n_workers_valid(&self) -> bool {
        self.n_workers >= 1 && self.n_workers <= REGISTERS_PER_FRAME
    }

    /// Number of superchunks which make up one window
    pub fn superchunks_per_window(&self) -> usize {
        self.window_size_in_frames / FRAMES_PER_SUPERCHUNK
    }

    /// The FIR filter described by this configuration
    pub fn fir_filter(&self) -> FirFilter {
        match &self.fir_taps {
            Some(taps) => FirFilter::new(taps.clone(), self.tap_exponent),
            None => FirFilter::lowpass(self.fir_tap_count, self.fir_cutoff, self.tap_exponent),
        }
    }

    pub fn max_queue_latency(&self) -> Duration {
        Duration::from_millis(self.max_queue_latency_ms)
    }
}
