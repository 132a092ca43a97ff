use std::path::PathBuf;
use thiserror::Error;

use super::constants::*;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Incorrect buffer size {0} found for superchunk; expected {exp}", exp=SUPERCHUNK_SIZE)]
    IncorrectSize(usize),
    #[error("Incorrect buffer size {0} found for WibFrame; expected {exp}", exp=WIB_FRAME_SIZE)]
    IncorrectFrameSize(usize),
    #[error("Failed to parse buffer into WibFrame: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Window size {0} is invalid; must be a non-zero multiple of {exp} no larger than {max}", exp=FRAMES_PER_SUPERCHUNK, max=MAX_WINDOW_SIZE_IN_FRAMES)]
    BadWindowSize(usize),
    #[error("Number of workers {0} is invalid; must be between 1 and {exp}", exp=REGISTERS_PER_FRAME)]
    BadWorkerCount(usize),
    #[error("FIR tap count {0} is invalid; must be a power of two no larger than {max}", max=MAX_FIR_TAP_COUNT)]
    BadTapCount(usize),
    #[error("Explicit FIR taps have length {0}; expected fir_tap_count = {1}")]
    TapListMismatch(usize, usize),
    #[error("FIR taps with absolute sum {0} can overflow the filter output; the limit is {1}")]
    TapOverflow(i64, i64),
    #[error("Tap exponent {0} is invalid; must be between 0 and 14")]
    BadTapExponent(u32),
    #[error("FIR cutoff {0} is invalid; must be in (0, 0.5]")]
    BadCutoff(f64),
    #[error("Frugal step limit {0} is invalid; must be at least 1")]
    BadStepLimit(i32),
    #[error("Capacity option {0} must be at least 1")]
    ZeroCapacity(&'static str),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KernelError {
    #[error("Kernel was given {0} channel states for {1} registers; expected {exp}", exp=.1 * LANES_PER_REGISTER)]
    StateCountMismatch(usize, usize),
    #[error("Kernel was given registers {0}..{1} outside of the window")]
    RegisterOutOfRange(usize, usize),
    #[error("Channel {0} has a delay line of length {1}; expected {2}")]
    DelayLineMismatch(usize, usize, usize),
}

#[derive(Debug, Error)]
pub enum FrameFileError {
    #[error("Could not open frame file because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Frame file ended with a partial superchunk of {0} bytes")]
    TruncatedSuperchunk(usize),
    #[error("Frame file was given a bad superchunk: {0}")]
    Frame(#[from] FrameError),
    #[error("Frame file failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Generator pedestal range {0}..={1} is empty")]
    BadPedestalRange(u16, u16),
    #[error("Generator pulse probability {0} is invalid; must be in [0, 1]")]
    BadProbability(f64),
    #[error("Generator settings can reach ADC value {0}, above {max}", max=ADC_MASK)]
    AdcOverflow(u32),
    #[error("Generator failed to encode a frame: {0}")]
    Frame(#[from] FrameError),
}

#[derive(Debug, Error)]
pub enum FinderError {
    #[error("Finder is shut down")]
    ShutDown,
    #[error("Finder rejected frame: {0}")]
    Frame(#[from] FrameError),
    #[error("Finder failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Finder could not spawn a pipeline thread: {0}")]
    Spawn(std::io::Error),
    #[error("Finder pipeline thread {0} panicked")]
    ThreadPanic(String),
    #[error("Finder hit store lock was poisoned")]
    PoisonedStore,
}
