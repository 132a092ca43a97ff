use super::constants::*;
use super::superchunk::DecodedSuperchunk;
use super::wib_frame::LinkId;

/// A contiguous run of ticks for every channel of a link, in register-major layout.
///
/// The sample for register `r`, tick `t` and lane `l` is stored at
/// `(r * n_ticks + t) * LANES_PER_REGISTER + l`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Window {
    /// Position of the window in arrival order, starting at 0
    pub sequence: u64,
    /// Timestamp of the first tick
    pub timestamp: u64,
    pub link: LinkId,
    n_ticks: usize,
    samples: Vec<u16>,
}

impl Window {
    /// Build a window directly from per-channel sample sequences.
    ///
    /// `channels[ch][t]` is the sample of channel `ch` at tick `t`; every channel must have
    /// the same length. Missing channels (up to CHANNELS_PER_FRAME) are filled with zeros.
    pub fn from_channels(sequence: u64, timestamp: u64, channels: &[Vec<u16>]) -> Self {
        let n_ticks = channels.first().map(|c| c.len()).unwrap_or(0);
        let mut samples = vec![0u16; CHANNELS_PER_FRAME * n_ticks];
        for (channel, values) in channels.iter().enumerate().take(CHANNELS_PER_FRAME) {
            let register = channel / LANES_PER_REGISTER;
            let lane = channel % LANES_PER_REGISTER;
            for (tick, value) in values.iter().enumerate().take(n_ticks) {
                samples[(register * n_ticks + tick) * LANES_PER_REGISTER + lane] = *value;
            }
        }
        Self {
            sequence,
            timestamp,
            link: LinkId::default(),
            n_ticks,
            samples,
        }
    }

    pub fn n_ticks(&self) -> usize {
        self.n_ticks
    }

    /// The 16 lanes of a register at one tick
    #[inline]
    pub fn register_tick(&self, register: usize, tick: usize) -> &[u16] {
        let start = (register * self.n_ticks + tick) * LANES_PER_REGISTER;
        &self.samples[start..start + LANES_PER_REGISTER]
    }

    #[inline]
    pub fn sample(&self, channel: usize, tick: usize) -> u16 {
        self.register_tick(channel / LANES_PER_REGISTER, tick)[channel % LANES_PER_REGISTER]
    }
}

/// Collects decoded superchunks until a full window is available.
///
/// Owns its assembly buffer; a finished window is handed out by value and the buffer is
/// started again from scratch.
#[derive(Debug)]
pub struct WindowAssembler {
    superchunks_per_window: usize,
    n_ticks: usize,
    next_sequence: u64,
    filled: usize,
    timestamp: u64,
    link: LinkId,
    samples: Vec<u16>,
}

impl WindowAssembler {
    pub fn new(superchunks_per_window: usize) -> Self {
        let n_ticks = superchunks_per_window * FRAMES_PER_SUPERCHUNK;
        Self {
            superchunks_per_window,
            n_ticks,
            next_sequence: 0,
            filled: 0,
            timestamp: 0,
            link: LinkId::default(),
            samples: vec![0; CHANNELS_PER_FRAME * n_ticks],
        }
    }

    /// Number of superchunks sitting in the partially assembled window
    pub fn pending(&self) -> usize {
        self.filled
    }

    /// Append a superchunk. Returns the window once it is full.
    pub fn push(&mut self, chunk: &DecodedSuperchunk) -> Option<Window> {
        if self.filled == 0 {
            self.timestamp = chunk.timestamp();
            self.link = chunk.header.link;
        }
        let tick_offset = self.filled * FRAMES_PER_SUPERCHUNK;
        for register in 0..REGISTERS_PER_FRAME {
            let src_start = register * FRAMES_PER_SUPERCHUNK * LANES_PER_REGISTER;
            let src_end = src_start + FRAMES_PER_SUPERCHUNK * LANES_PER_REGISTER;
            let src = &chunk.samples[src_start..src_end];
            let dst_start = (register * self.n_ticks + tick_offset) * LANES_PER_REGISTER;
            self.samples[dst_start..dst_start + src.len()].copy_from_slice(src);
        }
        self.filled += 1;

        if self.filled < self.superchunks_per_window {
            return None;
        }

        let fresh = vec![0; CHANNELS_PER_FRAME * self.n_ticks];
        let samples = std::mem::replace(&mut self.samples, fresh);
        let window = Window {
            sequence: self.next_sequence,
            timestamp: self.timestamp,
            link: self.link,
            n_ticks: self.n_ticks,
            samples,
        };
        self.next_sequence += 1;
        self.filled = 0;
        Some(window)
    }
}
