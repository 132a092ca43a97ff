use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::constants::*;
use super::error::{FrameError, GeneratorError};
use super::wib_frame::{LinkId, WibFrame, WibHeader};

/// Encode one superchunk of consecutive frames starting at `timestamp`.
///
/// `sample(channel, tick)` gives the ADC value of each channel at each of the
/// FRAMES_PER_SUPERCHUNK ticks.
pub fn build_superchunk(
    link: LinkId,
    timestamp: u64,
    sample: impl Fn(usize, usize) -> u16,
) -> Result<Vec<u8>, FrameError> {
    let mut buffer = vec![0u8; SUPERCHUNK_SIZE];
    for (tick, frame_bytes) in buffer.chunks_exact_mut(WIB_FRAME_SIZE).enumerate() {
        let mut frame = WibFrame::new(WibHeader::new(
            link,
            timestamp + tick as u64 * TICKS_PER_SAMPLE,
        ));
        for (channel, adc) in frame.adcs.iter_mut().enumerate() {
            *adc = sample(channel, tick);
        }
        frame.encode_into(frame_bytes)?;
    }
    Ok(buffer)
}

/// Shape of the synthetic front-end signal
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub link: LinkId,
    pub start_timestamp: u64,
    pub pedestal_min: u16,
    pub pedestal_max: u16,
    /// Largest noise excursion around the pedestal, in ADC counts
    pub noise_amplitude: u16,
    /// Chance per channel and tick that a pulse starts
    pub pulse_probability: f64,
    pub pulse_amplitude: u16,
    pub pulse_length: usize,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            link: LinkId::default(),
            start_timestamp: 0,
            pedestal_min: 400,
            pedestal_max: 900,
            noise_amplitude: 4,
            pulse_probability: 0.0005,
            pulse_amplitude: 300,
            pulse_length: 8,
        }
    }
}

impl GeneratorSettings {
    pub fn validate(&self) -> Result<(), GeneratorError> {
        if self.pedestal_min > self.pedestal_max {
            return Err(GeneratorError::BadPedestalRange(
                self.pedestal_min,
                self.pedestal_max,
            ));
        }
        if !(0.0..=1.0).contains(&self.pulse_probability) {
            return Err(GeneratorError::BadProbability(self.pulse_probability));
        }
        let peak =
            self.pedestal_max as u32 + self.noise_amplitude as u32 + self.pulse_amplitude as u32;
        if peak > ADC_MASK as u32 {
            return Err(GeneratorError::AdcOverflow(peak));
        }
        Ok(())
    }
}

/// Seeded source of realistic looking superchunks: a fixed pedestal per channel, triangular
/// noise and occasional square pulses. The same seed always yields the same stream.
#[derive(Debug)]
pub struct SuperchunkGenerator {
    settings: GeneratorSettings,
    rng: StdRng,
    pedestals: Vec<u16>,
    pulse_remaining: Vec<usize>,
    next_timestamp: u64,
    pulses_injected: u64,
}

impl SuperchunkGenerator {
    pub fn new(settings: GeneratorSettings, seed: u64) -> Result<Self, GeneratorError> {
        settings.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let pedestals = (0..CHANNELS_PER_FRAME)
            .map(|_| rng.gen_range(settings.pedestal_min..=settings.pedestal_max))
            .collect();
        Ok(Self {
            next_timestamp: settings.start_timestamp,
            settings,
            rng,
            pedestals,
            pulse_remaining: vec![0; CHANNELS_PER_FRAME],
            pulses_injected: 0,
        })
    }

    pub fn pedestals(&self) -> &[u16] {
        &self.pedestals
    }

    /// Number of pulses started so far
    pub fn pulses_injected(&self) -> u64 {
        self.pulses_injected
    }

    pub fn next_timestamp(&self) -> u64 {
        self.next_timestamp
    }

    fn next_sample(&mut self, channel: usize) -> u16 {
        let noise = self.settings.noise_amplitude as i32;
        let mut value = self.pedestals[channel] as i32;
        if noise > 0 {
            value += (self.rng.gen_range(-noise..=noise) + self.rng.gen_range(-noise..=noise)) / 2;
        }

        if self.pulse_remaining[channel] == 0
            && self.settings.pulse_length > 0
            && self.rng.gen_bool(self.settings.pulse_probability)
        {
            self.pulse_remaining[channel] = self.settings.pulse_length;
            self.pulses_injected += 1;
        }
        if self.pulse_remaining[channel] > 0 {
            value += self.settings.pulse_amplitude as i32;
            self.pulse_remaining[channel] -= 1;
        }
        value.clamp(0, ADC_MASK as i32) as u16
    }

    /// Produce the next superchunk of the stream
    pub fn next_superchunk(&mut self) -> Result<Vec<u8>, GeneratorError> {
        let mut samples = vec![[0u16; CHANNELS_PER_FRAME]; FRAMES_PER_SUPERCHUNK];
        for tick_samples in samples.iter_mut() {
            for (channel, sample) in tick_samples.iter_mut().enumerate() {
                *sample = self.next_sample(channel);
            }
        }
        let buffer = build_superchunk(self.settings.link, self.next_timestamp, |channel, tick| {
            samples[tick][channel]
        })?;
        self.next_timestamp += FRAMES_PER_SUPERCHUNK as u64 * TICKS_PER_SAMPLE;
        Ok(buffer)
    }
}

impl Iterator for SuperchunkGenerator {
    type Item = Result<Vec<u8>, GeneratorError>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_superchunk())
    }
}
