use super::constants::*;
use super::error::FrameError;
use super::wib_frame::{unpack_adcs, WibHeader};

/// A superchunk decoded into the register-major layout used by the kernels.
///
/// The sample for register `r`, tick `t` (frame within the superchunk) and lane `l` is
/// stored at `(r * FRAMES_PER_SUPERCHUNK + t) * LANES_PER_REGISTER + l`. The 16 lanes of a
/// register at a fixed tick are contiguous, and the ticks of a register follow each other,
/// so a kernel can load a full register per tick with a single slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedSuperchunk {
    /// Header of the first frame
    pub header: WibHeader,
    pub samples: Vec<u16>,
}

impl DecodedSuperchunk {
    pub fn timestamp(&self) -> u64 {
        self.header.timestamp
    }

    /// The 16 lanes of a register at one tick
    pub fn register_tick(&self, register: usize, tick: usize) -> &[u16] {
        let start = (register * FRAMES_PER_SUPERCHUNK + tick) * LANES_PER_REGISTER;
        &self.samples[start..start + LANES_PER_REGISTER]
    }

    /// The sample of one channel at one tick
    pub fn sample(&self, channel: usize, tick: usize) -> u16 {
        self.register_tick(channel / LANES_PER_REGISTER, tick)[channel % LANES_PER_REGISTER]
    }
}

/// Decode a raw superchunk.
///
/// Pure function of the input bytes. The only failure is a buffer which is not exactly
/// SUPERCHUNK_SIZE bytes long.
pub fn decode_superchunk(buffer: &[u8]) -> Result<DecodedSuperchunk, FrameError> {
    if buffer.len() != SUPERCHUNK_SIZE {
        return Err(FrameError::IncorrectSize(buffer.len()));
    }

    let header = WibHeader::read(buffer)?;
    let mut samples = vec![0u16; SAMPLES_PER_SUPERCHUNK];
    let mut adcs = [0u16; CHANNELS_PER_FRAME];
    for (tick, frame) in buffer.chunks_exact(WIB_FRAME_SIZE).enumerate() {
        unpack_adcs(frame, &mut adcs);
        for (channel, adc) in adcs.iter().enumerate() {
            let register = channel / LANES_PER_REGISTER;
            let lane = channel % LANES_PER_REGISTER;
            samples[(register * FRAMES_PER_SUPERCHUNK + tick) * LANES_PER_REGISTER + lane] = *adc;
        }
    }

    Ok(DecodedSuperchunk { header, samples })
}

/// Quick check used at the submit boundary, before a buffer is queued
pub fn validate_superchunk_size(buffer: &[u8]) -> Result<(), FrameError> {
    if buffer.len() != SUPERCHUNK_SIZE {
        return Err(FrameError::IncorrectSize(buffer.len()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wib_frame::{LinkId, WibFrame};

    fn make_superchunk(start: u64) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(SUPERCHUNK_SIZE);
        for tick in 0..FRAMES_PER_SUPERCHUNK {
            let mut frame = WibFrame::new(WibHeader::new(
                LinkId {
                    crate_no: 1,
                    slot_no: 2,
                    fiber_no: 1,
                },
                start + tick as u64 * TICKS_PER_SAMPLE,
            ));
            for (channel, adc) in frame.adcs.iter_mut().enumerate() {
                *adc = ((channel * 13 + tick * 7) % 4096) as u16;
            }
            buffer.extend(frame.encode().unwrap());
        }
        buffer
    }

    #[test]
    fn test_column_major_layout() {
        let decoded = decode_superchunk(&make_superchunk(500)).unwrap();
        assert_eq!(decoded.timestamp(), 500);
        assert_eq!(decoded.header.link.slot_no, 2);
        for tick in 0..FRAMES_PER_SUPERCHUNK {
            for channel in 0..CHANNELS_PER_FRAME {
                assert_eq!(
                    decoded.sample(channel, tick),
                    ((channel * 13 + tick * 7) % 4096) as u16
                );
            }
        }
        // register 3 at tick 2 holds channels 48..64 contiguously
        let lanes = decoded.register_tick(3, 2);
        assert_eq!(lanes[0], ((48 * 13 + 2 * 7) % 4096) as u16);
        assert_eq!(lanes[15], ((63 * 13 + 2 * 7) % 4096) as u16);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let raw = make_superchunk(12345);
        let first = decode_superchunk(&raw).unwrap();
        let second = decode_superchunk(&raw).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_wrong_size_is_rejected() {
        let mut raw = make_superchunk(0);
        raw.push(0);
        assert!(matches!(
            decode_superchunk(&raw),
            Err(FrameError::IncorrectSize(n)) if n == SUPERCHUNK_SIZE + 1
        ));
        assert!(validate_superchunk_size(&raw[..WIB_FRAME_SIZE]).is_err());
    }
}
