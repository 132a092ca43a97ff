use bitvec::prelude::*;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::constants::*;
use super::error::FrameError;

/// Identity of the front-end link which produced a frame
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct LinkId {
    pub crate_no: u8,
    pub slot_no: u8,
    pub fiber_no: u8,
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "crate {} slot {} fiber {}",
            self.crate_no, self.slot_no, self.fiber_no
        )
    }
}

/// The 16 byte header which leads every WIB frame.
///
/// Bit layout (little-endian words):
/// - word 0: bits 0-7 start of frame, 8-12 version, 13-15 fiber, 16-20 crate, 21-23 slot
/// - word 1: bit 0 mm, bit 1 oos, bits 16-31 WIB error flags
/// - words 2-3: 64-bit timestamp
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WibHeader {
    pub start_of_frame: u8,
    pub version: u8,
    pub link: LinkId,
    pub mm: bool,
    pub oos: bool,
    pub wib_errors: u16,
    pub timestamp: u64,
}

impl WibHeader {
    pub fn new(link: LinkId, timestamp: u64) -> Self {
        Self {
            start_of_frame: WIB_START_OF_FRAME,
            version: WIB_VERSION,
            link,
            mm: false,
            oos: false,
            wib_errors: 0,
            timestamp,
        }
    }

    /// Read a header from the front of a buffer
    pub fn read(mut buffer: &[u8]) -> Result<Self, FrameError> {
        let word0 = buffer.read_u32::<LittleEndian>()?;
        let word1 = buffer.read_u32::<LittleEndian>()?;
        let timestamp = buffer.read_u64::<LittleEndian>()?;
        Ok(Self {
            start_of_frame: (word0 & 0xFF) as u8,
            version: ((word0 >> 8) & 0x1F) as u8,
            link: LinkId {
                fiber_no: ((word0 >> 13) & 0x7) as u8,
                crate_no: ((word0 >> 16) & 0x1F) as u8,
                slot_no: ((word0 >> 21) & 0x7) as u8,
            },
            mm: (word1 & 0x1) != 0,
            oos: (word1 & 0x2) != 0,
            wib_errors: (word1 >> 16) as u16,
            timestamp,
        })
    }

    /// Write the header into the front of a buffer
    pub fn write(&self, mut buffer: &mut [u8]) -> Result<(), FrameError> {
        let word0 = (self.start_of_frame as u32)
            | ((self.version as u32 & 0x1F) << 8)
            | ((self.link.fiber_no as u32 & 0x7) << 13)
            | ((self.link.crate_no as u32 & 0x1F) << 16)
            | ((self.link.slot_no as u32 & 0x7) << 21);
        let word1 = (self.mm as u32) | ((self.oos as u32) << 1) | ((self.wib_errors as u32) << 16);
        buffer.write_u32::<LittleEndian>(word0)?;
        buffer.write_u32::<LittleEndian>(word1)?;
        buffer.write_u64::<LittleEndian>(self.timestamp)?;
        Ok(())
    }
}

/// One WIB frame: a single time tick of 12-bit ADC samples for all 256 channels of a link.
///
/// The ADC data of each COLDATA block is an LSB-first bit stream, with channel `c` of the
/// block stored in stream bits `12c..12c+12`. The COLDATA block headers are not
/// interpreted and are written as zeros.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WibFrame {
    pub header: WibHeader,
    pub adcs: [u16; CHANNELS_PER_FRAME],
}

impl WibFrame {
    pub fn new(header: WibHeader) -> Self {
        Self {
            header,
            adcs: [0; CHANNELS_PER_FRAME],
        }
    }

    /// Decode a frame from a buffer of exactly WIB_FRAME_SIZE bytes
    pub fn decode(buffer: &[u8]) -> Result<Self, FrameError> {
        if buffer.len() != WIB_FRAME_SIZE {
            return Err(FrameError::IncorrectFrameSize(buffer.len()));
        }
        let mut frame = Self::new(WibHeader::read(buffer)?);
        unpack_adcs(buffer, &mut frame.adcs);
        Ok(frame)
    }

    /// Encode the frame into a buffer of exactly WIB_FRAME_SIZE bytes
    pub fn encode_into(&self, buffer: &mut [u8]) -> Result<(), FrameError> {
        if buffer.len() != WIB_FRAME_SIZE {
            return Err(FrameError::IncorrectFrameSize(buffer.len()));
        }
        buffer.fill(0);
        self.header.write(buffer)?;
        for block in 0..COLDATA_BLOCKS_PER_FRAME {
            let adc_bytes = &mut buffer[adc_offset(block)..adc_offset(block) + COLDATA_ADC_SIZE];
            let bits = adc_bytes.view_bits_mut::<Lsb0>();
            for channel in 0..CHANNELS_PER_COLDATA_BLOCK {
                let value = self.adcs[block * CHANNELS_PER_COLDATA_BLOCK + channel] & ADC_MASK;
                bits[channel * ADC_BITS..(channel + 1) * ADC_BITS].store_le::<u16>(value);
            }
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut buffer = vec![0u8; WIB_FRAME_SIZE];
        self.encode_into(&mut buffer)?;
        Ok(buffer)
    }
}

/// Byte offset of the ADC data of a COLDATA block within a frame
fn adc_offset(block: usize) -> usize {
    WIB_HEADER_SIZE + block * COLDATA_BLOCK_SIZE + COLDATA_HEADER_SIZE
}

/// Unpack the 12-bit samples of one frame buffer into 16-bit slots, in frame channel order.
///
/// The buffer must already be known to hold a full frame.
pub(crate) fn unpack_adcs(frame: &[u8], adcs: &mut [u16; CHANNELS_PER_FRAME]) {
    for block in 0..COLDATA_BLOCKS_PER_FRAME {
        let adc_bytes = &frame[adc_offset(block)..adc_offset(block) + COLDATA_ADC_SIZE];
        let bits = adc_bytes.view_bits::<Lsb0>();
        for channel in 0..CHANNELS_PER_COLDATA_BLOCK {
            adcs[block * CHANNELS_PER_COLDATA_BLOCK + channel] =
                bits[channel * ADC_BITS..(channel + 1) * ADC_BITS].load_le::<u16>();
        }
    }
}
