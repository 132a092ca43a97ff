// WIB frame sizes and layout
pub const WIB_FRAME_SIZE: usize = 464;
pub const WIB_HEADER_SIZE: usize = 16;
pub const COLDATA_BLOCKS_PER_FRAME: usize = 4;
pub const COLDATA_HEADER_SIZE: usize = 16;
pub const COLDATA_ADC_SIZE: usize = 96;
pub const COLDATA_BLOCK_SIZE: usize = COLDATA_HEADER_SIZE + COLDATA_ADC_SIZE;
pub const CHANNELS_PER_COLDATA_BLOCK: usize = 64;
pub const ADC_BITS: usize = 12;
pub const ADC_MASK: u16 = 0x0FFF;
pub const WIB_START_OF_FRAME: u8 = 0x3C;
pub const WIB_VERSION: u8 = 1;

// Electronics constants
pub const CHANNELS_PER_FRAME: usize = COLDATA_BLOCKS_PER_FRAME * CHANNELS_PER_COLDATA_BLOCK; // 256
pub const TICKS_PER_SAMPLE: u64 = 25; // 50 MHz clock, 2 MHz sampling

// Superchunk (the unit handed to the finder)
pub const FRAMES_PER_SUPERCHUNK: usize = 12;
pub const SUPERCHUNK_SIZE: usize = WIB_FRAME_SIZE * FRAMES_PER_SUPERCHUNK; // 5568

// Register layout of the decoded data
pub const LANES_PER_REGISTER: usize = 16;
pub const REGISTERS_PER_FRAME: usize = CHANNELS_PER_FRAME / LANES_PER_REGISTER; // 16
pub const SAMPLES_PER_SUPERCHUNK: usize = CHANNELS_PER_FRAME * FRAMES_PER_SUPERCHUNK;

// Configuration limits
pub const MAX_WINDOW_SIZE_IN_FRAMES: usize = 1024 * FRAMES_PER_SUPERCHUNK;
pub const MAX_FIR_TAP_COUNT: usize = 1024;
