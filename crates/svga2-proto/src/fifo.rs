//! Legacy FIFO memory layout.
//!
//! The first words of device FIFO memory are registers; the rest is the
//! command ring. `MIN`/`MAX`/`NEXT_CMD`/`STOP` hold *byte* offsets into
//! FIFO memory, while callers address FIFO memory in 32-bit words.

use bitflags::bitflags;

/// FIFO register cells (word indices into FIFO memory).
pub const SVGA_FIFO_MIN: u32 = 0;
pub const SVGA_FIFO_MAX: u32 = 1;
pub const SVGA_FIFO_NEXT_CMD: u32 = 2;
pub const SVGA_FIFO_STOP: u32 = 3;
pub const SVGA_FIFO_CAPABILITIES: u32 = 4;
pub const SVGA_FIFO_FLAGS: u32 = 5;
/// Most recently completed fence id, written back by the device.
pub const SVGA_FIFO_FENCE: u32 = 6;

/// Number of reserved register cells before the command ring may start.
pub const SVGA_FIFO_NUM_REGS: u32 = 7;

bitflags! {
    /// Capability bits in `SVGA_FIFO_CAPABILITIES`, present when the
    /// device reports `SvgaCaps::EXTENDED_FIFO`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct FifoCaps: u32 {
        const FENCE           = 1 << 0;
        const PITCHLOCK       = 1 << 2;
        const RESERVE         = 1 << 6;
        const SCREEN_OBJECT   = 1 << 7;
        const GMR2            = 1 << 8;
        const SCREEN_OBJECT_2 = 1 << 9;
    }
}
