//! SVGA-II register file.
//!
//! Registers are accessed through an index/value port pair; the indices
//! below are the stable protocol values negotiated via `SvgaReg::Id`.

use bitflags::bitflags;

/// Version negotiation magic. The guest writes one of the `SVGA_ID_*`
/// values to `SvgaReg::Id` and reads it back; the device answers with the
/// highest version it supports.
pub const SVGA_ID_BASE: u32 = 0x9000_0000;
pub const SVGA_ID_0: u32 = SVGA_ID_BASE;
pub const SVGA_ID_1: u32 = SVGA_ID_BASE | 1;
pub const SVGA_ID_2: u32 = SVGA_ID_BASE | 2;
pub const SVGA_ID_INVALID: u32 = 0xFFFF_FFFF;

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SvgaReg {
    Id = 0,
    Enable = 1,
    Width = 2,
    Height = 3,
    MaxWidth = 4,
    MaxHeight = 5,
    Depth = 6,
    BitsPerPixel = 7,
    FbStart = 13,
    FbOffset = 14,
    VramSize = 15,
    FbSize = 16,
    Capabilities = 17,
    MemStart = 18,
    MemSize = 19,
    ConfigDone = 20,
    Sync = 21,
    Busy = 22,
    GuestId = 23,
    IrqMask = 33,
    GmrId = 41,
    GmrDescriptor = 42,
    GmrMaxIds = 43,
    GmrMaxDescriptorLength = 44,
    Traces = 45,
    GmrsMaxPages = 46,
    MemorySize = 47,
    CommandLow = 48,
    CommandHigh = 49,
    MaxPrimaryMem = 50,
    /// Register-file fence readback on devices that expose completion
    /// progress outside FIFO memory.
    Fence = 80,
}

bitflags! {
    /// Device capability bits reported by `SvgaReg::Capabilities`.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SvgaCaps: u32 {
        const RECT_COPY       = 1 << 1;
        const CURSOR          = 1 << 5;
        const CURSOR_BYPASS_2 = 1 << 7;
        const ALPHA_CURSOR    = 1 << 9;
        const ACCEL_3D        = 1 << 14;
        const EXTENDED_FIFO   = 1 << 15;
        const PITCHLOCK       = 1 << 17;
        const IRQMASK         = 1 << 18;
        const GMR             = 1 << 20;
        const TRACES          = 1 << 21;
        const GMR2            = 1 << 22;
        const SCREEN_OBJECT_2 = 1 << 23;
        const COMMAND_BUFFERS = 1 << 24;
        const CMD_BUFFERS_2   = 1 << 26;
        const GBOBJECTS       = 1 << 27;
        const DX              = 1 << 28;
    }
}
