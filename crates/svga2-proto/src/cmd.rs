//! Command opcodes for the FIFO stream and the guest-backed-object
//! command set.
//!
//! FIFO commands are a 32-bit opcode word followed by a fixed payload.
//! 3D/guest-backed commands carry an explicit `{id, size_bytes}` header
//! so unknown commands can be skipped.

/// Legacy 2D / memory-management FIFO commands.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SvgaCmd {
    Invalid = 0,
    Update = 1,
    Fence = 30,
    DefineGmr2 = 41,
    RemapGmr2 = 42,
}

impl SvgaCmd {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::Invalid),
            1 => Some(Self::Update),
            30 => Some(Self::Fence),
            41 => Some(Self::DefineGmr2),
            42 => Some(Self::RemapGmr2),
            _ => None,
        }
    }
}

/// First id of the 3D command range; everything at or above this value
/// carries the `{id, size_bytes}` header.
pub const SVGA_3D_CMD_BASE: u32 = 1000;

/// Guest-backed-object command subset used by this engine.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Svga3dCmd {
    ReadbackOtable = 1092,
    DestroyGbMob = 1094,
    SetOtableBase64 = 1130,
    DefineGbMob64 = 1135,
}

impl Svga3dCmd {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            1092 => Some(Self::ReadbackOtable),
            1094 => Some(Self::DestroyGbMob),
            1130 => Some(Self::SetOtableBase64),
            1135 => Some(Self::DefineGbMob64),
            _ => None,
        }
    }
}

/// `RemapGmr2` flag: page numbers in the payload are 64-bit.
pub const SVGA_REMAP_GMR2_PPN64: u32 = 1 << 1;

/// Device-context commands, valid only in command buffers posted to
/// `SVGA_CB_CONTEXT_DEVICE`.
pub const SVGA_DC_CMD_NOP: u32 = 0;
pub const SVGA_DC_CMD_START_STOP_CONTEXT: u32 = 1;

/// Page-table depth encoding carried by MOB definitions and object table
/// bindings. Only the 64-bit entry formats are emitted by this engine.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MobFormat {
    Invalid = 0,
    Range = 3,
    PtDepth64_0 = 4,
    PtDepth64_1 = 5,
    PtDepth64_2 = 6,
}

impl MobFormat {
    /// Maps a 0/1/2 page-table depth to its 64-bit entry format.
    pub const fn from_depth(depth: u32) -> Option<Self> {
        match depth {
            0 => Some(Self::PtDepth64_0),
            1 => Some(Self::PtDepth64_1),
            2 => Some(Self::PtDepth64_2),
            _ => None,
        }
    }
}

/// Object table classes, one fixed-capacity table per guest-backed
/// resource class.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OtableType {
    Mob = 0,
    Surface = 1,
    Context = 2,
    Shader = 3,
    ScreenTarget = 4,
    DxContext = 5,
}

pub const OTABLE_COUNT: usize = 6;

impl OtableType {
    pub const ALL: [OtableType; OTABLE_COUNT] = [
        OtableType::Mob,
        OtableType::Surface,
        OtableType::Context,
        OtableType::Shader,
        OtableType::ScreenTarget,
        OtableType::DxContext,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }
}

/// One legacy guest memory descriptor: a physical run of pages. A
/// descriptor with `num_pages == 0` and a nonzero `ppn` links to the next
/// descriptor page; `{0, 0}` terminates the list.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GuestMemDescriptor {
    pub ppn: u32,
    pub num_pages: u32,
}

impl GuestMemDescriptor {
    pub const SIZE_BYTES: usize = 8;
}

const _: () = assert!(core::mem::size_of::<GuestMemDescriptor>() == GuestMemDescriptor::SIZE_BYTES);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips() {
        for cmd in [SvgaCmd::Update, SvgaCmd::Fence, SvgaCmd::DefineGmr2, SvgaCmd::RemapGmr2] {
            assert_eq!(SvgaCmd::from_u32(cmd as u32), Some(cmd));
        }
        for cmd in [
            Svga3dCmd::ReadbackOtable,
            Svga3dCmd::DestroyGbMob,
            Svga3dCmd::SetOtableBase64,
            Svga3dCmd::DefineGbMob64,
        ] {
            assert_eq!(Svga3dCmd::from_u32(cmd as u32), Some(cmd));
            assert!((cmd as u32) >= SVGA_3D_CMD_BASE);
        }
        assert_eq!(SvgaCmd::from_u32(999), None);
        assert_eq!(Svga3dCmd::from_u32(SVGA_3D_CMD_BASE), None);
    }

    #[test]
    fn mob_format_covers_every_depth() {
        assert_eq!(MobFormat::from_depth(0), Some(MobFormat::PtDepth64_0));
        assert_eq!(MobFormat::from_depth(1), Some(MobFormat::PtDepth64_1));
        assert_eq!(MobFormat::from_depth(2), Some(MobFormat::PtDepth64_2));
        assert_eq!(MobFormat::from_depth(3), None);
    }

    #[test]
    fn otable_indices_are_dense() {
        for (i, ty) in OtableType::ALL.iter().enumerate() {
            assert_eq!(ty.index(), i);
        }
    }
}
