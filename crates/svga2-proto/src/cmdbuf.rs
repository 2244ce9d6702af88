//! Command buffer header layout.
//!
//! A command buffer is a 64-byte header in guest memory describing a
//! physically addressed payload. The guest posts the header's physical
//! address through the `CommandHigh`/`CommandLow` register pair; the
//! device writes completion status back into the header asynchronously.

use bitflags::bitflags;

/// Headers are 64-byte aligned, so the low bits of `CommandLow` carry the
/// target queue context.
pub const SVGA_CB_CONTEXT_0: u32 = 0;
pub const SVGA_CB_CONTEXT_DEVICE: u32 = 0x3F;
pub const SVGA_CB_CONTEXT_MASK: u32 = 0x3F;

/// Asynchronously updated status word at the start of the header.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CbStatus {
    /// Not yet processed by the device.
    None = 0,
    Completed = 1,
    QueueFull = 2,
    CommandError = 3,
    HeaderError = 4,
    Preempted = 5,
}

impl CbStatus {
    pub const fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(Self::None),
            1 => Some(Self::Completed),
            2 => Some(Self::QueueFull),
            3 => Some(Self::CommandError),
            4 => Some(Self::HeaderError),
            5 => Some(Self::Preempted),
            _ => None,
        }
    }

    /// True once the device will no longer touch the buffer.
    pub const fn is_retired(self) -> bool {
        !matches!(self, Self::None)
    }

    pub const fn is_error(self) -> bool {
        matches!(self, Self::QueueFull | Self::CommandError | Self::HeaderError)
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct CbFlags: u32 {
        const NO_IRQ     = 1 << 0;
        const DX_CONTEXT = 1 << 1;
        const MOB        = 1 << 2;
    }
}

/// Command buffer header. All fields little-endian in guest memory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CbHeader {
    pub status: u32,
    /// Byte offset of the failing command when `status` is an error.
    pub error_offset: u32,
    /// Monotonic submission id assigned by the guest.
    pub id: u64,
    pub flags: u32,
    /// Payload length in bytes.
    pub length: u32,
    /// Physical base address of the payload.
    pub pa: u64,
    /// Bound device context for `CbFlags::DX_CONTEXT` submissions.
    pub dx_context: u32,
}

pub const CB_STATUS_OFFSET: u64 = 0;
pub const CB_ERROR_OFFSET_OFFSET: u64 = 4;
pub const CB_ID_OFFSET: u64 = 8;
pub const CB_FLAGS_OFFSET: u64 = 16;
pub const CB_LENGTH_OFFSET: u64 = 20;
pub const CB_PA_OFFSET: u64 = 24;
pub const CB_DX_CONTEXT_OFFSET: u64 = 32;

impl CbHeader {
    pub const SIZE_BYTES: usize = 64;

    pub fn encode(&self) -> [u8; Self::SIZE_BYTES] {
        let mut buf = [0u8; Self::SIZE_BYTES];
        buf[0..4].copy_from_slice(&self.status.to_le_bytes());
        buf[4..8].copy_from_slice(&self.error_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.id.to_le_bytes());
        buf[16..20].copy_from_slice(&self.flags.to_le_bytes());
        buf[20..24].copy_from_slice(&self.length.to_le_bytes());
        buf[24..32].copy_from_slice(&self.pa.to_le_bytes());
        buf[32..36].copy_from_slice(&self.dx_context.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; Self::SIZE_BYTES]) -> Self {
        let u32_at = |o: usize| u32::from_le_bytes(buf[o..o + 4].try_into().expect("4 bytes"));
        let u64_at = |o: usize| u64::from_le_bytes(buf[o..o + 8].try_into().expect("8 bytes"));
        Self {
            status: u32_at(0),
            error_offset: u32_at(4),
            id: u64_at(8),
            flags: u32_at(16),
            length: u32_at(20),
            pa: u64_at(24),
            dx_context: u32_at(32),
        }
    }
}

// The context selector must fit in the header alignment's low bits.
const _: () = {
    assert!(CbHeader::SIZE_BYTES.is_power_of_two());
    assert!((SVGA_CB_CONTEXT_MASK as usize) < CbHeader::SIZE_BYTES);
    assert!(CB_DX_CONTEXT_OFFSET as usize + 4 <= CbHeader::SIZE_BYTES);
};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn header_encode_decode_round_trips() {
        let hdr = CbHeader {
            status: CbStatus::None as u32,
            error_offset: 0,
            id: 0x0102_0304_0506_0708,
            flags: CbFlags::DX_CONTEXT.bits(),
            length: 0x1000,
            pa: 0xDEAD_BEEF_000,
            dx_context: 7,
        };
        assert_eq!(CbHeader::decode(&hdr.encode()), hdr);
    }

    #[test]
    fn field_offsets_match_encoding() {
        let hdr = CbHeader {
            status: 1,
            error_offset: 2,
            id: 3,
            flags: 4,
            length: 5,
            pa: 6,
            dx_context: 7,
        };
        let buf = hdr.encode();
        let u32_at = |o: u64| u32::from_le_bytes(buf[o as usize..o as usize + 4].try_into().unwrap());
        assert_eq!(u32_at(CB_STATUS_OFFSET), 1);
        assert_eq!(u32_at(CB_ERROR_OFFSET_OFFSET), 2);
        assert_eq!(u32_at(CB_ID_OFFSET), 3);
        assert_eq!(u32_at(CB_FLAGS_OFFSET), 4);
        assert_eq!(u32_at(CB_LENGTH_OFFSET), 5);
        assert_eq!(u32_at(CB_PA_OFFSET), 6);
        assert_eq!(u32_at(CB_DX_CONTEXT_OFFSET), 7);
    }

    #[test]
    fn status_classification() {
        assert!(!CbStatus::None.is_retired());
        assert!(CbStatus::Completed.is_retired());
        assert!(!CbStatus::Completed.is_error());
        assert!(CbStatus::CommandError.is_error());
        assert!(CbStatus::Preempted.is_retired());
        assert_eq!(CbStatus::from_u32(9), None);
    }
}
