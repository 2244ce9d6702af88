//! The device I/O seam.
//!
//! The engine drives the device exclusively through [`DeviceIo`]:
//! index/value register access, word access to FIFO memory and the
//! doorbell. `doorbell` hands the device a view of host memory so that
//! device models (and test doubles) can write completion status and
//! fence progress back, the way real hardware does via DMA.

use svga2_mem::HostMemory;
use svga2_proto::fifo::SVGA_FIFO_CAPABILITIES;
use svga2_proto::reg::SVGA_ID_1;
use svga2_proto::{FifoCaps, SvgaCaps, SvgaReg};

pub trait DeviceIo {
    fn read_reg(&mut self, reg: SvgaReg) -> u32;

    fn write_reg(&mut self, reg: SvgaReg, value: u32);

    /// Reads the FIFO memory word at `cell`.
    fn fifo_read(&mut self, cell: u32) -> u32;

    /// Writes the FIFO memory word at `cell`.
    fn fifo_write(&mut self, cell: u32, value: u32);

    /// Rings the device. The device may make progress against guest
    /// memory before returning; all engine waits are busy-polls around
    /// this call.
    fn doorbell(&mut self, host: &mut dyn HostMemory);
}

/// Capability state derived once at init from the device registers.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeviceCaps {
    pub version: u32,
    pub caps: SvgaCaps,
    pub fifo_caps: FifoCaps,
    /// Highest legacy GMR id the device accepts, exclusive.
    pub max_gmr_ids: u32,
    pub max_gmr_descriptor_length: u32,
    pub max_gmr_pages: u32,
}

impl DeviceCaps {
    pub fn probe<D: DeviceIo + ?Sized>(device: &mut D, version: u32) -> Self {
        let caps = if version >= SVGA_ID_1 {
            SvgaCaps::from_bits_truncate(device.read_reg(SvgaReg::Capabilities))
        } else {
            SvgaCaps::empty()
        };
        let fifo_caps = if caps.contains(SvgaCaps::EXTENDED_FIFO) {
            FifoCaps::from_bits_truncate(device.fifo_read(SVGA_FIFO_CAPABILITIES))
        } else {
            FifoCaps::empty()
        };
        let (max_gmr_ids, max_gmr_descriptor_length, max_gmr_pages) =
            if caps.contains(SvgaCaps::GMR) || caps.contains(SvgaCaps::GMR2) {
                (
                    device.read_reg(SvgaReg::GmrMaxIds),
                    device.read_reg(SvgaReg::GmrMaxDescriptorLength),
                    device.read_reg(SvgaReg::GmrsMaxPages),
                )
            } else {
                (0, 0, 0)
            };

        Self {
            version,
            caps,
            fifo_caps,
            max_gmr_ids,
            max_gmr_descriptor_length,
            max_gmr_pages,
        }
    }

    pub fn supports_command_buffers(&self) -> bool {
        self.caps.contains(SvgaCaps::COMMAND_BUFFERS)
    }

    pub fn supports_gb_objects(&self) -> bool {
        self.caps.contains(SvgaCaps::GBOBJECTS)
    }
}
