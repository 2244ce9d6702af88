//! Fence allocation and completion tracking.
//!
//! Fence ids are 32-bit and monotonic. Zero is reserved as "no fence";
//! when the counter wraps, all outstanding work is flushed first so that
//! ids from the previous epoch can never be confused with new ones.

use svga2_mem::HostMemory;
use svga2_proto::fifo::SVGA_FIFO_FENCE;
use svga2_proto::{FifoCaps, SvgaReg};
use tracing::debug;

use crate::device::DeviceIo;
use crate::error::Result;
use crate::Svga;

#[derive(Clone, Copy, Debug)]
pub(crate) struct FenceCounter {
    /// Next id to hand out. Zero means the counter has wrapped and must
    /// be reset before the next allocation.
    pub(crate) next: u32,
    /// Most recently issued id, if any fence is outstanding this epoch.
    pub(crate) last: Option<u32>,
}

impl Default for FenceCounter {
    fn default() -> Self {
        Self { next: 1, last: None }
    }
}

/// Snapshot of device fence progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FenceProgress {
    /// Most recent fence id the device has passed.
    pub passed: u32,
    /// Most recent fence id issued by the engine this epoch.
    pub last: Option<u32>,
}

impl<D: DeviceIo, H: HostMemory> Svga<D, H> {
    /// Allocates the next fence id. On wrap, flushes everything in flight
    /// and restarts the epoch at 1.
    pub fn fence_get(&mut self) -> Result<u32> {
        if self.fences.next == 0 {
            debug!("fence counter wrapped; flushing before restarting epoch");
            self.cmb_flush()?;
            // The drained device still reports a pre-wrap id as passed.
            // The FIFO fence cell is guest memory, so reset it; without
            // this, waits on new-epoch ids would be satisfied by stale
            // progress. Register-only devices keep the stale value, and
            // waits on fresh ids return early until a new fence passes.
            if self.caps.fifo_caps.contains(FifoCaps::FENCE) {
                self.device.fifo_write(SVGA_FIFO_FENCE, 0);
            }
            self.fences.next = 1;
            self.fences.last = None;
        }
        let id = self.fences.next;
        self.fences.next = self.fences.next.wrapping_add(1);
        self.fences.last = Some(id);
        Ok(id)
    }

    /// Reads fence progress from the device. FIFO-capable devices report
    /// progress through FIFO memory, older ones through the register file.
    pub fn fence_query(&mut self) -> FenceProgress {
        let passed = if self.caps.fifo_caps.contains(FifoCaps::FENCE) {
            self.device.fifo_read(SVGA_FIFO_FENCE)
        } else {
            self.device.read_reg(SvgaReg::Fence)
        };
        FenceProgress {
            passed,
            last: self.fences.last,
        }
    }

    /// Busy-waits until the device has passed `id`. Ids from before the
    /// current epoch, and ids never issued, are treated as already passed.
    pub fn fence_wait(&mut self, id: u32) -> Result<()> {
        if id == 0 {
            return Ok(());
        }
        loop {
            let progress = self.fence_query();
            let Some(last) = progress.last else {
                return Ok(());
            };
            if id > last || progress.passed >= id {
                return Ok(());
            }
            self.device.doorbell(&mut self.host);
        }
    }

    /// Forces the fence counter into a given state. Test hook for the
    /// wrap path, which is otherwise 2^32 allocations away.
    #[doc(hidden)]
    pub fn fence_seed(&mut self, next: u32, last: Option<u32>) {
        self.fences.next = next;
        self.fences.last = last;
    }
}
