//! Legacy word-FIFO submission.
//!
//! The fallback path for devices without command buffer support. The ring
//! bounds live in the first FIFO cells as byte offsets; the ring itself is
//! addressed in 32-bit words.

use svga2_mem::HostMemory;
use svga2_proto::fifo::{SVGA_FIFO_MAX, SVGA_FIFO_MIN, SVGA_FIFO_NEXT_CMD, SVGA_FIFO_STOP};

use crate::device::DeviceIo;

/// Appends `words` to the FIFO ring, busy-waiting on the device whenever
/// the ring is full. One word of the ring is always left unused so a full
/// ring is distinguishable from an empty one.
pub(crate) fn write_words<D: DeviceIo>(
    device: &mut D,
    host: &mut dyn HostMemory,
    words: &[u32],
) {
    let min = device.fifo_read(SVGA_FIFO_MIN);
    let max = device.fifo_read(SVGA_FIFO_MAX);
    let mut next = device.fifo_read(SVGA_FIFO_NEXT_CMD);

    for &word in words {
        loop {
            let mut after = next + 4;
            if after >= max {
                after = min;
            }
            if after != device.fifo_read(SVGA_FIFO_STOP) {
                break;
            }
            device.doorbell(host);
        }

        device.fifo_write(next / 4, word);
        next += 4;
        if next >= max {
            next = min;
        }
        device.fifo_write(SVGA_FIFO_NEXT_CMD, next);
    }
}
