//! Command buffer submission.
//!
//! The primary path hands the device 64-byte headers describing physically
//! addressed payloads; completion status comes back asynchronously through
//! the header. Devices without command buffer support fall back to the
//! legacy word FIFO, where every submission carries a fence and completes
//! synchronously from the engine's point of view.

use bitflags::bitflags;
use svga2_mem::{HostMemory, PageRun};
use svga2_proto::cmdbuf::{
    CB_ERROR_OFFSET_OFFSET, CB_STATUS_OFFSET, SVGA_CB_CONTEXT_0, SVGA_CB_CONTEXT_DEVICE,
    SVGA_CB_CONTEXT_MASK,
};
use svga2_proto::{CbHeader, CbStatus, CmdWriter, SvgaCaps, SvgaReg};
use tracing::{debug, error, warn};

use crate::device::DeviceIo;
use crate::error::{Result, SvgaError};
use crate::{fifo, Svga};

/// Opaque handle to an allocated command buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CbId(pub(crate) u64);

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct SubmitFlags: u32 {
        /// Wait for the device to retire the buffer before returning.
        const SYNC = 1 << 0;
        /// Append a fence so completion is observable via `fence_query`.
        const FENCE = 1 << 1;
    }
}

#[derive(Debug)]
pub(crate) struct CommandBuffer {
    pub(crate) header: PageRun,
    pub(crate) payload: PageRun,
    pub(crate) writer: CmdWriter,
    pub(crate) context: u32,
    pub(crate) in_flight: bool,
    pub(crate) last_status: CbStatus,
    pub(crate) last_error_offset: u32,
    pub(crate) submit_id: u64,
}

/// Preallocated header+payload pages for device-context commands, kept
/// for the lifetime of the engine so context restarts cannot fail on an
/// exhausted pool.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DcScratch {
    pub(crate) header: PageRun,
    pub(crate) payload: PageRun,
}

impl<D: DeviceIo, H: HostMemory> Svga<D, H> {
    /// Allocates a command buffer with `payload_pages` pages of payload
    /// capacity.
    pub fn cmb_alloc(&mut self, payload_pages: usize) -> Result<CbId> {
        let header = self.pools.allocate(1)?;
        let payload = match self.pools.allocate(payload_pages) {
            Ok(run) => run,
            Err(err) => {
                self.pools.free(header.base)?;
                return Err(err.into());
            }
        };
        let id = CbId(self.next_cb);
        self.next_cb += 1;
        self.buffers.insert(
            id,
            CommandBuffer {
                header,
                payload,
                writer: CmdWriter::new(),
                context: SVGA_CB_CONTEXT_0,
                in_flight: false,
                last_status: CbStatus::None,
                last_error_offset: 0,
                submit_id: 0,
            },
        );
        Ok(id)
    }

    /// The buffer's command stream, for appending. Rejected while the
    /// device still owns the buffer.
    pub fn cmb_writer(&mut self, id: CbId) -> Result<&mut CmdWriter> {
        let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
        if buf.in_flight {
            return Err(SvgaError::BufferInFlight);
        }
        Ok(&mut buf.writer)
    }

    /// Submits the buffer's accumulated stream to the device.
    ///
    /// On the FIFO fallback path every submission is fenced and the stream
    /// is fully consumed before this returns; `SYNC` then waits on that
    /// fence. On the command buffer path the buffer stays in flight until
    /// a later `cmb_poll` or `SYNC` wait retires it.
    pub fn cmb_submit(
        &mut self,
        id: CbId,
        flags: SubmitFlags,
        dx_context: Option<u32>,
    ) -> Result<()> {
        let cb_usable = self.cb_enabled
            && (dx_context.is_none() || self.caps.caps.contains(SvgaCaps::DX));
        let want_fence = !cb_usable || flags.contains(SubmitFlags::FENCE);

        {
            let buf = self.buffers.get(&id).ok_or(SvgaError::UnknownBuffer)?;
            if buf.in_flight {
                return Err(SvgaError::BufferInFlight);
            }
            if cb_usable {
                let len = buf.writer.len() + if want_fence { 8 } else { 0 };
                let max = buf.payload.byte_len();
                if len > max {
                    return Err(SvgaError::PayloadTooLarge { len, max });
                }
            }
        }

        let fence_id = if want_fence {
            Some(self.fence_get()?)
        } else {
            None
        };
        let submit_id = self.next_submit;
        self.next_submit += 1;

        if cb_usable {
            let (header_pa, payload_pa, context, bytes) = {
                let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
                if let Some(fence) = fence_id {
                    buf.writer.fence(fence);
                }
                buf.submit_id = submit_id;
                (
                    buf.header.paddr(),
                    buf.payload.paddr(),
                    buf.context,
                    buf.writer.as_bytes().to_vec(),
                )
            };

            let hdr = CbHeader {
                status: CbStatus::None as u32,
                error_offset: 0,
                id: submit_id,
                flags: 0,
                length: bytes.len() as u32,
                pa: payload_pa,
                dx_context: dx_context.unwrap_or(0),
            };
            self.host.write_physical(payload_pa, &bytes)?;
            self.host.write_physical(header_pa, &hdr.encode())?;

            // Ownership passes to the device only once both writes landed.
            let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
            buf.in_flight = true;
            buf.last_status = CbStatus::None;
            buf.last_error_offset = 0;
            self.queue.push_back(id);
            self.post_header(header_pa, context);
            self.device.doorbell(&mut self.host);

            if flags.contains(SubmitFlags::SYNC) {
                loop {
                    if self.cmb_poll(Some(id))? {
                        break;
                    }
                    self.device.write_reg(SvgaReg::Sync, 1);
                    self.device.doorbell(&mut self.host);
                }
                let (status, offset) = self.cmb_status(id)?;
                if status.is_error() {
                    return Err(SvgaError::DeviceCommand { status, offset });
                }
            }
        } else {
            let words: Vec<u32> = {
                let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
                if let Some(fence) = fence_id {
                    buf.writer.fence(fence);
                }
                buf.submit_id = submit_id;
                buf.writer.words().collect()
            };

            fifo::write_words(&mut self.device, &mut self.host, &words);
            self.device.doorbell(&mut self.host);

            let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
            buf.writer.clear();
            buf.last_status = CbStatus::Completed;
            buf.last_error_offset = 0;

            if flags.contains(SubmitFlags::SYNC) {
                if let Some(fence) = fence_id {
                    self.fence_wait(fence)?;
                }
            }
        }
        Ok(())
    }

    /// Reads completion status out of every queued header and unlinks
    /// every buffer the device has finished with, wherever it sits in the
    /// queue; independent contexts may complete out of order. Returns
    /// whether the queue is drained, or whether `tracked` in particular
    /// has retired.
    pub fn cmb_poll(&mut self, tracked: Option<CbId>) -> Result<bool> {
        let mut i = 0;
        while i < self.queue.len() {
            let id = self.queue[i];
            let Some(buf) = self.buffers.get(&id) else {
                self.queue.remove(i);
                continue;
            };
            let header_pa = buf.header.paddr();
            let payload_pa = buf.payload.paddr();
            let context = buf.context;

            let raw = self.host.read_u32_le(header_pa + CB_STATUS_OFFSET)?;
            let status = match CbStatus::from_u32(raw) {
                Some(status) => status,
                None => {
                    warn!(raw, "device wrote unrecognized status word");
                    CbStatus::HeaderError
                }
            };
            if !status.is_retired() {
                i += 1;
                continue;
            }
            let error_offset = if status.is_error() {
                self.host.read_u32_le(header_pa + CB_ERROR_OFFSET_OFFSET)?
            } else {
                0
            };

            self.queue.remove(i);
            let buf = self.buffers.get_mut(&id).ok_or(SvgaError::UnknownBuffer)?;
            buf.in_flight = false;
            buf.last_status = status;
            buf.last_error_offset = error_offset;
            buf.writer.clear();

            if status.is_error() {
                let opcode = self
                    .host
                    .read_u32_le(payload_pa + u64::from(error_offset))
                    .unwrap_or(0);
                error!(
                    opcode,
                    offset = error_offset,
                    ?status,
                    "device rejected command buffer"
                );
                self.restart_context(context)?;
            }
        }

        Ok(match tracked {
            Some(id) => !self.queue.contains(&id),
            None => self.queue.is_empty(),
        })
    }

    /// Waits until the device has consumed everything: the command buffer
    /// queue and the legacy FIFO both drain before this returns.
    pub fn cmb_flush(&mut self) -> Result<()> {
        while !self.cmb_poll(None)? {
            self.device.write_reg(SvgaReg::Sync, 1);
            self.device.doorbell(&mut self.host);
        }
        self.device.write_reg(SvgaReg::Sync, 1);
        while self.device.read_reg(SvgaReg::Busy) != 0 {
            self.device.doorbell(&mut self.host);
        }
        Ok(())
    }

    /// Frees a buffer, waiting out the device first if it is in flight.
    pub fn cmb_free(&mut self, id: CbId) -> Result<()> {
        if !self.buffers.contains_key(&id) {
            debug!(id = id.0, "free of unknown command buffer");
            return Err(SvgaError::UnknownBuffer);
        }
        while !self.cmb_poll(Some(id))? {
            self.device.write_reg(SvgaReg::Sync, 1);
            self.device.doorbell(&mut self.host);
        }
        let buf = self.buffers.remove(&id).ok_or(SvgaError::UnknownBuffer)?;
        self.pools.free(buf.header.base)?;
        self.pools.free(buf.payload.base)?;
        Ok(())
    }

    /// Status and error offset of the buffer's most recent submission.
    pub fn cmb_status(&self, id: CbId) -> Result<(CbStatus, u32)> {
        let buf = self.buffers.get(&id).ok_or(SvgaError::UnknownBuffer)?;
        Ok((buf.last_status, buf.last_error_offset))
    }

    pub(crate) fn post_header(&mut self, header_pa: u64, context: u32) {
        self.device
            .write_reg(SvgaReg::CommandHigh, (header_pa >> 32) as u32);
        self.device.write_reg(
            SvgaReg::CommandLow,
            (header_pa as u32 & !SVGA_CB_CONTEXT_MASK) | (context & SVGA_CB_CONTEXT_MASK),
        );
    }

    /// Stops and restarts a queue context through the device-context
    /// queue. Issued after a command error so the context resumes
    /// processing later submissions.
    pub(crate) fn restart_context(&mut self, context: u32) -> Result<()> {
        let Some(scratch) = self.dc_scratch else {
            return Ok(());
        };
        warn!(context, "restarting command buffer context");

        let mut w = CmdWriter::new();
        w.start_stop_context(context, false);
        w.start_stop_context(context, true);
        self.host.write_physical(scratch.payload.paddr(), w.as_bytes())?;

        let hdr = CbHeader {
            status: CbStatus::None as u32,
            error_offset: 0,
            id: 0,
            flags: 0,
            length: w.len() as u32,
            pa: scratch.payload.paddr(),
            dx_context: 0,
        };
        self.host.write_physical(scratch.header.paddr(), &hdr.encode())?;
        self.post_header(scratch.header.paddr(), SVGA_CB_CONTEXT_DEVICE);

        loop {
            self.device.doorbell(&mut self.host);
            let raw = self.host.read_u32_le(scratch.header.paddr() + CB_STATUS_OFFSET)?;
            if CbStatus::from_u32(raw).map_or(true, CbStatus::is_retired) {
                break;
            }
        }
        Ok(())
    }

    /// Submits an engine-generated stream through a throwaway one-page
    /// buffer. Synchronous submissions free the buffer before returning;
    /// asynchronous ones are reaped opportunistically.
    pub(crate) fn submit_internal(
        &mut self,
        sync: bool,
        build: impl FnOnce(&mut CmdWriter),
    ) -> Result<()> {
        let id = self.cmb_alloc(1)?;
        build(self.cmb_writer(id)?);
        let flags = if sync {
            SubmitFlags::SYNC
        } else {
            SubmitFlags::empty()
        };
        let submitted = self.cmb_submit(id, flags, None);
        if sync || submitted.is_err() {
            let freed = self.cmb_free(id);
            submitted?;
            freed?;
        } else {
            self.internal_pending.push(id);
            self.reap_internal()?;
        }
        Ok(())
    }

    /// Frees internal submissions the device has since retired.
    pub(crate) fn reap_internal(&mut self) -> Result<()> {
        self.cmb_poll(None)?;
        let pending = std::mem::take(&mut self.internal_pending);
        for id in pending {
            let in_flight = self.buffers.get(&id).is_some_and(|b| b.in_flight);
            if in_flight {
                self.internal_pending.push(id);
            } else {
                self.cmb_free(id)?;
            }
        }
        Ok(())
    }
}
