//! SVGA-II command submission and guest memory engine.
//!
//! [`Svga`] owns the device and host memory seams and carries all
//! submission state: the page pools, the command buffer queue, fence
//! tracking, guest memory regions and object tables. A `&mut Svga` is the
//! submission scope; the page allocator keeps its own interior lock so
//! allocation never has to wait on an in-progress submission.
//!
//! Construction negotiates a protocol version with the device, probes its
//! capabilities, reserves the page pool tiers and enables the device.

mod cmdbuf;
mod config;
mod device;
mod error;
mod fence;
mod fifo;
mod gmr;
mod otable;

use std::collections::{HashMap, VecDeque};

use svga2_mem::{HostMemory, PoolSet};
use svga2_proto::cmd::OTABLE_COUNT;
use svga2_proto::reg::{SVGA_ID_0, SVGA_ID_2};
use svga2_proto::{SvgaCaps, SvgaReg};
use tracing::{debug, info};

use crate::cmdbuf::{CommandBuffer, DcScratch};
use crate::fence::FenceCounter;
use crate::gmr::Region;
use crate::otable::Otable;

pub use crate::cmdbuf::{CbId, SubmitFlags};
pub use crate::config::SvgaConfig;
pub use crate::device::{DeviceCaps, DeviceIo};
pub use crate::error::{Result, SvgaError};
pub use crate::fence::FenceProgress;
pub use crate::gmr::RegionKind;
pub use crate::otable::{OtableCapacities, OtableState};

pub struct Svga<D: DeviceIo, H: HostMemory> {
    device: D,
    host: H,
    config: SvgaConfig,
    caps: DeviceCaps,
    pools: PoolSet,
    fences: FenceCounter,
    buffers: HashMap<CbId, CommandBuffer>,
    /// Submission order of in-flight buffers; retirement may happen out
    /// of order across contexts.
    queue: VecDeque<CbId>,
    regions: HashMap<u32, Region>,
    otables: [Otable; OTABLE_COUNT],
    /// Bytes currently backing regions, for diagnostics.
    region_bytes: u64,
    next_cb: u64,
    next_submit: u64,
    cb_enabled: bool,
    dc_scratch: Option<DcScratch>,
    /// Fire-and-forget internal submissions awaiting retirement.
    internal_pending: Vec<CbId>,
}

impl<D: DeviceIo, H: HostMemory> Svga<D, H> {
    /// Brings up the engine against a device: negotiates the version,
    /// probes capabilities, reserves the page pools and enables the
    /// device.
    pub fn new(
        mut device: D,
        mut host: H,
        config: SvgaConfig,
        host_bytes: u64,
    ) -> Result<Self> {
        let mut candidate = config.prefer_device_version.unwrap_or(SVGA_ID_2);
        let version = loop {
            device.write_reg(SvgaReg::Id, candidate);
            if device.read_reg(SvgaReg::Id) == candidate {
                break candidate;
            }
            if candidate <= SVGA_ID_0 {
                return Err(SvgaError::VersionNegotiation);
            }
            candidate -= 1;
        };
        debug!(version = version & 0xFF, "negotiated device version");

        let caps = DeviceCaps::probe(&mut device, version);
        let pools = PoolSet::initialize(&mut host, host_bytes)?;
        let cb_enabled =
            caps.supports_command_buffers() && config.enable_command_buffers.unwrap_or(true);

        device.write_reg(SvgaReg::Enable, 1);
        device.write_reg(SvgaReg::ConfigDone, 1);

        let dc_scratch = if cb_enabled {
            Some(DcScratch {
                header: pools.allocate(1)?,
                payload: pools.allocate(1)?,
            })
        } else {
            None
        };

        info!(
            version = version & 0xFF,
            command_buffers = cb_enabled,
            gb_objects = caps.supports_gb_objects(),
            "device enabled"
        );

        Ok(Self {
            device,
            host,
            config,
            caps,
            pools,
            fences: FenceCounter::default(),
            buffers: HashMap::new(),
            queue: VecDeque::new(),
            regions: HashMap::new(),
            otables: [Otable::default(); OTABLE_COUNT],
            region_bytes: 0,
            next_cb: 0,
            next_submit: 1,
            cb_enabled,
            dc_scratch,
            internal_pending: Vec::new(),
        })
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn config(&self) -> &SvgaConfig {
        &self.config
    }

    /// Whether submissions go through command buffers rather than the
    /// legacy FIFO.
    pub fn command_buffers_enabled(&self) -> bool {
        self.cb_enabled
    }

    /// Bytes currently backing guest memory regions.
    pub fn region_bytes(&self) -> u64 {
        self.region_bytes
    }

    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// Reported VRAM, clamped to the configured cap.
    pub fn vram_bytes(&mut self) -> u64 {
        let reported = u64::from(self.device.read_reg(SvgaReg::VramSize));
        match self.config.vram_cap_bytes {
            Some(cap) => reported.min(cap),
            None => reported,
        }
    }

    /// Whether the device cursor should be used instead of software
    /// compositing.
    pub fn hardware_cursor_enabled(&self) -> bool {
        let capable = self
            .caps
            .caps
            .intersects(SvgaCaps::CURSOR | SvgaCaps::ALPHA_CURSOR);
        capable && self.config.hardware_cursor.unwrap_or(true)
    }

    /// Whether pitch may be programmed through the FIFO pitch-lock cell.
    /// Devices with the pitch-lock defect use the register file instead.
    pub fn fifo_pitchlock_usable(&self) -> bool {
        use svga2_proto::FifoCaps;
        self.caps.fifo_caps.contains(FifoCaps::PITCHLOCK) && !self.config.pitch_lock_workaround
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }
}
