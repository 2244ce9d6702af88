//! Object table management.
//!
//! Guest-backed devices keep one fixed-capacity table per object class in
//! guest memory. Each table moves through a small state machine:
//! unallocated, allocated+dirty, active+clean, and back to allocated+dirty
//! on unbind. A dirty table is announced with `validSize == 0` so the
//! device does not trust stale contents.

use svga2_mem::{pagetable, pages_for_bytes, table_page_count, HostMemory, PageRun, PageTable};
use svga2_proto::cmd::OTABLE_COUNT;
use svga2_proto::{MobFormat, OtableType, SvgaCaps};
use tracing::debug;

use crate::device::{DeviceCaps, DeviceIo};
use crate::error::Result;
use crate::Svga;

/// Entry counts per object class, index-aligned with [`OtableType::ALL`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtableCapacities(pub [u32; OTABLE_COUNT]);

/// Bytes per table entry, index-aligned with [`OtableType::ALL`].
const ENTRY_BYTES: [u32; OTABLE_COUNT] = [16, 64, 8, 8, 64, 8];

impl Default for OtableCapacities {
    fn default() -> Self {
        // Mob, Surface, Context, Shader, ScreenTarget, DxContext.
        Self([4096, 4096, 256, 256, 64, 256])
    }
}

impl OtableCapacities {
    /// Default capacities with classes the device cannot use zeroed out.
    pub fn for_device(caps: &DeviceCaps) -> Self {
        let mut capacities = Self::default();
        if !caps.caps.contains(SvgaCaps::DX) {
            capacities.0[OtableType::DxContext.index()] = 0;
        }
        capacities
    }

    pub fn capacity(&self, ty: OtableType) -> u32 {
        self.0[ty.index()]
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Otable {
    pub(crate) size_bytes: u64,
    pub(crate) backing: Option<PageRun>,
    pub(crate) table: Option<PageTable>,
    pub(crate) active: bool,
    pub(crate) dirty: bool,
}

/// Externally observable table state, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtableState {
    pub allocated: bool,
    pub active: bool,
    pub dirty: bool,
}

impl<D: DeviceIo, H: HostMemory> Svga<D, H> {
    /// Allocates backing for every class with nonzero capacity. Classes
    /// already allocated, and classes zeroed by capability negotiation,
    /// are skipped.
    pub fn otable_setup(&mut self, capacities: &OtableCapacities) -> Result<()> {
        for ty in OtableType::ALL {
            let i = ty.index();
            if self.otables[i].backing.is_some() {
                continue;
            }
            let capacity = capacities.capacity(ty);
            if capacity == 0 {
                debug!(?ty, "object table disabled");
                continue;
            }
            let size = u64::from(capacity) * u64::from(ENTRY_BYTES[i]);
            let total = pages_for_bytes(size) + table_page_count(size);

            let run = self.pools.allocate(total)?;
            if let Err(err) = self.host.zero_run(run) {
                self.pools.free(run.base)?;
                return Err(err.into());
            }
            let built = match pagetable::build(&mut self.host, run, size) {
                Ok(built) => built,
                Err(err) => {
                    self.pools.free(run.base)?;
                    return Err(err.into());
                }
            };

            self.otables[i] = Otable {
                size_bytes: size,
                backing: Some(run),
                table: Some(built.table),
                active: false,
                dirty: true,
            };
        }
        Ok(())
    }

    /// Binds every allocated-but-inactive table to the device. A dirty
    /// table is bound with `validSize == 0`.
    pub fn otable_load(&mut self) -> Result<()> {
        for ty in OtableType::ALL {
            let entry = self.otables[ty.index()];
            let Some(table) = entry.table else { continue };
            if entry.active {
                continue;
            }
            let valid = if entry.dirty { 0 } else { entry.size_bytes as u32 };
            let format = crate::gmr::mob_format(table.depth);
            self.submit_internal(true, |w| {
                w.set_otable_base64(ty, table.root.0, entry.size_bytes as u32, valid, format)
            })?;
            let entry = &mut self.otables[ty.index()];
            entry.active = true;
            entry.dirty = false;
        }
        Ok(())
    }

    /// Unbinds every active table, reading device-side contents back
    /// first. Unbound tables are dirty until rebound.
    pub fn otable_unload(&mut self) -> Result<()> {
        for ty in OtableType::ALL {
            let entry = self.otables[ty.index()];
            if !entry.active {
                continue;
            }
            self.submit_internal(true, |w| {
                w.readback_otable(ty);
                w.set_otable_base64(ty, 0, 0, 0, MobFormat::Invalid);
            })?;
            let entry = &mut self.otables[ty.index()];
            entry.active = false;
            entry.dirty = true;
        }
        Ok(())
    }

    /// Unbinds anything still active and frees all table backing.
    pub fn otable_teardown(&mut self) -> Result<()> {
        self.otable_unload()?;
        for entry in &mut self.otables {
            if let Some(run) = entry.backing.take() {
                self.pools.free(run.base)?;
            }
            *entry = Otable::default();
        }
        Ok(())
    }

    pub fn otable_state(&self, ty: OtableType) -> OtableState {
        let entry = self.otables[ty.index()];
        OtableState {
            allocated: entry.backing.is_some(),
            active: entry.active,
            dirty: entry.dirty,
        }
    }
}
