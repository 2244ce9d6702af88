//! Guest memory region lifecycle.
//!
//! A region backs surfaces, contexts and staging memory with pool pages.
//! Depending on device capabilities and the region id it is registered
//! with the device in one or both of two forms: the legacy physical
//! descriptor list programmed through the `GmrId`/`GmrDescriptor`
//! registers, and the guest-backed MOB defined by command.

use svga2_mem::{
    pagetable, pages_for_bytes, table_page_count, HostMemory, PageRun, PageTable, PtDepth,
    PAGE_SIZE,
};
use svga2_proto::cmd::GuestMemDescriptor;
use svga2_proto::{MobFormat, SvgaReg};
use tracing::debug;

use crate::device::DeviceIo;
use crate::error::{Result, SvgaError};
use crate::Svga;

/// How a region is registered with the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    /// Registered through the legacy descriptor registers.
    Legacy,
    /// Reachable only as a guest-backed MOB.
    MobOnly,
}

#[derive(Debug)]
pub(crate) struct Region {
    pub(crate) size_bytes: u64,
    /// The full table+data allocation.
    pub(crate) backing: PageRun,
    pub(crate) table: PageTable,
    /// Pages holding the legacy descriptor list, for `Legacy` regions.
    pub(crate) descriptor: Option<PageRun>,
    pub(crate) kind: RegionKind,
    /// Whether a MOB was defined for this region.
    pub(crate) is_mob: bool,
}

/// Descriptor entries one page can hold, leaving room for the link or
/// terminator entry.
const DESCRIPTORS_PER_PAGE: usize = PAGE_SIZE / GuestMemDescriptor::SIZE_BYTES - 1;

impl<D: DeviceIo, H: HostMemory> Svga<D, H> {
    /// Creates a region of at least `size_bytes`, rounded up to page
    /// granularity, and registers it with the device.
    pub fn region_create(&mut self, id: u32, size_bytes: u64, mob_only: bool) -> Result<()> {
        if self.regions.contains_key(&id) {
            return Err(SvgaError::RegionExists { id });
        }
        if size_bytes == 0 {
            return Err(SvgaError::EmptyRegion);
        }
        let rounded = pages_for_bytes(size_bytes) as u64 * PAGE_SIZE as u64;
        let data_pages = pages_for_bytes(rounded);
        let total_pages = data_pages + table_page_count(rounded);

        let backing = self.pools.allocate(total_pages)?;
        let built = match pagetable::build(&mut self.host, backing, rounded) {
            Ok(built) => built,
            Err(err) => {
                self.pools.free(backing.base)?;
                return Err(err.into());
            }
        };

        let kind = if mob_only {
            RegionKind::MobOnly
        } else if id >= self.caps.max_gmr_ids {
            // Ids past the legacy limit silently become MOB-only.
            debug!(
                id,
                max = self.caps.max_gmr_ids,
                "region id exceeds legacy limit; using MOB only"
            );
            RegionKind::MobOnly
        } else if self.caps.max_gmr_pages != 0 && data_pages as u32 > self.caps.max_gmr_pages {
            debug!(
                id,
                pages = data_pages,
                max = self.caps.max_gmr_pages,
                "region exceeds legacy page limit; using MOB only"
            );
            RegionKind::MobOnly
        } else if self.caps.max_gmr_descriptor_length != 0
            && data_pages as u32 > self.caps.max_gmr_descriptor_length
        {
            // Worst case the list needs one descriptor per page.
            debug!(
                id,
                pages = data_pages,
                max = self.caps.max_gmr_descriptor_length,
                "descriptor list would exceed device limit; using MOB only"
            );
            RegionKind::MobOnly
        } else {
            RegionKind::Legacy
        };

        let descriptor = if kind == RegionKind::Legacy {
            match self.write_descriptor_list(built.data) {
                Ok(run) => {
                    self.device.write_reg(SvgaReg::GmrId, id);
                    self.device
                        .write_reg(SvgaReg::GmrDescriptor, run.base.0 as u32);
                    Some(run)
                }
                Err(err) => {
                    self.pools.free(backing.base)?;
                    return Err(err);
                }
            }
        } else {
            None
        };

        let mut is_mob = false;
        if self.caps.supports_gb_objects() {
            let format = mob_format(built.table.depth);
            let root = built.table.root.0;
            let sync = self.config.sync_mob_commands;
            if let Err(err) =
                self.submit_internal(sync, |w| w.define_gb_mob64(id, format, root, rounded as u32))
            {
                if let Some(run) = descriptor {
                    // Unbind before the descriptor page goes back to the
                    // pool; the device must never hold a freed page.
                    self.device.write_reg(SvgaReg::GmrId, id);
                    self.device.write_reg(SvgaReg::GmrDescriptor, 0);
                    self.pools.free(run.base)?;
                }
                self.pools.free(backing.base)?;
                return Err(err);
            }
            is_mob = true;
        }

        self.regions.insert(
            id,
            Region {
                size_bytes: rounded,
                backing,
                table: built.table,
                descriptor,
                kind,
                is_mob,
            },
        );
        self.region_bytes += rounded;
        Ok(())
    }

    /// Unregisters and frees a region.
    pub fn region_free(&mut self, id: u32) -> Result<()> {
        let region = self
            .regions
            .remove(&id)
            .ok_or(SvgaError::UnknownRegion { id })?;

        if region.is_mob {
            self.submit_internal(true, |w| w.destroy_gb_mob(id))?;
        }
        if region.kind == RegionKind::Legacy {
            // The device may still be reading the descriptor list.
            self.cmb_flush()?;
            self.device.write_reg(SvgaReg::GmrId, id);
            self.device.write_reg(SvgaReg::GmrDescriptor, 0);
        }
        if let Some(run) = region.descriptor {
            self.pools.free(run.base)?;
        }
        self.pools.free(region.backing.base)?;
        self.region_bytes -= region.size_bytes;
        Ok(())
    }

    pub fn region_kind(&self, id: u32) -> Result<RegionKind> {
        self.regions
            .get(&id)
            .map(|r| r.kind)
            .ok_or(SvgaError::UnknownRegion { id })
    }

    pub fn region_table(&self, id: u32) -> Result<PageTable> {
        self.regions
            .get(&id)
            .map(|r| r.table)
            .ok_or(SvgaError::UnknownRegion { id })
    }

    /// Writes the legacy descriptor list for `data` into freshly allocated
    /// descriptor pages.
    fn write_descriptor_list(&mut self, data: PageRun) -> Result<PageRun> {
        let entries = merge_entries((0..data.count).map(|i| data.page(i).0 as u32));
        let desc_pages = entries.len().div_ceil(DESCRIPTORS_PER_PAGE).max(1);
        let run = self.pools.allocate(desc_pages)?;
        if let Err(err) = write_entries(&mut self.host, run, &entries) {
            self.pools.free(run.base)?;
            return Err(err);
        }
        Ok(run)
    }
}

/// Merges consecutive page numbers into run descriptors.
fn merge_entries(ppns: impl IntoIterator<Item = u32>) -> Vec<GuestMemDescriptor> {
    let mut entries: Vec<GuestMemDescriptor> = Vec::new();
    for ppn in ppns {
        match entries.last_mut() {
            Some(last) if last.ppn + last.num_pages == ppn => last.num_pages += 1,
            _ => entries.push(GuestMemDescriptor { ppn, num_pages: 1 }),
        }
    }
    entries
}

/// Lays `entries` out across the pages of `run`: when a page's entry
/// slots fill, its last slot links to the next page, and the list ends
/// with a `{0, 0}` terminator.
fn write_entries<H: HostMemory>(
    host: &mut H,
    run: PageRun,
    entries: &[GuestMemDescriptor],
) -> Result<()> {
    let write_entry = |host: &mut H, pa: u64, entry: GuestMemDescriptor| {
        host.write_u32_le(pa, entry.ppn)?;
        host.write_u32_le(pa + 4, entry.num_pages)
    };

    let mut page = 0;
    let mut slot = 0;
    for &entry in entries {
        if slot == DESCRIPTORS_PER_PAGE {
            // Link to the next descriptor page.
            let link_pa = run.page(page).paddr() + (slot * GuestMemDescriptor::SIZE_BYTES) as u64;
            page += 1;
            write_entry(
                host,
                link_pa,
                GuestMemDescriptor {
                    ppn: run.page(page).0 as u32,
                    num_pages: 0,
                },
            )?;
            slot = 0;
        }
        let pa = run.page(page).paddr() + (slot * GuestMemDescriptor::SIZE_BYTES) as u64;
        write_entry(host, pa, entry)?;
        slot += 1;
    }
    let end_pa = run.page(page).paddr() + (slot * GuestMemDescriptor::SIZE_BYTES) as u64;
    write_entry(host, end_pa, GuestMemDescriptor { ppn: 0, num_pages: 0 })?;
    Ok(())
}

pub(crate) fn mob_format(depth: PtDepth) -> MobFormat {
    match depth {
        PtDepth::Zero => MobFormat::PtDepth64_0,
        PtDepth::One => MobFormat::PtDepth64_1,
        PtDepth::Two => MobFormat::PtDepth64_2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use svga2_mem::{PhysicalPageNumber, VecHostMemory};

    #[test]
    fn contiguous_pages_merge_into_run_descriptors() {
        let entries = merge_entries(100u32..104);
        assert_eq!(
            entries,
            vec![GuestMemDescriptor { ppn: 100, num_pages: 4 }]
        );

        let entries = merge_entries([7u32, 8, 20, 21, 22, 40]);
        assert_eq!(
            entries,
            vec![
                GuestMemDescriptor { ppn: 7, num_pages: 2 },
                GuestMemDescriptor { ppn: 20, num_pages: 3 },
                GuestMemDescriptor { ppn: 40, num_pages: 1 },
            ]
        );
    }

    #[test]
    fn long_lists_span_pages_through_link_entries() {
        let mut host = VecHostMemory::new(8 * PAGE_SIZE);
        let run = host.reserve_contiguous(2).unwrap();

        // Alternating page numbers never merge, so 600 entries overflow
        // the 511 entry slots of the first descriptor page.
        let entries = merge_entries((0..600u32).map(|i| 0x1000 + i * 2));
        assert_eq!(entries.len(), 600);
        assert_eq!(entries.len().div_ceil(DESCRIPTORS_PER_PAGE), 2);
        write_entries(&mut host, run, &entries).unwrap();

        // Walk the list back the way the device would: entry slots until
        // a link ({ppn, 0}) or the {0, 0} terminator.
        let mut walked = Vec::new();
        let mut page = run.page(0);
        'pages: loop {
            for slot in 0..=DESCRIPTORS_PER_PAGE {
                let pa = page.paddr() + (slot * GuestMemDescriptor::SIZE_BYTES) as u64;
                let ppn = host.read_u32_le(pa).unwrap();
                let num_pages = host.read_u32_le(pa + 4).unwrap();
                if num_pages > 0 {
                    walked.push(GuestMemDescriptor { ppn, num_pages });
                } else if ppn != 0 {
                    page = PhysicalPageNumber(u64::from(ppn));
                    continue 'pages;
                } else {
                    break 'pages;
                }
            }
        }
        assert_eq!(walked, entries);
    }

    #[test]
    fn short_lists_fit_one_page_with_a_terminator() {
        let mut host = VecHostMemory::new(4 * PAGE_SIZE);
        let run = host.reserve_contiguous(1).unwrap();

        let entries = merge_entries(50u32..54);
        write_entries(&mut host, run, &entries).unwrap();

        assert_eq!(host.read_u32_le(run.paddr()).unwrap(), 50);
        assert_eq!(host.read_u32_le(run.paddr() + 4).unwrap(), 4);
        // Terminator directly after the single entry.
        assert_eq!(host.read_u32_le(run.paddr() + 8).unwrap(), 0);
        assert_eq!(host.read_u32_le(run.paddr() + 12).unwrap(), 0);
    }
}
