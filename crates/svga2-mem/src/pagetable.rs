//! Device page-table construction.
//!
//! A region's backing pages are described to the device by a 0/1/2-level
//! table of 64-bit page numbers. Table pages lead the allocation: callers
//! request `data_pages + table_page_count(size)` pages up front and the
//! builder splits the run itself.

use thiserror::Error;

use crate::host::{HostMemory, HostMemoryError};
use crate::{pages_for_bytes, PageRun, PhysicalPageNumber, PTES_PER_PAGE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PageTableError {
    #[error("run of {got} pages cannot hold {needed} table+data pages")]
    RunTooSmall { needed: usize, got: usize },

    #[error("{pages} pages exceed the two-level table limit of {max}")]
    TooManyPages { pages: usize, max: usize },

    #[error("cannot build a page table for an empty region")]
    Empty,

    #[error(transparent)]
    Host(#[from] HostMemoryError),
}

/// Indirection depth of a built table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PtDepth {
    /// The root *is* the single data page.
    Zero = 0,
    /// One indirection page of data-page entries.
    One = 1,
    /// A first-level page of second-level pages.
    Two = 2,
}

impl PtDepth {
    pub const fn as_u32(self) -> u32 {
        self as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageTable {
    pub depth: PtDepth,
    pub root: PhysicalPageNumber,
}

/// A built table plus the data pages it describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuiltTable {
    pub table: PageTable,
    pub data: PageRun,
}

const MAX_PAGES: usize = PTES_PER_PAGE * PTES_PER_PAGE;

/// Extra pages a region of `size_bytes` needs for its table.
pub fn table_page_count(size_bytes: u64) -> usize {
    let pages = pages_for_bytes(size_bytes);
    if pages <= 1 {
        0
    } else {
        let second_level = pages.div_ceil(PTES_PER_PAGE);
        if second_level <= 1 {
            1
        } else {
            second_level + 1
        }
    }
}

/// Builds the table in the leading pages of `run` and returns it together
/// with the trailing data run.
pub fn build<H: HostMemory + ?Sized>(
    host: &mut H,
    run: PageRun,
    size_bytes: u64,
) -> Result<BuiltTable, PageTableError> {
    let data_pages = pages_for_bytes(size_bytes);
    if data_pages == 0 {
        return Err(PageTableError::Empty);
    }
    if data_pages > MAX_PAGES {
        return Err(PageTableError::TooManyPages {
            pages: data_pages,
            max: MAX_PAGES,
        });
    }
    let table_pages = table_page_count(size_bytes);
    let needed = data_pages + table_pages;
    if run.count < needed {
        return Err(PageTableError::RunTooSmall {
            needed,
            got: run.count,
        });
    }

    let (tables, rest) = run.split_at(table_pages);
    let (data, _) = rest.split_at(data_pages);

    let table = match table_pages {
        0 => PageTable {
            depth: PtDepth::Zero,
            root: data.base,
        },
        1 => {
            let root = tables.page(0);
            for i in 0..data_pages {
                host.write_u64_le(root.paddr() + (i * 8) as u64, data.page(i).0)?;
            }
            PageTable {
                depth: PtDepth::One,
                root,
            }
        }
        _ => {
            let root = tables.page(0);
            let second_level = table_pages - 1;
            for l2 in 0..second_level {
                let l2_page = tables.page(1 + l2);
                host.write_u64_le(root.paddr() + (l2 * 8) as u64, l2_page.0)?;
                let first = l2 * PTES_PER_PAGE;
                let last = (first + PTES_PER_PAGE).min(data_pages);
                for (slot, i) in (first..last).enumerate() {
                    host.write_u64_le(l2_page.paddr() + (slot * 8) as u64, data.page(i).0)?;
                }
            }
            PageTable {
                depth: PtDepth::Two,
                root,
            }
        }
    };

    Ok(BuiltTable { table, data })
}

/// Walks a built table, reproducing the data-page sequence. Used by tests
/// and by readback diagnostics.
pub fn walk<H: HostMemory + ?Sized>(
    host: &H,
    table: &PageTable,
    size_bytes: u64,
) -> Result<Vec<PhysicalPageNumber>, PageTableError> {
    let pages = pages_for_bytes(size_bytes);
    match table.depth {
        PtDepth::Zero => Ok(vec![table.root]),
        PtDepth::One => {
            let mut out = Vec::with_capacity(pages);
            for i in 0..pages {
                out.push(PhysicalPageNumber(
                    host.read_u64_le(table.root.paddr() + (i * 8) as u64)?,
                ));
            }
            Ok(out)
        }
        PtDepth::Two => {
            let mut out = Vec::with_capacity(pages);
            let second_level = pages.div_ceil(PTES_PER_PAGE);
            for l2 in 0..second_level {
                let l2_ppn = PhysicalPageNumber(
                    host.read_u64_le(table.root.paddr() + (l2 * 8) as u64)?,
                );
                let first = l2 * PTES_PER_PAGE;
                let last = (first + PTES_PER_PAGE).min(pages);
                for slot in 0..last - first {
                    out.push(PhysicalPageNumber(
                        host.read_u64_le(l2_ppn.paddr() + (slot * 8) as u64)?,
                    ));
                }
            }
            Ok(out)
        }
    }
}
