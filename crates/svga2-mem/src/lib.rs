//! Host memory virtualization primitives: the host memory seam, the
//! tiered page pool allocator and the device page-table builder.

pub mod host;
pub mod pagetable;
pub mod pool;

pub use host::{HostMemory, HostMemoryError, VecHostMemory};
pub use pagetable::{table_page_count, BuiltTable, PageTable, PageTableError, PtDepth};
pub use pool::{PoolError, PoolSet, TierSpec};

pub const PAGE_SHIFT: u32 = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Device page-table entries are 64-bit page numbers.
pub const PTES_PER_PAGE: usize = PAGE_SIZE / 8;

/// A host physical page number. Byte address = `ppn << PAGE_SHIFT`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysicalPageNumber(pub u64);

impl PhysicalPageNumber {
    pub const fn paddr(self) -> u64 {
        self.0 << PAGE_SHIFT
    }

    pub const fn from_paddr(paddr: u64) -> Self {
        Self(paddr >> PAGE_SHIFT)
    }

    pub const fn add(self, pages: u64) -> Self {
        Self(self.0 + pages)
    }
}

/// A contiguous run of host physical pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRun {
    pub base: PhysicalPageNumber,
    pub count: usize,
}

impl PageRun {
    pub const fn new(base: PhysicalPageNumber, count: usize) -> Self {
        Self { base, count }
    }

    /// The `i`-th page of the run. Panics if out of range.
    pub fn page(&self, i: usize) -> PhysicalPageNumber {
        assert!(i < self.count, "page index {i} out of run of {}", self.count);
        self.base.add(i as u64)
    }

    pub const fn paddr(&self) -> u64 {
        self.base.paddr()
    }

    pub const fn byte_len(&self) -> usize {
        self.count * PAGE_SIZE
    }

    pub fn contains(&self, ppn: PhysicalPageNumber) -> bool {
        ppn >= self.base && ppn.0 < self.base.0 + self.count as u64
    }

    /// Splits off the first `head` pages.
    pub fn split_at(&self, head: usize) -> (PageRun, PageRun) {
        assert!(head <= self.count);
        (
            PageRun::new(self.base, head),
            PageRun::new(self.base.add(head as u64), self.count - head),
        )
    }
}

/// Pages needed to back `size_bytes`.
pub const fn pages_for_bytes(size_bytes: u64) -> usize {
    (size_bytes.div_ceil(PAGE_SIZE as u64)) as usize
}
